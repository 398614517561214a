//! Hex formatting for raw serial traffic

use std::fmt::Write;

fn encode_with(data: &[u8], separator: Option<char>) -> String {
    let mut out = String::with_capacity(data.len() * 3);
    for (i, byte) in data.iter().enumerate() {
        if let (Some(sep), true) = (separator, i > 0) {
            out.push(sep);
        }
        // Infallible for String
        let _ = write!(out, "{byte:02X}");
    }
    out
}

/// Compact uppercase hex: `[0x12, 0x34, 0xAB]` → `"1234AB"`
pub fn encode_upper(data: &[u8]) -> String {
    encode_with(data, None)
}

/// Space separated uppercase hex, the layout used in packet dumps:
/// `[0x00, 0x01, 0x0A]` → `"00 01 0A"`
pub fn encode_spaced(data: &[u8]) -> String {
    encode_with(data, Some(' '))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_slot() {
        assert_eq!(encode_upper(&[0x02, 0x00, 0x00, 0x00]), "02000000");
        assert_eq!(encode_upper(&[0x0F, 0xAB]), "0FAB");
    }

    #[test]
    fn test_spaced_read_request() {
        assert_eq!(encode_spaced(&[0x00, 0x01, 0x0A]), "00 01 0A");
        assert_eq!(encode_spaced(&[0xFE]), "FE");
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(encode_upper(&[]), "");
        assert_eq!(encode_spaced(&[]), "");
    }
}
