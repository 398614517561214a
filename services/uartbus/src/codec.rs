//! Wire codec for the debug register protocol
//!
//! Requests are raw byte sequences: the read opcode, the optional entity
//! selector and the register address. Every response slot is 4 bytes wide,
//! little-endian, regardless of the logical width of the register, so a batch
//! of N reads is answered by exactly 4N bytes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

/// Opcode byte that starts every read request
pub const READ_OPCODE: u8 = 0x00;

/// Probe byte written during the handshake; the peer echoes it back
pub const HANDSHAKE_PROBE: u8 = 0xFE;

/// Width of one response slot on the wire
pub const SLOT_WIDTH: usize = 4;

/// Codec error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("Slot too short for {value_type}: expected {expected} bytes, got {actual}")]
    ShortSlot {
        value_type: ValueType,
        expected: usize,
        actual: usize,
    },

    #[error("Unknown value type '{0}'")]
    UnknownType(String),

    #[error("Value {value} cannot be encoded as {value_type}")]
    TypeMismatch { value: String, value_type: ValueType },
}

/// Decoding rule of a register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Char,
    #[serde(alias = "hex")]
    Hex32,
    #[serde(alias = "float")]
    Float32,
}

impl ValueType {
    /// Every supported type, in declaration order
    pub const ALL: [ValueType; 9] = [
        ValueType::Int8,
        ValueType::Uint8,
        ValueType::Int16,
        ValueType::Uint16,
        ValueType::Int32,
        ValueType::Uint32,
        ValueType::Char,
        ValueType::Hex32,
        ValueType::Float32,
    ];

    /// Number of low-order slot bytes that carry the value
    pub fn width(self) -> usize {
        match self {
            ValueType::Int8 | ValueType::Uint8 | ValueType::Char => 1,
            ValueType::Int16 | ValueType::Uint16 => 2,
            ValueType::Int32 | ValueType::Uint32 | ValueType::Hex32 | ValueType::Float32 => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ValueType::Int8 => "int8",
            ValueType::Uint8 => "uint8",
            ValueType::Int16 => "int16",
            ValueType::Uint16 => "uint16",
            ValueType::Int32 => "int32",
            ValueType::Uint32 => "uint32",
            ValueType::Char => "char",
            ValueType::Hex32 => "hex32",
            ValueType::Float32 => "float32",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueType {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "int8" => Ok(ValueType::Int8),
            "uint8" => Ok(ValueType::Uint8),
            "int16" => Ok(ValueType::Int16),
            "uint16" => Ok(ValueType::Uint16),
            "int32" => Ok(ValueType::Int32),
            "uint32" => Ok(ValueType::Uint32),
            "char" => Ok(ValueType::Char),
            "hex" | "hex32" => Ok(ValueType::Hex32),
            "float" | "float32" => Ok(ValueType::Float32),
            _ => Err(CodecError::UnknownType(s.to_string())),
        }
    }
}

/// A decoded register value
///
/// `Unknown` means "no data yet" or "read failed", which is distinct from a
/// key being absent from a result.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Value {
    /// Any of the signed/unsigned integer types
    Int(i64),
    Char(char),
    /// Rendered as `0x..` lowercase hex
    Hex(u32),
    Float(f32),
    #[default]
    Unknown,
}

impl Value {
    pub fn is_unknown(&self) -> bool {
        matches!(self, Value::Unknown)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Char(c) => write!(f, "{c}"),
            Value::Hex(v) => write!(f, "{v:#x}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Unknown => f.write_str("unknown"),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Int(v) => serializer.serialize_i64(*v),
            Value::Float(v) => serializer.serialize_f32(*v),
            Value::Char(_) | Value::Hex(_) | Value::Unknown => {
                serializer.collect_str(self)
            },
        }
    }
}

/// Build the request bytes for one register read
///
/// Layout: `READ_OPCODE`, then the selector byte when present, then the address.
pub fn encode_read(address: u8, selector: Option<u8>) -> Vec<u8> {
    let mut request = Vec::with_capacity(3);
    request.push(READ_OPCODE);
    if let Some(sel) = selector {
        request.push(sel);
    }
    request.push(address);
    request
}

/// Number of response bytes a batch of `count` reads produces
pub fn response_len(count: usize) -> usize {
    count * SLOT_WIDTH
}

/// Decode one little-endian response slot according to `value_type`
pub fn decode(raw: &[u8], value_type: ValueType) -> Result<Value, CodecError> {
    let width = value_type.width();
    if raw.len() < width {
        return Err(CodecError::ShortSlot {
            value_type,
            expected: width,
            actual: raw.len(),
        });
    }

    let value = match value_type {
        ValueType::Int8 => Value::Int(i64::from(raw[0] as i8)),
        ValueType::Uint8 => Value::Int(i64::from(raw[0])),
        ValueType::Int16 => Value::Int(i64::from(i16::from_le_bytes([raw[0], raw[1]]))),
        ValueType::Uint16 => Value::Int(i64::from(u16::from_le_bytes([raw[0], raw[1]]))),
        ValueType::Int32 => Value::Int(i64::from(i32::from_le_bytes(slot4(raw)))),
        ValueType::Uint32 => Value::Int(i64::from(u32::from_le_bytes(slot4(raw)))),
        ValueType::Char => Value::Char(char::from(raw[0])),
        ValueType::Hex32 => Value::Hex(u32::from_le_bytes(slot4(raw))),
        ValueType::Float32 => Value::Float(f32::from_le_bytes(slot4(raw))),
    };
    Ok(value)
}

/// Encode a value into a full response slot, upper bytes zeroed
///
/// This is the peer side of [`decode`]; the simulated device answers reads with it.
pub fn encode_slot(value: &Value, value_type: ValueType) -> Result<[u8; SLOT_WIDTH], CodecError> {
    let mismatch = || CodecError::TypeMismatch {
        value: value.to_string(),
        value_type,
    };

    let mut slot = [0u8; SLOT_WIDTH];
    match (value_type, value) {
        (ValueType::Int8, Value::Int(v)) => {
            slot[0] = i8::try_from(*v).map_err(|_| mismatch())? as u8;
        },
        (ValueType::Uint8, Value::Int(v)) => {
            slot[0] = u8::try_from(*v).map_err(|_| mismatch())?;
        },
        (ValueType::Int16, Value::Int(v)) => {
            let v = i16::try_from(*v).map_err(|_| mismatch())?;
            slot[..2].copy_from_slice(&v.to_le_bytes());
        },
        (ValueType::Uint16, Value::Int(v)) => {
            let v = u16::try_from(*v).map_err(|_| mismatch())?;
            slot[..2].copy_from_slice(&v.to_le_bytes());
        },
        (ValueType::Int32, Value::Int(v)) => {
            let v = i32::try_from(*v).map_err(|_| mismatch())?;
            slot.copy_from_slice(&v.to_le_bytes());
        },
        (ValueType::Uint32, Value::Int(v)) => {
            let v = u32::try_from(*v).map_err(|_| mismatch())?;
            slot.copy_from_slice(&v.to_le_bytes());
        },
        (ValueType::Char, Value::Char(c)) => {
            slot[0] = u8::try_from(u32::from(*c)).map_err(|_| mismatch())?;
        },
        (ValueType::Hex32, Value::Hex(v)) => slot.copy_from_slice(&v.to_le_bytes()),
        (ValueType::Float32, Value::Float(v)) => slot.copy_from_slice(&v.to_le_bytes()),
        _ => return Err(mismatch()),
    }
    Ok(slot)
}

fn slot4(raw: &[u8]) -> [u8; 4] {
    [raw[0], raw[1], raw[2], raw[3]]
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_encode_read_without_selector() {
        assert_eq!(encode_read(0x0A, None), vec![0x00, 0x0A]);
    }

    #[test]
    fn test_encode_read_with_selector() {
        assert_eq!(encode_read(0x03, Some(0x01)), vec![0x00, 0x01, 0x03]);
    }

    #[test]
    fn test_response_len_is_four_per_request() {
        assert_eq!(response_len(0), 0);
        assert_eq!(response_len(2), 8);
        assert_eq!(response_len(11), 44);
    }

    #[test]
    fn test_decode_uint16_and_hex32() {
        assert_eq!(
            decode(&[0x02, 0x00, 0x00, 0x00], ValueType::Uint16).unwrap(),
            Value::Int(2)
        );
        let hex = decode(&[0xFF, 0x00, 0x00, 0x00], ValueType::Hex32).unwrap();
        assert_eq!(hex, Value::Hex(0xFF));
        assert_eq!(hex.to_string(), "0xff");
    }

    #[test]
    fn test_decode_uses_low_order_bytes_only() {
        // Upper bytes are garbage for narrow types
        let raw = [0xFE, 0xFF, 0xAA, 0xBB];
        assert_eq!(decode(&raw, ValueType::Int8).unwrap(), Value::Int(-2));
        assert_eq!(decode(&raw, ValueType::Uint8).unwrap(), Value::Int(254));
        assert_eq!(decode(&raw, ValueType::Int16).unwrap(), Value::Int(-2));
        assert_eq!(decode(&raw, ValueType::Uint16).unwrap(), Value::Int(0xFFFE));
    }

    #[test]
    fn test_decode_char_and_float() {
        assert_eq!(
            decode(&[0x41, 0, 0, 0], ValueType::Char).unwrap(),
            Value::Char('A')
        );
        let raw = 1.5f32.to_le_bytes();
        assert_eq!(decode(&raw, ValueType::Float32).unwrap(), Value::Float(1.5));
    }

    #[test]
    fn test_decode_short_slot_fails() {
        let err = decode(&[0x01, 0x02], ValueType::Uint32).unwrap_err();
        assert_eq!(
            err,
            CodecError::ShortSlot {
                value_type: ValueType::Uint32,
                expected: 4,
                actual: 2
            }
        );
        // One byte is enough for 8-bit types
        assert!(decode(&[0x01], ValueType::Uint8).is_ok());
        assert!(decode(&[], ValueType::Char).is_err());
    }

    #[test]
    fn test_boundary_values_survive_slot_encoding() {
        let cases = [
            (ValueType::Int8, Value::Int(i64::from(i8::MIN))),
            (ValueType::Int8, Value::Int(i64::from(i8::MAX))),
            (ValueType::Int8, Value::Int(-1)),
            (ValueType::Uint8, Value::Int(0)),
            (ValueType::Uint8, Value::Int(i64::from(u8::MAX))),
            (ValueType::Int16, Value::Int(i64::from(i16::MIN))),
            (ValueType::Int16, Value::Int(i64::from(i16::MAX))),
            (ValueType::Uint16, Value::Int(i64::from(u16::MAX))),
            (ValueType::Int32, Value::Int(i64::from(i32::MIN))),
            (ValueType::Int32, Value::Int(i64::from(i32::MAX))),
            (ValueType::Uint32, Value::Int(0)),
            (ValueType::Uint32, Value::Int(i64::from(u32::MAX))),
            (ValueType::Char, Value::Char('\0')),
            (ValueType::Char, Value::Char('z')),
            (ValueType::Hex32, Value::Hex(0)),
            (ValueType::Hex32, Value::Hex(u32::MAX)),
            (ValueType::Float32, Value::Float(-0.25)),
            (ValueType::Float32, Value::Float(f32::MAX)),
            (ValueType::Float32, Value::Float(f32::MIN_POSITIVE)),
        ];

        for (value_type, value) in cases {
            let slot = encode_slot(&value, value_type).unwrap();
            assert_eq!(decode(&slot, value_type).unwrap(), value, "{value_type}");
        }
    }

    #[test]
    fn test_encode_slot_rejects_out_of_range() {
        assert!(encode_slot(&Value::Int(256), ValueType::Uint8).is_err());
        assert!(encode_slot(&Value::Int(-1), ValueType::Uint16).is_err());
        assert!(encode_slot(&Value::Hex(1), ValueType::Uint32).is_err());
        assert!(encode_slot(&Value::Unknown, ValueType::Int8).is_err());
        assert!(encode_slot(&Value::Char('\u{263A}'), ValueType::Char).is_err());
    }

    #[test]
    fn test_value_type_parsing_accepts_aliases() {
        assert_eq!("hex".parse::<ValueType>().unwrap(), ValueType::Hex32);
        assert_eq!("float".parse::<ValueType>().unwrap(), ValueType::Float32);
        assert_eq!("UINT16".parse::<ValueType>().unwrap(), ValueType::Uint16);
        assert!(matches!(
            "bool".parse::<ValueType>(),
            Err(CodecError::UnknownType(_))
        ));
        for ty in ValueType::ALL {
            assert_eq!(ty.as_str().parse::<ValueType>().unwrap(), ty);
        }
    }

    #[test]
    fn test_value_serializes_like_display() {
        let json = serde_json::json!({
            "int": Value::Int(-3),
            "hex": Value::Hex(0xff),
            "chr": Value::Char('x'),
            "none": Value::Unknown,
        });
        assert_eq!(json["int"], -3);
        assert_eq!(json["hex"], "0xff");
        assert_eq!(json["chr"], "x");
        assert_eq!(json["none"], "unknown");
    }
}
