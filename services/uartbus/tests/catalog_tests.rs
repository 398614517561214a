//! Signal file and settings loading tests

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::io::Write;
use std::path::PathBuf;

use uartbus::{Catalog, CatalogError, EngineSettings, GroupState, ValueType};

fn config_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config")
}

fn write_temp(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_shipped_signal_file_matches_demo() {
    let shipped = Catalog::from_file(config_dir().join("uart2bus.json")).unwrap();
    let demo = Catalog::demo().unwrap();

    assert_eq!(shipped.len(), 16);
    assert_eq!(shipped.active_keys().len(), 15);
    assert_eq!(
        shipped.iter().collect::<Vec<_>>(),
        demo.iter().collect::<Vec<_>>()
    );
}

#[test]
fn test_shipped_settings_file() {
    let settings = EngineSettings::load(Some(&config_dir().join("uartbus.yaml"))).unwrap();
    assert_eq!(settings.baud_rate, 115_200);
    assert_eq!(settings.update_period_ms, 1000);
    assert_eq!(settings.handshake_max_attempts, None);
    assert_eq!(settings.signals, Some(PathBuf::from("config/uart2bus.json")));
}

#[test]
fn test_yaml_signal_file() {
    let file = write_temp(
        ".yaml",
        r#"
uart:
  sel: 0x02
  signals:
    status: { address: 0x10, value_type: uint8 }
    temp: { hex: "0x11", type: float, update: false }
    tag: { address: 18, value_type: char }
"#,
    );

    let catalog = Catalog::from_file(file.path()).unwrap();
    assert_eq!(catalog.len(), 3);

    let temp = catalog.get("uart_*_temp").unwrap();
    assert_eq!(temp.selector, Some(0x02));
    assert_eq!(temp.address, 0x11);
    assert_eq!(temp.value_type, ValueType::Float32);
    assert!(!temp.active);

    assert_eq!(catalog.get("uart_*_tag").unwrap().address, 18);
    assert_eq!(catalog.group_state(Some("uart")), Some(GroupState::Partial));
}

#[test]
fn test_entity_without_selector() {
    let file = write_temp(
        ".json",
        r#"{ "flat": { "signals": { "x": { "hex": "1F", "type": "int32" } } } }"#,
    );

    let catalog = Catalog::from_file(file.path()).unwrap();
    let x = catalog.get("flat_*_x").unwrap();
    assert_eq!(x.selector, None);
    assert_eq!(x.address, 0x1F);
    assert!(x.active);
}

#[test]
fn test_missing_type_is_rejected() {
    let file = write_temp(
        ".json",
        r#"{ "E": { "hex": "0x00", "signals": { "a": { "hex": "0x01" } } } }"#,
    );

    let err = Catalog::from_file(file.path()).unwrap_err();
    assert_eq!(
        err,
        CatalogError::MissingField {
            key: "E_*_a".into(),
            field: "value_type",
        }
    );
}

#[test]
fn test_unknown_type_is_rejected() {
    let file = write_temp(
        ".json",
        r#"{ "E": { "signals": { "a": { "hex": "0x01", "type": "int64" } } } }"#,
    );

    let err = Catalog::from_file(file.path()).unwrap_err();
    assert!(matches!(err, CatalogError::UnknownType { ref value_type, .. } if value_type == "int64"));
}

#[test]
fn test_bad_byte_is_rejected() {
    let file = write_temp(
        ".json",
        r#"{ "E": { "hex": "0x100", "signals": { "a": { "hex": "0x01", "type": "uint8" } } } }"#,
    );

    let err = Catalog::from_file(file.path()).unwrap_err();
    assert!(matches!(err, CatalogError::BadByte { ref key, .. } if key == "E"));
}

#[test]
fn test_malformed_file_is_a_parse_error() {
    let file = write_temp(".json", "{ not json");
    let err = Catalog::from_file(file.path()).unwrap_err();
    assert!(matches!(err, CatalogError::Parse { .. }));
}

#[test]
fn test_missing_file_is_an_io_error() {
    let err = Catalog::from_file(config_dir().join("does-not-exist.json")).unwrap_err();
    assert!(matches!(err, CatalogError::Io { .. }));
}

#[test]
fn test_repeated_signal_in_file_is_rejected() {
    let file = write_temp(
        ".json",
        r#"{ "Delay": { "hex": "0x01", "signals": {
            "cnt": { "hex": "0x00", "type": "uint16" },
            "cnt": { "hex": "0x05", "type": "hex32" }
        } } }"#,
    );

    let err = Catalog::from_file(file.path()).unwrap_err();
    assert!(matches!(err, CatalogError::Parse { ref message, .. } if message.contains("cnt")));
}

#[test]
fn test_repeated_entity_in_file_is_rejected() {
    let file = write_temp(
        ".json",
        r#"{
            "Delay": { "signals": { "a": { "hex": "0x00", "type": "uint8" } } },
            "Delay": { "signals": { "b": { "hex": "0x01", "type": "uint8" } } }
        }"#,
    );

    let err = Catalog::from_file(file.path()).unwrap_err();
    assert!(matches!(err, CatalogError::Parse { ref message, .. } if message.contains("duplicate key 'Delay'")));
}

#[test]
fn test_repeated_signal_in_yaml_is_rejected() {
    let file = write_temp(
        ".yaml",
        r#"
E:
  signals:
    x: { address: 0x00, value_type: uint8 }
    x: { address: 0x01, value_type: uint8 }
"#,
    );

    let err = Catalog::from_file(file.path()).unwrap_err();
    assert!(matches!(err, CatalogError::Parse { ref message, .. } if message.contains("duplicate")));
}
