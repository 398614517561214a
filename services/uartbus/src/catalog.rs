//! Signal catalog
//!
//! Flattens the nested entity → signal configuration into an ordered table of
//! addressable registers. Insertion order of the configuration is the
//! iteration order of the catalog and therefore the order of every poll batch.
//!
//! The structure is fixed once built; only the per-register `active` flag can
//! change afterwards. Replacing the configuration means building a new catalog.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use indexmap::IndexMap;
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::codec::ValueType;

/// Separator between entity and signal name in a register key
pub const KEY_SEPARATOR: &str = "_*_";

/// Catalog error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CatalogError {
    #[error("Signal '{key}' is missing required field '{field}'")]
    MissingField { key: String, field: &'static str },

    #[error("Invalid byte value '{value}' for '{key}'")]
    BadByte { key: String, value: String },

    #[error("Signal '{key}' has unknown value type '{value_type}'")]
    UnknownType { key: String, value_type: String },

    #[error("Duplicate register key '{0}'")]
    DuplicateKey(String),

    #[error("Failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Failed to read {path}: {message}")]
    Io { path: String, message: String },
}

/// Build the flat register key for an entity/signal pair
pub fn make_key(entity: &str, signal: &str) -> String {
    format!("{entity}{KEY_SEPARATOR}{signal}")
}

// ============================================================================
// Raw configuration (as read from JSON/YAML)
// ============================================================================

/// A byte field that may be written as an integer or as a hex string
///
/// Strings are hexadecimal with or without a `0x` prefix (`"0x0A"`, `"0A"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ByteValue {
    Int(i64),
    Text(String),
}

impl ByteValue {
    pub fn hex(value: u8) -> Self {
        ByteValue::Text(format!("{value:#04X}"))
    }

    /// Resolve to a byte, `None` when out of range or unparseable
    pub fn to_byte(&self) -> Option<u8> {
        match self {
            ByteValue::Int(v) => u8::try_from(*v).ok(),
            ByteValue::Text(s) => {
                let s = s.trim();
                let digits = s
                    .strip_prefix("0x")
                    .or_else(|| s.strip_prefix("0X"))
                    .unwrap_or(s);
                if digits.is_empty() {
                    return None;
                }
                u8::from_str_radix(digits, 16).ok()
            },
        }
    }
}

impl fmt::Display for ByteValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ByteValue::Int(v) => write!(f, "{v}"),
            ByteValue::Text(s) => f.write_str(s),
        }
    }
}

/// One signal entry in the raw configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalSpec {
    #[serde(default, alias = "hex", skip_serializing_if = "Option::is_none")]
    pub address: Option<ByteValue>,

    #[serde(default, alias = "type", skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,

    /// Absent means active; only an explicit `false` disables polling
    #[serde(default, alias = "update", skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

impl SignalSpec {
    pub fn new(address: u8, value_type: ValueType) -> Self {
        Self {
            address: Some(ByteValue::hex(address)),
            value_type: Some(value_type.as_str().to_string()),
            active: None,
        }
    }

    pub fn inactive(mut self) -> Self {
        self.active = Some(false);
        self
    }
}

/// One entity (register group) in the raw configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityConfig {
    #[serde(
        default,
        alias = "sel",
        alias = "hex",
        skip_serializing_if = "Option::is_none"
    )]
    pub selector: Option<ByteValue>,

    #[serde(default, deserialize_with = "unique_keys")]
    pub signals: IndexMap<String, SignalSpec>,
}

/// Raw signal configuration: entity name → entity
pub type SignalConfig = IndexMap<String, EntityConfig>;

/// Top-level document of a signal file
#[derive(Deserialize)]
#[serde(transparent)]
struct SignalFile(#[serde(deserialize_with = "unique_keys")] SignalConfig);

/// Ordered map that rejects a repeated key instead of keeping the last one
fn unique_keys<'de, D, V>(deserializer: D) -> Result<IndexMap<String, V>, D::Error>
where
    D: Deserializer<'de>,
    V: Deserialize<'de>,
{
    struct UniqueKeys<V>(std::marker::PhantomData<V>);

    impl<'de, V: Deserialize<'de>> Visitor<'de> for UniqueKeys<V> {
        type Value = IndexMap<String, V>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map with unique keys")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
            let mut map = IndexMap::with_capacity(access.size_hint().unwrap_or(0));
            while let Some((key, value)) = access.next_entry::<String, V>()? {
                if map.contains_key(&key) {
                    return Err(de::Error::custom(format!("duplicate key '{key}'")));
                }
                map.insert(key, value);
            }
            Ok(map)
        }
    }

    deserializer.deserialize_map(UniqueKeys(std::marker::PhantomData))
}

/// Built-in demo configuration, used when no signal file is available
pub fn default_config() -> SignalConfig {
    let mut top = EntityConfig {
        selector: Some(ByteValue::hex(0x00)),
        signals: IndexMap::new(),
    };
    for i in 0..8u8 {
        top.signals
            .insert(format!("Counter {i}"), SignalSpec::new(i, ValueType::Uint16));
    }
    top.signals
        .insert("BTN".into(), SignalSpec::new(0x08, ValueType::Hex32));
    top.signals
        .insert("LEDs".into(), SignalSpec::new(0x09, ValueType::Hex32));
    top.signals.insert(
        "Nothing 0x00".into(),
        SignalSpec::new(0x0A, ValueType::Hex32).inactive(),
    );

    let mut delay = EntityConfig {
        selector: Some(ByteValue::hex(0x01)),
        signals: IndexMap::new(),
    };
    delay
        .signals
        .insert("cnt".into(), SignalSpec::new(0x00, ValueType::Uint16));
    delay
        .signals
        .insert("CNT_MAX".into(), SignalSpec::new(0x01, ValueType::Uint16));
    delay
        .signals
        .insert("Fire".into(), SignalSpec::new(0x02, ValueType::Hex32));
    delay
        .signals
        .insert("Nothing 0".into(), SignalSpec::new(0x03, ValueType::Hex32));
    delay
        .signals
        .insert("Nothing 1".into(), SignalSpec::new(0x03, ValueType::Hex32));

    let mut config = SignalConfig::new();
    config.insert("TOP_LEVEL".into(), top);
    config.insert("Delay".into(), delay);
    config
}

// ============================================================================
// Flattened catalog
// ============================================================================

/// One leaf register
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisterDescriptor {
    pub entity: String,
    pub signal: String,
    pub key: String,
    pub selector: Option<u8>,
    pub address: u8,
    pub value_type: ValueType,
    pub active: bool,
}

/// Check-state of a group of registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    Checked,
    Unchecked,
    Partial,
}

/// Registers of one entity, in catalog order
#[derive(Debug, Clone)]
pub struct EntityView<'a> {
    pub name: &'a str,
    pub selector: Option<u8>,
    pub registers: Vec<&'a RegisterDescriptor>,
}

/// Ordered, key-indexed register table
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    registers: IndexMap<String, RegisterDescriptor>,
}

impl Catalog {
    /// Flatten a raw configuration
    ///
    /// The caller's configuration is only read, never modified.
    pub fn build(config: &SignalConfig) -> Result<Self, CatalogError> {
        let mut registers = IndexMap::new();
        let mut seen_addresses: HashMap<(Option<u8>, u8), String> = HashMap::new();

        for (entity_name, entity) in config {
            let selector = match &entity.selector {
                Some(raw) => Some(raw.to_byte().ok_or_else(|| CatalogError::BadByte {
                    key: entity_name.clone(),
                    value: raw.to_string(),
                })?),
                None => None,
            };

            for (signal_name, spec) in &entity.signals {
                let key = make_key(entity_name, signal_name);

                let raw_address = spec.address.as_ref().ok_or(CatalogError::MissingField {
                    key: key.clone(),
                    field: "address",
                })?;
                let address = raw_address.to_byte().ok_or_else(|| CatalogError::BadByte {
                    key: key.clone(),
                    value: raw_address.to_string(),
                })?;

                let type_name = spec.value_type.as_deref().ok_or(CatalogError::MissingField {
                    key: key.clone(),
                    field: "value_type",
                })?;
                let value_type =
                    type_name
                        .parse::<ValueType>()
                        .map_err(|_| CatalogError::UnknownType {
                            key: key.clone(),
                            value_type: type_name.to_string(),
                        })?;

                if let Some(previous) = seen_addresses.insert((selector, address), key.clone()) {
                    warn!(
                        "Duplicate register address {:#04x} (selector {:?}): '{}' and '{}'",
                        address, selector, previous, key
                    );
                }

                let descriptor = RegisterDescriptor {
                    entity: entity_name.clone(),
                    signal: signal_name.clone(),
                    key: key.clone(),
                    selector,
                    address,
                    value_type,
                    active: spec.active.unwrap_or(true),
                };

                if registers.insert(key.clone(), descriptor).is_some() {
                    return Err(CatalogError::DuplicateKey(key));
                }
            }
        }

        debug!(
            "Catalog built: {} entities, {} registers",
            config.len(),
            registers.len()
        );
        Ok(Self { registers })
    }

    /// Catalog of the built-in demo configuration
    pub fn demo() -> Result<Self, CatalogError> {
        Self::build(&default_config())
    }

    pub fn from_json_str(text: &str) -> Result<Self, CatalogError> {
        let SignalFile(config) =
            serde_json::from_str(text).map_err(|e| CatalogError::Parse {
                path: "<json>".to_string(),
                message: e.to_string(),
            })?;
        Self::build(&config)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, CatalogError> {
        let SignalFile(config) =
            serde_yaml::from_str(text).map_err(|e| CatalogError::Parse {
                path: "<yaml>".to_string(),
                message: e.to_string(),
            })?;
        Self::build(&config)
    }

    /// Load a signal file; `.yaml`/`.yml` are read as YAML, anything else as JSON
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|e| CatalogError::Io {
            path: display.clone(),
            message: e.to_string(),
        })?;

        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));

        let parsed = if is_yaml {
            serde_yaml::from_str::<SignalFile>(&text).map_err(|e| e.to_string())
        } else {
            serde_json::from_str::<SignalFile>(&text).map_err(|e| e.to_string())
        };
        let SignalFile(config) = parsed.map_err(|message| CatalogError::Parse {
            path: display,
            message,
        })?;

        Self::build(&config)
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.registers.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&RegisterDescriptor> {
        self.registers.get(key)
    }

    /// All registers in catalog order
    pub fn iter(&self) -> impl Iterator<Item = &RegisterDescriptor> {
        self.registers.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.registers.keys().map(String::as_str)
    }

    /// Change one register's active flag
    ///
    /// Returns `false` when the key is unknown; stale keys are not an error.
    pub fn set_active(&mut self, key: &str, active: bool) -> bool {
        match self.registers.get_mut(key) {
            Some(descriptor) => {
                descriptor.active = active;
                true
            },
            None => {
                debug!("set_active ignored for unknown key '{}'", key);
                false
            },
        }
    }

    /// Change the active flag of every register of an entity, returns how many matched
    pub fn set_entity_active(&mut self, entity: &str, active: bool) -> usize {
        let mut count = 0;
        for descriptor in self.registers.values_mut().filter(|d| d.entity == entity) {
            descriptor.active = active;
            count += 1;
        }
        count
    }

    pub fn set_all_active(&mut self, active: bool) {
        for descriptor in self.registers.values_mut() {
            descriptor.active = active;
        }
    }

    /// Keys of the current batch, in batch order
    pub fn active_keys(&self) -> Vec<String> {
        self.registers
            .values()
            .filter(|d| d.active)
            .map(|d| d.key.clone())
            .collect()
    }

    /// Snapshot of the active registers, in batch order
    pub fn active_registers(&self) -> Vec<RegisterDescriptor> {
        self.registers.values().filter(|d| d.active).cloned().collect()
    }

    /// Combined active state of one entity, or of the whole catalog for `None`
    ///
    /// Returns `None` when the group has no registers.
    pub fn group_state(&self, entity: Option<&str>) -> Option<GroupState> {
        let mut total = 0usize;
        let mut active = 0usize;
        for descriptor in self
            .registers
            .values()
            .filter(|d| entity.map_or(true, |name| d.entity == name))
        {
            total += 1;
            if descriptor.active {
                active += 1;
            }
        }

        match (total, active) {
            (0, _) => None,
            (_, 0) => Some(GroupState::Unchecked),
            (t, a) if t == a => Some(GroupState::Checked),
            _ => Some(GroupState::Partial),
        }
    }

    /// Registers grouped by entity, entities in first-seen order
    pub fn entities(&self) -> Vec<EntityView<'_>> {
        let mut views: IndexMap<&str, EntityView<'_>> = IndexMap::new();
        for descriptor in self.registers.values() {
            views
                .entry(descriptor.entity.as_str())
                .or_insert_with(|| EntityView {
                    name: descriptor.entity.as_str(),
                    selector: descriptor.selector,
                    registers: Vec::new(),
                })
                .registers
                .push(descriptor);
        }
        views.into_values().collect()
    }

    /// Selector byte of an entity; `None` if the entity is unknown or has none
    pub fn selector_of(&self, entity: &str) -> Option<u8> {
        self.registers
            .values()
            .find(|d| d.entity == entity)
            .and_then(|d| d.selector)
    }
}
