//! Latest-value table
//!
//! Holds the last known value of every catalog register so a presentation
//! layer can refresh on its own schedule instead of on every poll cycle.
//!
//! Every reset starts a new generation. A cycle records the generation it
//! read under and its result is dropped if the catalog changed meanwhile.

use indexmap::IndexMap;

use crate::catalog::Catalog;
use crate::codec::Value;
use crate::events::ReadResult;

#[derive(Debug, Clone, Default)]
pub struct LatestValues {
    values: IndexMap<String, Value>,
    generation: u64,
    dirty: bool,
}

impl LatestValues {
    /// Table with every register of `catalog` set to unknown
    pub fn for_catalog(catalog: &Catalog) -> Self {
        let mut table = Self::default();
        table.reset(catalog);
        table
    }

    /// Rebuild for a new catalog, forgetting all values
    pub fn reset(&mut self, catalog: &Catalog) {
        self.values = catalog
            .keys()
            .map(|key| (key.to_string(), Value::Unknown))
            .collect();
        self.generation = self.generation.wrapping_add(1);
        self.dirty = true;
    }

    /// Catalog generation the table currently holds
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Fold in one cycle's result; keys not in the table are ignored
    ///
    /// Returns false without touching the table when `generation` is not the
    /// current one.
    pub fn merge(&mut self, generation: u64, result: &ReadResult) -> bool {
        if generation != self.generation {
            return false;
        }
        for (key, value) in result {
            if let Some(slot) = self.values.get_mut(key) {
                *slot = *value;
                self.dirty = true;
            }
        }
        true
    }

    /// Unknown for keys without data or not in the table
    pub fn get(&self, key: &str) -> Value {
        self.values.get(key).copied().unwrap_or_default()
    }

    /// Whether anything changed since the last call
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn snapshot(&self) -> ReadResult {
        self.values.clone()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_starts_unknown_and_merges() {
        let catalog = Catalog::demo().unwrap();
        let mut table = LatestValues::for_catalog(&catalog);
        assert_eq!(table.len(), catalog.len());
        assert!(table.take_dirty());
        assert!(!table.take_dirty());
        assert!(table.get("TOP_LEVEL_*_BTN").is_unknown());

        let mut result = ReadResult::new();
        result.insert("TOP_LEVEL_*_BTN".into(), Value::Hex(0x3));
        result.insert("Ghost_*_key".into(), Value::Int(1));
        assert!(table.merge(table.generation(), &result));

        assert!(table.take_dirty());
        assert_eq!(table.get("TOP_LEVEL_*_BTN"), Value::Hex(0x3));
        assert!(table.get("Ghost_*_key").is_unknown());
        assert_eq!(table.len(), catalog.len());
    }

    #[test]
    fn test_reset_forgets_values() {
        let catalog = Catalog::demo().unwrap();
        let mut table = LatestValues::for_catalog(&catalog);
        let mut result = ReadResult::new();
        result.insert("Delay_*_cnt".into(), Value::Int(9));
        assert!(table.merge(table.generation(), &result));

        table.reset(&catalog);
        assert!(table.get("Delay_*_cnt").is_unknown());
        assert!(table.snapshot().values().all(Value::is_unknown));
    }

    #[test]
    fn test_empty_result_is_not_a_change() {
        let mut table = LatestValues::default();
        assert!(table.merge(0, &ReadResult::new()));
        assert!(!table.take_dirty());
        assert!(table.is_empty());
    }

    #[test]
    fn test_result_from_replaced_catalog_is_dropped() {
        let catalog = Catalog::demo().unwrap();
        let mut table = LatestValues::for_catalog(&catalog);
        let before = table.generation();

        table.reset(&catalog);
        table.take_dirty();
        assert_ne!(table.generation(), before);

        let mut result = ReadResult::new();
        result.insert("Delay_*_cnt".into(), Value::Int(9));
        assert!(!table.merge(before, &result));
        assert!(table.get("Delay_*_cnt").is_unknown());
        assert!(!table.take_dirty());

        assert!(table.merge(table.generation(), &result));
        assert_eq!(table.get("Delay_*_cnt"), Value::Int(9));
    }
}
