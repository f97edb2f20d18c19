//! Item Catalog
//!
//! Read-only snapshot of the comparable items. Ingestion from market-data
//! providers happens elsewhere; this module only loads a prepared list.

use std::collections::HashMap;
use std::path::Path;

use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Bundled sample pool used when no catalog path is configured.
const SAMPLE_CATALOG: &str = include_str!("../../data/catalog.json");

/// A comparable item. The comparison quantity is `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    /// Stable opaque identifier.
    pub id: String,
    /// Ticker-style symbol.
    pub symbol: String,
    /// Human readable name.
    pub display_name: String,
    /// Non-negative comparison value (market cap).
    pub value: f64,
    /// Origin tag, e.g. the network the token lives on.
    #[serde(default)]
    pub group_tag: String,
}

/// Catalog loading errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// File could not be read.
    #[error("failed to read catalog: {0}")]
    Io(#[from] std::io::Error),
    /// File is not a JSON item list.
    #[error("invalid catalog json: {0}")]
    Json(#[from] serde_json::Error),
    /// An item has a negative or non-finite value.
    #[error("item {0} has an invalid value")]
    InvalidValue(String),
    /// Two items share an id.
    #[error("duplicate item id {0}")]
    DuplicateId(String),
}

/// Immutable catalog snapshot.
///
/// Iteration order is the load order; selection depends on it, so the same
/// snapshot always yields the same sequence for a seed.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    items: Vec<Item>,
    by_id: HashMap<String, usize>,
}

impl Catalog {
    /// Build a catalog, rejecting invalid values and duplicate ids.
    pub fn new(items: Vec<Item>) -> Result<Self, CatalogError> {
        let mut by_id = HashMap::with_capacity(items.len());
        for (idx, item) in items.iter().enumerate() {
            if !item.value.is_finite() || item.value < 0.0 {
                return Err(CatalogError::InvalidValue(item.id.clone()));
            }
            if by_id.insert(item.id.clone(), idx).is_some() {
                return Err(CatalogError::DuplicateId(item.id.clone()));
            }
        }
        Ok(Self { items, by_id })
    }

    /// Parse a JSON array of items.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let items: Vec<Item> = serde_json::from_str(json)?;
        Self::new(items)
    }

    /// Load a JSON array of items from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// The bundled sample pool.
    pub fn sample() -> Result<Self, CatalogError> {
        Self::from_json(SAMPLE_CATALOG)
    }

    /// All items in load order.
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// Look up an item by id.
    pub fn get(&self, id: &str) -> Option<&Item> {
        self.by_id.get(id).map(|idx| &self.items[*idx])
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when the catalog has no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use super::test_support::item;

    #[test]
    fn test_lookup_by_id() {
        let catalog = Catalog::new(vec![item("btc", 1e12), item("eth", 4e11)]).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("eth").unwrap().symbol, "ETH");
        assert!(catalog.get("doge").is_none());
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let result = Catalog::new(vec![item("btc", 1.0), item("btc", 2.0)]);
        assert!(matches!(result, Err(CatalogError::DuplicateId(id)) if id == "btc"));
    }

    #[test]
    fn test_rejects_negative_value() {
        let result = Catalog::new(vec![item("bad", -5.0)]);
        assert!(matches!(result, Err(CatalogError::InvalidValue(_))));
    }

    #[test]
    fn test_parses_camel_case_json() {
        let json = r#"[{"id":"a","symbol":"A","displayName":"Alpha","value":10.5,"groupTag":"base"},
                       {"id":"b","symbol":"B","displayName":"Beta","value":3}]"#;
        let catalog = Catalog::from_json(json).unwrap();
        assert_eq!(catalog.get("a").unwrap().display_name, "Alpha");
        assert_eq!(catalog.get("b").unwrap().group_tag, "");
    }

    #[test]
    fn test_sample_catalog_loads() {
        let catalog = Catalog::sample().unwrap();
        assert!(catalog.len() >= 2);
    }
}
