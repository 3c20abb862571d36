//! Serialized name-to-identity tables.
//!
//! The build-time scanner emits a flat JSON object mapping every registered
//! dotted name to a stable integer id. The bootstrap loads it into the
//! registry before application code runs.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Flat `name -> id` mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityTable(IndexMap<String, u64>);

impl IdentityTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a table from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is not a flat object of non-negative integers.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Render the table as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Add or replace an entry.
    pub fn insert(&mut self, name: impl Into<String>, id: u64) -> Option<u64> {
        self.0.insert(name.into(), id)
    }

    /// Id of `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<u64> {
        self.0.get(name).copied()
    }

    /// Entries in file order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(name, id)| (name.as_str(), *id))
    }

    /// Highest id in the table.
    #[must_use]
    pub fn max_id(&self) -> Option<u64> {
        self.0.values().copied().max()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Ids used by more than one name, with the names sharing them.
    #[must_use]
    pub fn shared_ids(&self) -> Vec<(u64, Vec<&str>)> {
        let mut by_id: IndexMap<u64, Vec<&str>> = IndexMap::new();
        for (name, id) in self.iter() {
            by_id.entry(id).or_default().push(name);
        }
        by_id.into_iter().filter(|(_, names)| names.len() > 1).collect()
    }
}

impl<S: Into<String>> FromIterator<(S, u64)> for IdentityTable {
    fn from_iter<I: IntoIterator<Item = (S, u64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(name, id)| (name.into(), id)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_round_trip_keeps_order() {
        let table = IdentityTable::from_json(r#"{"b.y": 2, "a.x": 1}"#).expect("parse");
        let names: Vec<_> = table.iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["b.y", "a.x"]);
        assert_eq!(table.max_id(), Some(2));
    }

    #[test]
    fn test_rejects_non_integer_ids() {
        assert!(IdentityTable::from_json(r#"{"a": "one"}"#).is_err());
        assert!(IdentityTable::from_json(r#"{"a": -1}"#).is_err());
        assert!(IdentityTable::from_json("[1]").is_err());
    }

    #[test]
    fn test_shared_ids() {
        let table: IdentityTable = [("a", 1), ("b", 1), ("c", 2)].into_iter().collect();
        assert_eq!(table.shared_ids(), vec![(1, vec!["a", "b"])]);
    }
}
