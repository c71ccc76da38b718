//! Column union across heterogeneous entities
//!
//! System columns (`PartitionKey`, `RowKey`, `Timestamp`) always lead, in
//! that order, when any entity carries them. Every other column keeps the
//! position in which it was first observed.

use crate::table::types::{Entity, PARTITION_KEY, ROW_KEY, TIMESTAMP};
use std::collections::HashSet;

/// Columns that lead the header when present
const LEADING: [&str; 3] = [PARTITION_KEY, ROW_KEY, TIMESTAMP];

/// Insertion-ordered set of field names
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnSet {
    leading: [bool; 3],
    others: Vec<String>,
    seen: HashSet<String>,
}

impl ColumnSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a column name; returns true if it was new
    pub fn insert(&mut self, name: &str) -> bool {
        if let Some(slot) = LEADING.iter().position(|c| *c == name) {
            return !std::mem::replace(&mut self.leading[slot], true);
        }
        if self.seen.contains(name) {
            return false;
        }
        self.seen.insert(name.to_string());
        self.others.push(name.to_string());
        true
    }

    /// Record every field of an entity
    pub fn observe(&mut self, entity: &Entity) {
        for name in entity.field_names() {
            self.insert(name);
        }
    }

    /// Fold another set in, keeping this set's order for names it already has
    pub fn merge(&mut self, other: &ColumnSet) {
        for name in other.iter() {
            self.insert(name);
        }
    }

    /// Columns in output order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        LEADING
            .iter()
            .zip(self.leading.iter())
            .filter(|(_, present)| **present)
            .map(|(name, _)| *name)
            .chain(self.others.iter().map(String::as_str))
    }

    pub fn len(&self) -> usize {
        self.leading.iter().filter(|p| **p).count() + self.others.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Freeze into the final header
    pub fn freeze(&self) -> Vec<String> {
        self.iter().map(str::to_string).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::types::Value;

    fn entity(fields: &[&str]) -> Entity {
        fields
            .iter()
            .fold(Entity::new(), |e, f| e.with(*f, Value::String(String::new())))
    }

    #[test]
    fn test_system_columns_lead() {
        let mut columns = ColumnSet::new();
        columns.observe(&entity(&["Name", "Timestamp", "RowKey", "Age", "PartitionKey"]));

        assert_eq!(
            columns.freeze(),
            vec!["PartitionKey", "RowKey", "Timestamp", "Name", "Age"]
        );
    }

    #[test]
    fn test_first_seen_order_and_dedup() {
        let mut columns = ColumnSet::new();
        assert!(columns.insert("B"));
        assert!(columns.insert("A"));
        assert!(!columns.insert("B"));
        assert!(columns.insert("RowKey"));
        assert!(!columns.insert("RowKey"));

        assert_eq!(columns.freeze(), vec!["RowKey", "B", "A"]);
        assert_eq!(columns.len(), 3);
    }

    #[test]
    fn test_absent_system_columns_omitted() {
        let mut columns = ColumnSet::new();
        columns.observe(&entity(&["Name"]));
        assert_eq!(columns.freeze(), vec!["Name"]);
    }

    #[test]
    fn test_merge_keeps_existing_order() {
        let mut a = ColumnSet::new();
        a.observe(&entity(&["PartitionKey", "RowKey", "Name"]));

        let mut b = ColumnSet::new();
        b.observe(&entity(&["Age", "Name", "Timestamp"]));

        a.merge(&b);
        assert_eq!(
            a.freeze(),
            vec!["PartitionKey", "RowKey", "Timestamp", "Name", "Age"]
        );
    }
}
