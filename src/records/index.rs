//! Identity index for dedup lookups.

use crate::types::{Identity, Record};
use std::collections::HashSet;

/// Set of identities already admitted to a table.
#[derive(Clone, Debug, Default)]
pub struct IdentityIndex {
    identities: HashSet<Identity>,
}

impl IdentityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from records. Duplicates collapse.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a Record>) -> Self {
        Self {
            identities: records.into_iter().map(|r| r.identity.clone()).collect(),
        }
    }

    /// Add an identity. Returns `false` if it was already present.
    pub fn insert(&mut self, identity: &Identity) -> bool {
        self.identities.insert(identity.clone())
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.identities.contains(identity)
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn clear(&mut self) {
        self.identities.clear();
    }
}

/// Drop later records whose identity was already seen. Order is preserved.
pub(crate) fn dedup_keep_first(records: Vec<Record>) -> Vec<Record> {
    let mut seen = IdentityIndex::new();
    records
        .into_iter()
        .filter(|r| seen.insert(&r.identity))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TimestampNs;
    use serde_json::Value;

    fn record(id: &str, ts: i64, summary: &str) -> Record {
        Record::new(id, TimestampNs(ts), "k", "s", Value::Null).with_summary(summary)
    }

    #[test]
    fn test_insert_reports_duplicates() {
        let mut index = IdentityIndex::new();
        assert!(index.insert(&Identity::from("a")));
        assert!(!index.insert(&Identity::from("a")));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_from_records_collapses_duplicates() {
        let records = vec![record("a", 1, ""), record("b", 2, ""), record("a", 3, "")];
        let index = IdentityIndex::from_records(&records);
        assert_eq!(index.len(), 2);
        assert!(index.contains(&Identity::from("b")));
        assert!(!index.contains(&Identity::from("c")));
    }

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        let deduped = dedup_keep_first(vec![
            record("a", 1, "first"),
            record("b", 2, ""),
            record("a", 0, "second"),
        ]);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].summary, "first");
    }
}
