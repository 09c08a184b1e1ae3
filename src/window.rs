//! Bounded, filtered, time-ordered projection of recent records.

use crate::config::DisplaySettings;
use crate::types::{Identity, Record, TimestampNs};
use std::collections::{BTreeMap, HashSet};

/// Which records the window may show.
#[derive(Clone, Debug, Default)]
pub struct WindowFilter {
    /// Source-name substrings. Empty admits every source.
    pub sources: Vec<String>,
    pub excluded_kinds: HashSet<String>,
}

impl WindowFilter {
    pub fn from_settings(settings: &DisplaySettings) -> Self {
        Self {
            sources: settings.sources.clone(),
            excluded_kinds: settings.excluded_kinds.iter().cloned().collect(),
        }
    }

    pub fn admits(&self, record: &Record) -> bool {
        if self.excluded_kinds.contains(&record.kind) {
            return false;
        }
        self.sources.is_empty()
            || self
                .sources
                .iter()
                .any(|wanted| record.source.contains(wanted.as_str()))
    }
}

/// Fixed-capacity window of the most recent records.
///
/// Members are unique by identity and ordered by timestamp. Records with
/// equal timestamps keep arrival order, and the earliest arrival is evicted
/// first.
#[derive(Clone, Debug)]
pub struct LiveWindow {
    capacity: usize,
    filter: WindowFilter,
    members: BTreeMap<(TimestampNs, u64), Record>,
    identities: HashSet<Identity>,
    seq: u64,
}

impl LiveWindow {
    pub fn new(capacity: usize, filter: WindowFilter) -> Self {
        Self {
            capacity,
            filter,
            members: BTreeMap::new(),
            identities: HashSet::new(),
            seq: 0,
        }
    }

    /// Admit `record` if it passes the filter, is not already shown, and either
    /// fits or is strictly newer than the oldest member, which it then evicts.
    ///
    /// Returns `true` if the window changed.
    pub fn consider(&mut self, record: &Record) -> bool {
        if self.capacity == 0
            || !self.filter.admits(record)
            || self.identities.contains(&record.identity)
        {
            return false;
        }

        if self.members.len() >= self.capacity {
            let Some((&oldest_key, _)) = self.members.first_key_value() else {
                return false;
            };
            if record.timestamp <= oldest_key.0 {
                return false;
            }
            if let Some(evicted) = self.members.remove(&oldest_key) {
                self.identities.remove(&evicted.identity);
            }
        }

        self.seq += 1;
        self.identities.insert(record.identity.clone());
        self.members
            .insert((record.timestamp, self.seq), record.clone());
        true
    }

    /// Offer each record in turn. Returns how many were admitted.
    pub fn consider_all<'a>(&mut self, records: impl IntoIterator<Item = &'a Record>) -> usize {
        records
            .into_iter()
            .filter(|record| self.consider(record))
            .count()
    }

    /// Members, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Record> + '_ {
        self.members.values()
    }

    /// Owned copy of the members, oldest first.
    pub fn records(&self) -> Vec<Record> {
        self.iter().cloned().collect()
    }

    pub fn oldest(&self) -> Option<&Record> {
        self.members.values().next()
    }

    pub fn newest(&self) -> Option<&Record> {
        self.members.values().next_back()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
