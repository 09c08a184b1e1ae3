//! The durable record store: dedup, merge and flush.

use crate::config::Settings;
use crate::error::{Result, WatchError};
use crate::records::{dedup_keep_first, read_table, write_table, IdentityIndex};
use crate::types::{Identity, Record};
use fs2::FileExt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Durable table file.
    pub path: PathBuf,

    /// Flush once the live buffer holds more than this many records.
    pub flush_threshold: usize,

    /// Flush buffered records at least this often.
    pub flush_interval: Duration,

    /// Never write the durable file.
    pub read_only: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./events.csv"),
            flush_threshold: 100,
            flush_interval: Duration::from_secs(60),
            read_only: false,
        }
    }
}

impl StoreConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            path: settings.paths.store_path.clone(),
            flush_threshold: settings.store.flush_threshold,
            flush_interval: Duration::from_secs(settings.store.flush_seconds),
            read_only: settings.store.read_only,
        }
    }
}

/// What a flush did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Store is read-only.
    Skipped,
    /// Live buffer was empty.
    Empty,
    Flushed { written: usize, total: usize },
}

/// What a partition merge did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Every partition identity was already known; the file was not touched.
    Unchanged,
    Merged { added: usize, total: usize },
    ReadOnly,
}

/// Identity-keyed record table backed by a file, plus a live buffer of
/// records admitted since the last flush.
///
/// The durable file is only ever rewritten by [`flush`](Self::flush) and
/// [`merge_partition`](Self::merge_partition). A record is admitted at most
/// once per identity; the first admitted version wins.
pub struct RecordStore {
    config: StoreConfig,

    /// Exclusive lock held while writable.
    _lock_file: Option<File>,

    /// Durable records, ordered by timestamp.
    table: Vec<Record>,
    index: IdentityIndex,

    /// Admitted but not yet flushed.
    live: Vec<Record>,
    live_index: IdentityIndex,

    last_flush: Instant,
}

impl RecordStore {
    /// Open the store and load the durable file.
    ///
    /// A writable store takes an exclusive lock next to the table file and
    /// creates an empty table if none exists.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let lock_file = if config.read_only {
            None
        } else {
            Some(Self::acquire_lock(&config.path)?)
        };

        let mut store = Self {
            config,
            _lock_file: lock_file,
            table: Vec::new(),
            index: IdentityIndex::new(),
            live: Vec::new(),
            live_index: IdentityIndex::new(),
            last_flush: Instant::now(),
        };

        store.load()?;
        if !store.config.read_only && !store.config.path.exists() {
            write_table(&store.config.path, &[])?;
        }
        Ok(store)
    }

    /// Reload the durable file into memory, keeping the first row per identity.
    ///
    /// Returns the number of records loaded.
    pub fn load(&mut self) -> Result<usize> {
        let rows = read_table(&self.config.path)?;
        let row_count = rows.len();
        let mut table = dedup_keep_first(rows);
        table.sort_by_key(|r| r.timestamp);

        if table.len() != row_count {
            info!(
                path = %self.config.path.display(),
                dropped = row_count - table.len(),
                "dropped duplicate identities on load"
            );
        }

        self.index = IdentityIndex::from_records(&table);
        self.table = table;
        Ok(self.table.len())
    }

    /// Buffer a record if its identity is new to both the table and the buffer.
    ///
    /// Returns `true` if the record was admitted. Read-only stores admit nothing.
    pub fn append_live(&mut self, record: Record) -> bool {
        if self.config.read_only
            || self.index.contains(&record.identity)
            || self.live_index.contains(&record.identity)
        {
            return false;
        }
        self.live_index.insert(&record.identity);
        self.live.push(record);
        true
    }

    /// Whether the buffer is over threshold or the flush interval has elapsed.
    pub fn should_flush(&self, now: Instant) -> bool {
        if self.config.read_only || self.live.is_empty() {
            return false;
        }
        self.live.len() > self.config.flush_threshold
            || now.saturating_duration_since(self.last_flush) >= self.config.flush_interval
    }

    /// Merge the live buffer into the table and rewrite the durable file.
    ///
    /// On error the table, the file and the buffer are left as they were.
    pub fn flush(&mut self) -> Result<FlushOutcome> {
        if self.config.read_only {
            return Ok(FlushOutcome::Skipped);
        }
        self.last_flush = Instant::now();
        if self.live.is_empty() {
            return Ok(FlushOutcome::Empty);
        }

        let written = self.live.len();
        let mut merged = Vec::with_capacity(self.table.len() + written);
        merged.extend(self.table.iter().cloned());
        merged.extend(self.live.iter().cloned());
        let mut merged = dedup_keep_first(merged);
        merged.sort_by_key(|r| r.timestamp);

        write_table(&self.config.path, &merged)?;

        for record in &self.live {
            self.index.insert(&record.identity);
        }
        self.table = merged;
        self.live.clear();
        self.live_index.clear();

        debug!(written, total = self.table.len(), "flushed live buffer");
        Ok(FlushOutcome::Flushed {
            written,
            total: self.table.len(),
        })
    }

    /// Union a partition's records into the durable table.
    ///
    /// Records whose identity is already durable or buffered are ignored, so
    /// earlier-admitted versions always win. If nothing is new the file is not
    /// rewritten.
    pub fn merge_partition(&mut self, partition: &str, records: &[Record]) -> Result<MergeOutcome> {
        if self.config.read_only {
            return Ok(MergeOutcome::ReadOnly);
        }

        let mut seen = self.index.clone();
        let mut fresh = Vec::new();
        for record in records {
            if !self.live_index.contains(&record.identity) && seen.insert(&record.identity) {
                fresh.push(record.clone());
            }
        }
        if fresh.is_empty() {
            debug!(partition, "partition already merged");
            return Ok(MergeOutcome::Unchanged);
        }

        let added = fresh.len();
        let mut merged = Vec::with_capacity(self.table.len() + added);
        merged.extend(self.table.iter().cloned());
        merged.extend(fresh);
        merged.sort_by_key(|r| r.timestamp);

        write_table(&self.config.path, &merged).map_err(|e| WatchError::merge(partition, e))?;

        self.index = seen;
        self.table = merged;
        info!(partition, added, total = self.table.len(), "merged partition");
        Ok(MergeOutcome::Merged {
            added,
            total: self.table.len(),
        })
    }

    /// Durable records, oldest first.
    pub fn records(&self) -> &[Record] {
        &self.table
    }

    /// Buffered records, in admission order.
    pub fn live(&self) -> &[Record] {
        &self.live
    }

    pub fn live_len(&self) -> usize {
        self.live.len()
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.index.contains(identity) || self.live_index.contains(identity)
    }

    pub fn is_read_only(&self) -> bool {
        self.config.read_only
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut lock_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        lock_name.push(".lock");
        let lock_file = File::create(path.with_file_name(lock_name))?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| WatchError::Locked)?;

        Ok(lock_file)
    }
}
