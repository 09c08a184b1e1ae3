//! Historical sync: newest partition first, then the rest concurrently.

use super::archive::{list_partitions, ArchiveLister};
use super::copy::BulkCopy;
use super::merge::{parse_partition_dir, write_partition_table};
use crate::bridge::BridgeSender;
use crate::cancel::CancelToken;
use crate::codec::Codec;
use crate::config::{Paths, SyncSettings};
use crate::error::{Result, WatchError};
use crate::store::MergeOutcome;
use crate::types::{DiagnosticKind, Record, SyncLifecycleEvent, SyncPartition};
use crate::worker::StoreHandle;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Result of one sync pass.
#[derive(Debug, Default)]
pub struct SyncSummary {
    /// Partitions that completed, in completion order.
    pub completed: Vec<(String, MergeOutcome)>,
    /// Partitions whose copy or merge failed, with the reason.
    pub failed: Vec<(String, String)>,
    /// First non-recoverable partition failure, if any.
    pub fatal: Option<String>,
}

/// Pulls the most recent archive partitions and merges them into the store.
///
/// Copy and merge failures are reported per partition and never stop the
/// other partitions.
pub struct SyncOrchestrator {
    settings: SyncSettings,
    paths: Paths,
    lister: Box<dyn ArchiveLister>,
    copier: Box<dyn BulkCopy>,
    codec: Arc<dyn Codec>,
    store: StoreHandle,
    bridge: BridgeSender,
}

impl SyncOrchestrator {
    pub fn new(
        settings: SyncSettings,
        paths: Paths,
        lister: Box<dyn ArchiveLister>,
        copier: Box<dyn BulkCopy>,
        codec: Arc<dyn Codec>,
        store: StoreHandle,
        bridge: BridgeSender,
    ) -> Self {
        Self {
            settings,
            paths,
            lister,
            copier,
            codec,
            store,
            bridge,
        }
    }

    /// Every remote partition, oldest name first.
    ///
    /// Names that would map onto the store, the log or the side-file
    /// directories are skipped.
    pub fn discover(&self) -> Result<Vec<SyncPartition>> {
        let names = list_partitions(self.lister.as_ref())?;
        Ok(names
            .into_iter()
            .filter(|name| {
                let safe = self.paths.is_safe_partition(name);
                if !safe {
                    warn!(partition = %name, "skipping partition with a reserved local name");
                }
                safe
            })
            .map(|name| SyncPartition {
                remote_key: self.settings.s3.synced_key(&name),
                name,
            })
            .collect())
    }

    /// The last `k` partitions.
    pub fn select_partitions(partitions: Vec<SyncPartition>, k: usize) -> Vec<SyncPartition> {
        let skip = partitions.len().saturating_sub(k);
        partitions.into_iter().skip(skip).collect()
    }

    /// Copy, parse and merge one partition, emitting lifecycle events.
    ///
    /// Failures are reported as diagnostics and returned.
    pub fn sync_partition(&self, partition: &SyncPartition, cancel: &CancelToken) -> Result<MergeOutcome> {
        self.bridge.lifecycle(SyncLifecycleEvent::Start {
            partition_key: partition.remote_key.clone(),
        })?;
        let local_path = self.paths.partition_dir(&partition.name);
        info!(partition = %partition.remote_key, dest = %local_path.display(), "sync started");

        let result = self
            .copier
            .copy(partition, &local_path, cancel)
            .and_then(|()| self.merge(partition));

        match result {
            Ok((outcome, records)) => {
                info!(partition = %partition.remote_key, ?outcome, "sync complete");
                self.bridge.lifecycle(SyncLifecycleEvent::Complete {
                    partition_key: partition.remote_key.clone(),
                    local_path,
                    records,
                })?;
                Ok(outcome)
            }
            Err(WatchError::Cancelled) => Err(WatchError::Cancelled),
            Err(e) => {
                self.report(partition, &e)?;
                Err(e)
            }
        }
    }

    fn merge(&self, partition: &SyncPartition) -> Result<(MergeOutcome, Arc<Vec<Record>>)> {
        let wrap = |e: WatchError| match e {
            WatchError::Merge { .. } => e,
            other => WatchError::merge(partition.remote_key.clone(), other),
        };

        let parsed = parse_partition_dir(&self.paths.partition_dir(&partition.name), self.codec.as_ref())
            .map_err(wrap)?;
        debug!(
            partition = %partition.remote_key,
            files = parsed.files,
            skipped = parsed.skipped,
            records = parsed.records.len(),
            "parsed partition"
        );
        write_partition_table(&self.paths.partition_table_path(&partition.name), &parsed.records)
            .map_err(wrap)?;

        let records = Arc::new(parsed.records);
        let outcome = self
            .store
            .merge_partition(&partition.remote_key, Arc::clone(&records))
            .map_err(wrap)?;
        Ok((outcome, records))
    }

    fn report(&self, partition: &SyncPartition, error: &WatchError) -> Result<()> {
        warn!(partition = %partition.remote_key, error = %error, "sync failed");
        let stderr = match error {
            WatchError::SyncCopy { stderr, .. } => stderr.clone(),
            _ => String::new(),
        };
        self.bridge.diagnostic(Record::diagnostic(
            DiagnosticKind::SyncProblem,
            partition.name.clone(),
            format!("sync failure for {}: {error}", partition.remote_key),
            json!({
                "partition_key": partition.remote_key,
                "error": error.to_string(),
                "stderr": stderr,
            }),
        ))
    }

    /// One full pass: list, select, then sync.
    ///
    /// The newest partition syncs alone so its data lands before any older
    /// partition merges; the rest then run concurrently.
    pub fn run(&self, cancel: &CancelToken) -> Result<SyncSummary> {
        let mut summary = SyncSummary::default();
        if !self.settings.enabled {
            debug!("historical sync disabled");
            return Ok(summary);
        }

        let partitions = match self.discover() {
            Ok(partitions) => partitions,
            Err(e) => {
                warn!(error = %e, "partition listing failed");
                self.bridge.diagnostic(Record::diagnostic(
                    DiagnosticKind::SyncProblem,
                    self.settings.s3.bucket.clone(),
                    format!("partition listing failed: {e}"),
                    json!({ "error": e.to_string() }),
                ))?;
                return Err(e);
            }
        };
        let mut selected = Self::select_partitions(partitions, self.settings.num_dirs_to_sync);
        let Some(newest) = selected.pop() else {
            info!("no partitions to sync");
            return Ok(summary);
        };

        for (partition, result) in self.sync_isolated(vec![newest], cancel)? {
            self.record(&mut summary, &partition, result)?;
        }
        if let Some(e) = first_fatal(&summary) {
            return Err(e);
        }
        if selected.is_empty() || cancel.is_cancelled() {
            return Ok(summary);
        }

        for (partition, result) in self.sync_isolated(selected, cancel)? {
            self.record(&mut summary, &partition, result)?;
        }
        match first_fatal(&summary) {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    /// Sync each partition on its own scoped thread.
    ///
    /// A panicking sync becomes [`WatchError::Fatal`] and is reported like
    /// any other partition failure.
    fn sync_isolated(
        &self,
        partitions: Vec<SyncPartition>,
        cancel: &CancelToken,
    ) -> Result<Vec<(SyncPartition, Result<MergeOutcome>)>> {
        let joined: Vec<(SyncPartition, std::thread::Result<Result<MergeOutcome>>)> =
            std::thread::scope(|scope| {
                let handles: Vec<_> = partitions
                    .into_iter()
                    .map(|partition| {
                        let handle = scope.spawn({
                            let partition = partition.clone();
                            move || self.sync_partition(&partition, cancel)
                        });
                        (partition, handle)
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|(partition, handle)| (partition, handle.join()))
                    .collect()
            });

        let mut results = Vec::with_capacity(joined.len());
        for (partition, joined) in joined {
            let result = match joined {
                Ok(result) => result,
                Err(_) => {
                    let e = WatchError::Fatal(format!("sync of {} panicked", partition.name));
                    error!(partition = %partition.remote_key, "partition sync panicked");
                    self.report(&partition, &e)?;
                    Err(e)
                }
            };
            results.push((partition, result));
        }
        Ok(results)
    }

    fn record(
        &self,
        summary: &mut SyncSummary,
        partition: &SyncPartition,
        result: Result<MergeOutcome>,
    ) -> Result<()> {
        match result {
            Ok(outcome) => summary.completed.push((partition.name.clone(), outcome)),
            Err(e @ WatchError::Disconnected(_)) => return Err(e),
            Err(WatchError::Cancelled) => {}
            Err(WatchError::Fatal(reason)) => {
                summary.failed.push((partition.name.clone(), reason.clone()));
                summary.fatal.get_or_insert(reason);
            }
            Err(e) => summary.failed.push((partition.name.clone(), e.to_string())),
        }
        Ok(())
    }
}

fn first_fatal(summary: &SyncSummary) -> Option<WatchError> {
    summary.fatal.as_ref().map(|msg| WatchError::Fatal(msg.clone()))
}
