//! Isolated worker thread that owns the [`RecordStore`].
//!
//! Every mutation of the durable file happens on this thread. Other contexts
//! talk to it through a [`StoreHandle`]; only `merge_partition` waits for a
//! reply, and only the calling thread blocks on it.

use crate::bridge::BridgeSender;
use crate::cancel::{CancelToken, POLL_INTERVAL};
use crate::config::Paths;
use crate::error::{Result, WatchError};
use crate::reports;
use crate::store::{FlushOutcome, MergeOutcome, RecordStore};
use crate::types::{DeviceReport, DiagnosticKind, Record};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use serde_json::json;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, info, warn};

enum StoreCommand {
    AppendLive(Record),
    Flush,
    FlushIfDue,
    Merge {
        partition: String,
        records: Arc<Vec<Record>>,
        reply: Sender<Result<MergeOutcome>>,
    },
    WriteReport(DeviceReport),
    Shutdown,
}

/// Cloneable command handle for the store worker.
#[derive(Clone)]
pub struct StoreHandle {
    tx: Sender<StoreCommand>,
}

impl StoreHandle {
    /// Queue a live record for buffering. Never blocks.
    pub fn append_live(&self, record: Record) -> Result<()> {
        self.send(StoreCommand::AppendLive(record))
    }

    /// Queue an unconditional flush.
    pub fn request_flush(&self) -> Result<()> {
        self.send(StoreCommand::Flush)
    }

    /// Queue a flush that runs only if the threshold or interval says so.
    pub fn flush_if_due(&self) -> Result<()> {
        self.send(StoreCommand::FlushIfDue)
    }

    /// Merge a partition's records into the durable table and wait for the result.
    pub fn merge_partition(&self, partition: &str, records: Arc<Vec<Record>>) -> Result<MergeOutcome> {
        let (reply, outcome) = bounded(1);
        self.send(StoreCommand::Merge {
            partition: partition.to_string(),
            records,
            reply,
        })?;
        outcome
            .recv()
            .map_err(|_| WatchError::Disconnected("store worker"))?
    }

    /// Queue a side-file write for a device report.
    pub fn write_report(&self, report: DeviceReport) -> Result<()> {
        self.send(StoreCommand::WriteReport(report))
    }

    /// Ask the worker to flush and exit.
    pub fn shutdown(&self) -> Result<()> {
        self.send(StoreCommand::Shutdown)
    }

    fn send(&self, command: StoreCommand) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| WatchError::Disconnected("store worker"))
    }
}

/// Spawner for the store worker thread.
pub struct StoreWorker;

impl StoreWorker {
    /// Move `store` onto a dedicated thread.
    ///
    /// The thread exits on [`StoreHandle::shutdown`], on cancellation, or once
    /// every handle is dropped, flushing the live buffer first.
    pub fn spawn(
        store: RecordStore,
        paths: Paths,
        diagnostics: BridgeSender,
        cancel: CancelToken,
    ) -> Result<(StoreHandle, JoinHandle<Result<()>>)> {
        let (tx, rx) = unbounded();
        let worker = WorkerLoop {
            store,
            paths,
            diagnostics,
            rx,
            cancel,
        };
        let join = std::thread::Builder::new()
            .name("store-worker".to_string())
            .spawn(move || worker.run())?;
        Ok((StoreHandle { tx }, join))
    }
}

struct WorkerLoop {
    store: RecordStore,
    paths: Paths,
    diagnostics: BridgeSender,
    rx: Receiver<StoreCommand>,
    cancel: CancelToken,
}

impl WorkerLoop {
    fn run(mut self) -> Result<()> {
        info!(
            path = %self.store.path().display(),
            records = self.store.records().len(),
            read_only = self.store.is_read_only(),
            "store worker started"
        );

        loop {
            if self.cancel.is_cancelled() {
                // Keep whatever was queued before cancellation.
                let queued: Vec<_> = self.rx.try_iter().collect();
                for command in queued {
                    if let StoreCommand::AppendLive(record) = command {
                        self.store.append_live(record);
                    }
                }
                break;
            }
            match self.rx.recv_timeout(POLL_INTERVAL) {
                Ok(StoreCommand::Shutdown) => break,
                Ok(command) => self.handle(command),
                Err(RecvTimeoutError::Timeout) => self.flush_if_due(),
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let outcome = self.store.flush()?;
        info!(?outcome, "store worker stopped");
        Ok(())
    }

    fn handle(&mut self, command: StoreCommand) {
        match command {
            StoreCommand::AppendLive(record) => {
                self.store.append_live(record);
                self.flush_if_due();
            }
            StoreCommand::Flush => self.flush(),
            StoreCommand::FlushIfDue => self.flush_if_due(),
            StoreCommand::Merge {
                partition,
                records,
                reply,
            } => {
                let outcome = self.store.merge_partition(&partition, &records);
                if reply.send(outcome).is_err() {
                    debug!(partition, "merge requester went away");
                }
            }
            StoreCommand::WriteReport(report) => {
                if let Err(e) = reports::write_if_newer(&self.paths, &report) {
                    self.report_problem(&format!("report for {}", report.device), &e);
                }
            }
            StoreCommand::Shutdown => {}
        }
    }

    fn flush_if_due(&mut self) {
        if self.store.should_flush(Instant::now()) {
            self.flush();
        }
    }

    fn flush(&mut self) {
        match self.store.flush() {
            Ok(FlushOutcome::Flushed { written, total }) => {
                debug!(written, total, "live buffer flushed");
            }
            Ok(_) => {}
            Err(e) => self.report_problem("flush", &e),
        }
    }

    fn report_problem(&self, what: &str, error: &WatchError) {
        warn!(what, error = %error, "store problem");
        let record = Record::diagnostic(
            DiagnosticKind::StoreProblem,
            "store",
            format!("{what} failed: {error}"),
            json!({ "path": self.store.path().display().to_string() }),
        );
        if self.diagnostics.diagnostic(record).is_err() {
            debug!("diagnostic consumer gone");
        }
    }
}
