//! The single display consumer and the render-state snapshot it publishes.
//!
//! The consumer owns the [`LiveWindow`] and the [`ReportIndex`]. Handling a
//! bridge item only updates in-memory state and queues store commands; file
//! I/O happens on the store worker.

use crate::bridge::{BridgeItem, BridgeReceiver};
use crate::cancel::CancelToken;
use crate::config::DisplaySettings;
use crate::error::{Result, WatchError};
use crate::reports::ReportIndex;
use crate::types::{kinds, short_kind, DeviceReport, DiagnosticKind, ReportKind, Record, SyncLifecycleEvent};
use crate::window::LiveWindow;
use crate::worker::StoreHandle;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Diagnostic text longer than this is cut to fit.
const MAX_LOG_TEXT: usize = 100;

/// Items handled per wake-up before state is republished.
const MAX_BATCH: usize = 256;

/// Progress of one partition sync.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncProgress {
    /// Partition name, the last component of the key.
    pub name: String,
    pub partition_key: String,
    pub started: Instant,
    /// Set once the sync completed or failed.
    pub finished: Option<Instant>,
    pub failed: bool,
}

impl SyncProgress {
    fn start(partition_key: &str, now: Instant) -> Self {
        Self {
            name: partition_name(partition_key).to_string(),
            partition_key: partition_key.to_string(),
            started: now,
            finished: None,
            failed: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.finished.is_some()
    }

    /// Time spent so far, or in total once finished.
    pub fn elapsed(&self, now: Instant) -> Duration {
        self.finished
            .unwrap_or(now)
            .saturating_duration_since(self.started)
    }
}

fn partition_name(key: &str) -> &str {
    Path::new(key)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(key)
}

/// Bounded scrolling log of lifecycle and diagnostic lines.
#[derive(Clone, Debug)]
pub struct DiagnosticLog {
    lines: VecDeque<String>,
    capacity: usize,
}

impl DiagnosticLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append `<wallclock>  <kind>  <text>`, dropping the oldest line when full.
    pub fn push(&mut self, kind: &str, text: &str) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        let stamp = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.6f");
        self.lines
            .push_back(format!("{stamp}  {kind:24}  {}", truncate_text(text)));
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> + '_ {
        self.lines.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

fn truncate_text(text: &str) -> String {
    if text.chars().count() <= MAX_LOG_TEXT {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(MAX_LOG_TEXT - 3).collect();
    cut.push_str("...");
    cut
}

/// Read-only snapshot for the display.
#[derive(Clone, Debug, Default)]
pub struct RenderState {
    /// Live window, oldest first.
    pub window: Vec<Record>,
    /// Partition syncs in start order.
    pub syncs: Vec<SyncProgress>,
    pub log: Vec<String>,
    /// Snapshot reports chosen for the report panels; `None` marks an empty slot.
    pub report_slots: Vec<Option<DeviceReport>>,
}

/// Shared, swappable render snapshot. Readers never block the consumer for long.
#[derive(Clone, Debug, Default)]
pub struct SharedRenderState {
    inner: Arc<RwLock<Arc<RenderState>>>,
}

impl SharedRenderState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest published snapshot.
    pub fn load(&self) -> Arc<RenderState> {
        Arc::clone(&*self.inner.read())
    }

    pub fn publish(&self, state: RenderState) {
        *self.inner.write() = Arc::new(state);
    }
}

/// Drains the bridge, keeping the live window, sync progress and log current.
pub struct DisplayConsumer {
    settings: DisplaySettings,
    window: LiveWindow,
    reports: ReportIndex,
    store: StoreHandle,
    syncs: Vec<SyncProgress>,
    log: DiagnosticLog,
    last_tick: Instant,
}

impl DisplayConsumer {
    pub fn new(settings: DisplaySettings, window: LiveWindow, reports: ReportIndex, store: StoreHandle) -> Self {
        let log = DiagnosticLog::new(settings.log_lines);
        Self {
            settings,
            window,
            reports,
            store,
            syncs: Vec::new(),
            log,
            last_tick: Instant::now(),
        }
    }

    /// Apply one bridge item. Never blocks on I/O.
    pub fn handle(&mut self, item: BridgeItem) -> Result<()> {
        match item {
            BridgeItem::Record(record) => {
                if record.kind == kinds::PROBLEM || record.kind == kinds::SHUTDOWN {
                    info!(
                        identity = %record.identity,
                        source = %record.source,
                        kind = %record.kind,
                        summary = %record.summary,
                        "fleet event"
                    );
                }
                self.window.consider(&record);
                self.store.append_live(record)?;
            }
            BridgeItem::Report(report) => {
                if self.reports.offer(report.clone()) {
                    debug!(device = %report.device, kind = ?report.kind, "newer report");
                    self.store.write_report(report)?;
                }
            }
            BridgeItem::Lifecycle(event) => self.handle_lifecycle(event),
            BridgeItem::Diagnostic(record) => self.handle_diagnostic(&record),
        }
        Ok(())
    }

    fn handle_lifecycle(&mut self, event: SyncLifecycleEvent) {
        let now = Instant::now();
        match event {
            SyncLifecycleEvent::Start { partition_key } => {
                self.syncs.retain(|s| s.partition_key != partition_key);
                let progress = SyncProgress::start(&partition_key, now);
                self.log.push("sync.start", &progress.name);
                self.syncs.push(progress);
            }
            SyncLifecycleEvent::Complete {
                partition_key,
                records,
                ..
            } => {
                let admitted = self.window.consider_all(records.iter());
                debug!(partition = %partition_key, admitted, "partition reached window");
                if let Some(progress) = self.progress_mut(&partition_key) {
                    progress.finished = Some(now);
                }
                self.log.push("sync.complete", partition_name(&partition_key));
            }
        }
    }

    fn handle_diagnostic(&mut self, record: &Record) {
        if record.kind == DiagnosticKind::SyncProblem.type_name() {
            let key = record
                .other_fields
                .get("partition_key")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            if let Some(progress) = self.progress_mut(key) {
                progress.finished = Some(Instant::now());
                progress.failed = true;
            }
        }
        self.log.push(short_kind(&record.kind), &record.summary);
    }

    fn progress_mut(&mut self, partition_key: &str) -> Option<&mut SyncProgress> {
        self.syncs
            .iter_mut()
            .find(|s| s.partition_key == partition_key)
    }

    /// Periodic work: ask the store to flush if due.
    pub fn tick(&mut self, now: Instant) -> Result<()> {
        self.last_tick = now;
        self.store.flush_if_due()
    }

    pub fn render_state(&self) -> RenderState {
        let report_slots = self
            .reports
            .select_devices(&self.settings.snaps, self.settings.report_slots)
            .into_iter()
            .map(|device| {
                device.and_then(|d| self.reports.latest(ReportKind::Snapshot, &d).cloned())
            })
            .collect();
        RenderState {
            window: self.window.records(),
            syncs: self.syncs.clone(),
            log: self.log.lines().map(str::to_string).collect(),
            report_slots,
        }
    }

    pub fn window(&self) -> &LiveWindow {
        &self.window
    }

    pub fn log(&self) -> &DiagnosticLog {
        &self.log
    }

    /// Consume `receiver` until cancelled or every producer is gone,
    /// publishing a fresh snapshot after each batch.
    pub fn run(mut self, receiver: BridgeReceiver, cancel: &CancelToken, publish: &SharedRenderState) -> Result<()> {
        let tick = self.settings.tick();
        publish.publish(self.render_state());

        while !cancel.is_cancelled() {
            let wait = tick
                .saturating_sub(self.last_tick.elapsed())
                .min(crate::cancel::POLL_INTERVAL * 4);
            match receiver.recv_timeout(wait) {
                Ok(Some(item)) => {
                    self.handle(item)?;
                    for item in receiver.drain_available(MAX_BATCH) {
                        self.handle(item)?;
                    }
                    publish.publish(self.render_state());
                }
                Ok(None) => {}
                Err(WatchError::Disconnected(_)) => break,
                Err(e) => return Err(e),
            }

            let now = Instant::now();
            if now.saturating_duration_since(self.last_tick) >= tick {
                self.tick(now)?;
                publish.publish(self.render_state());
            }
        }

        // Hand over whatever is still queued before the store flushes.
        for item in receiver.drain_available(usize::MAX) {
            self.handle(item)?;
        }
        publish.publish(self.render_state());
        debug!("display consumer stopped");
        Ok(())
    }
}
