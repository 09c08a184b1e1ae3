//! Core types for the ingestion pipeline.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Type-name prefix shared by every fleet event.
pub const EVENT_PREFIX: &str = "gridworks.event.";

/// Well-known record kinds.
pub mod kinds {
    pub const PROBLEM: &str = "gridworks.event.problem";
    pub const SHUTDOWN: &str = "gridworks.event.shutdown";
    pub const REPORT: &str = "report.event";
    pub const SNAPSHOT: &str = "snapshot.spaceheat";
    pub const SNAPSHOT_EVENT: &str = "gridworks.event.snapshot.spaceheat";
    pub const STATUS: &str = "gridworks.event.gt.sh.status";

    /// Kinds hidden from the live window unless configured otherwise.
    pub const UNDISPLAYED: [&str; 4] = [SNAPSHOT, REPORT, STATUS, SNAPSHOT_EVENT];
}

/// Globally unique message identity, the dedup key.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(pub String);

impl Identity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({})", self.0)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Identity(s.to_string())
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        Identity(s)
    }
}

/// Nanoseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct TimestampNs(pub i64);

impl TimestampNs {
    /// Current wall-clock time. Clamps to zero if the clock is before the epoch.
    pub fn now() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0);
        TimestampNs(nanos)
    }

    pub fn from_millis(ms: i64) -> Self {
        TimestampNs(ms.saturating_mul(1_000_000))
    }

    pub fn as_millis(self) -> i64 {
        self.0 / 1_000_000
    }
}

impl fmt::Debug for TimestampNs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TimestampNs({})", self.0)
    }
}

/// A single unit of event/snapshot history. Never mutated after creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Dedup key.
    pub identity: Identity,

    /// Canonical ordering key.
    pub timestamp: TimestampNs,

    /// Type tag, e.g. `gridworks.event.problem`.
    pub kind: String,

    /// Logical origin name.
    pub source: String,

    /// Human-readable one-liner.
    pub summary: String,

    /// Kind-specific payload.
    pub other_fields: Value,
}

impl Record {
    /// Build a record, deriving the summary from kind-specific fields.
    pub fn new(
        identity: impl Into<Identity>,
        timestamp: TimestampNs,
        kind: impl Into<String>,
        source: impl Into<String>,
        other_fields: Value,
    ) -> Self {
        let kind = kind.into();
        let summary = derive_summary(&kind, &other_fields);
        Self {
            identity: identity.into(),
            timestamp,
            kind,
            source: source.into(),
            summary,
            other_fields,
        }
    }

    /// Replace the derived summary with an explicit one.
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    /// Build a pipeline-internal diagnostic record.
    pub fn diagnostic(
        kind: DiagnosticKind,
        source: impl Into<String>,
        summary: impl Into<String>,
        fields: Value,
    ) -> Self {
        let timestamp = TimestampNs::now();
        let identity = Identity(format!(
            "{}-{}-{}",
            kind.as_str(),
            timestamp.0,
            DIAGNOSTIC_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        Self {
            identity,
            timestamp,
            kind: kind.type_name().to_string(),
            source: source.into(),
            summary: summary.into(),
            other_fields: fields,
        }
    }

    /// Kind with the common namespace prefixes removed, for display.
    pub fn short_kind(&self) -> &str {
        short_kind(&self.kind)
    }

    /// `other_fields` collapsed to a single JSON string for tabular storage.
    pub fn other_fields_json(&self) -> String {
        match &self.other_fields {
            Value::Null => String::new(),
            v => v.to_string(),
        }
    }
}

static DIAGNOSTIC_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Strip `gridworks.event.`, `comm.` and `debug_cli.` namespace prefixes.
pub fn short_kind(kind: &str) -> &str {
    let kind = kind.strip_prefix(EVENT_PREFIX).unwrap_or(kind);
    let kind = kind.strip_prefix("debug_cli.").unwrap_or(kind);
    kind.strip_prefix("comm.").unwrap_or(kind)
}

fn derive_summary(kind: &str, fields: &Value) -> String {
    match kind {
        kinds::SHUTDOWN => {
            let reason = fields.get("Reason").and_then(Value::as_str).unwrap_or("");
            match reason.find('\n') {
                Some(idx) => reason[..idx].trim_end_matches(':').to_string(),
                None => reason.to_string(),
            }
        }
        kinds::PROBLEM => fields
            .get("Summary")
            .and_then(Value::as_str)
            .unwrap_or("")
            .replace('\n', "\\n"),
        _ => match fields {
            Value::Null => String::new(),
            v => v.to_string(),
        },
    }
}

/// Diagnostics produced by the pipeline itself. Forwarded to the display log, never persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    /// Inbound payload could not be decoded.
    ParseException,
    /// Stream transport failed.
    CommException,
    /// Stream reached the subscribed state.
    Subscribed,
    /// Partition listing, copy or merge failed.
    SyncProblem,
    /// Durable store flush or side-file write failed.
    StoreProblem,
}

impl DiagnosticKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticKind::ParseException => "parse-exception",
            DiagnosticKind::CommException => "comm-exception",
            DiagnosticKind::Subscribed => "subscribed",
            DiagnosticKind::SyncProblem => "sync-problem",
            DiagnosticKind::StoreProblem => "store-problem",
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            DiagnosticKind::ParseException => "gridworks.event.debug_cli.mqtt_parse_exception",
            DiagnosticKind::CommException => "gridworks.event.debug_cli.mqtt_exception",
            DiagnosticKind::Subscribed => "gridworks.event.debug_cli.mqtt_fully_subscribed",
            DiagnosticKind::SyncProblem => "gridworks.event.debug_cli.sync.problem",
            DiagnosticKind::StoreProblem => "gridworks.event.debug_cli.store.problem",
        }
    }
}

/// Fields carried by a `comm-exception` diagnostic.
pub fn comm_exception_fields(
    peer: &str,
    was_connected: bool,
    next_delay_secs: f64,
    will_reconnect: bool,
    error: &str,
) -> Value {
    json!({
        "PeerName": peer,
        "was_connected": was_connected,
        "next_delay": next_delay_secs,
        "will_reconnect": will_reconnect,
        "exception": error,
    })
}

/// A named remote archive subdivision, synced as a unit.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SyncPartition {
    /// Last path component of the remote prefix.
    pub name: String,
    /// `<bucket>/<prefix>/<name>`.
    pub remote_key: String,
}

/// Orchestrator progress markers. Forwarded to the display, never persisted.
#[derive(Clone, Debug)]
pub enum SyncLifecycleEvent {
    Start {
        partition_key: String,
    },
    Complete {
        partition_key: String,
        local_path: PathBuf,
        /// Deduplicated records parsed from the partition, oldest first.
        records: Arc<Vec<Record>>,
    },
}

impl SyncLifecycleEvent {
    pub fn partition_key(&self) -> &str {
        match self {
            SyncLifecycleEvent::Start { partition_key }
            | SyncLifecycleEvent::Complete { partition_key, .. } => partition_key,
        }
    }

    /// Last component of the partition key.
    pub fn partition_name(&self) -> &str {
        let key = self.partition_key();
        key.rsplit('/').next().unwrap_or(key)
    }
}

/// Which side-file family a device report belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Snapshot,
    Status,
}

impl ReportKind {
    /// File suffix, e.g. `snap` for `<device>.snap.json`.
    pub fn suffix(&self) -> &'static str {
        match self {
            ReportKind::Snapshot => "snap",
            ReportKind::Status => "status",
        }
    }
}

/// Latest-state report from one device.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceReport {
    pub device: String,
    pub kind: ReportKind,
    /// Report time embedded in the payload, not arrival time.
    pub report_time_ms: i64,
    pub body: Value,
}
