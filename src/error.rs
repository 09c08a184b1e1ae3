//! Error types for the ingestion pipeline.

use thiserror::Error;

/// Main error type for pipeline operations.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Store is locked by another process")]
    Locked,

    #[error("Store is open read-only")]
    ReadOnly,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Decode error on topic {topic}: {reason}")]
    Decode { topic: String, reason: String },

    #[error("Partition listing failed: {0}")]
    Listing(String),

    #[error("Sync of {partition} failed ({status}): {stderr}")]
    SyncCopy {
        partition: String,
        status: String,
        stderr: String,
    },

    #[error("Merge of {partition} failed: {source}")]
    Merge {
        partition: String,
        #[source]
        source: Box<WatchError>,
    },

    #[error("Channel disconnected: {0}")]
    Disconnected(&'static str),

    #[error("Cancelled")]
    Cancelled,

    #[error("Fatal: {0}")]
    Fatal(String),
}

impl WatchError {
    /// Whether the owning task may keep running after reporting this error.
    ///
    /// Transport, decode, sync-copy and merge failures are reported and
    /// survived. Everything else terminates the task that produced it.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            WatchError::Transport(_)
                | WatchError::Decode { .. }
                | WatchError::Listing(_)
                | WatchError::SyncCopy { .. }
                | WatchError::Merge { .. }
        )
    }

    pub(crate) fn merge(partition: impl Into<String>, source: WatchError) -> Self {
        WatchError::Merge {
            partition: partition.into(),
            source: Box::new(source),
        }
    }
}

impl From<serde_json::Error> for WatchError {
    fn from(e: serde_json::Error) -> Self {
        WatchError::Serialization(e.to_string())
    }
}

impl From<csv::Error> for WatchError {
    fn from(e: csv::Error) -> Self {
        if e.is_io_error() {
            match e.into_kind() {
                csv::ErrorKind::Io(io) => WatchError::Io(io),
                other => WatchError::Deserialization(format!("{other:?}")),
            }
        } else {
            WatchError::Deserialization(e.to_string())
        }
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, WatchError>;
