//! # Fleetwatch
//!
//! Live event monitor for a fleet of field devices. Ingests a pub/sub event
//! stream, backfills it from the cloud archive, and persists the merged,
//! deduplicated history to a local record table.
//!
//! ## Core Concepts
//!
//! - **Records**: Identity-keyed events, persisted at most once per identity
//! - **Stream client**: Reconnecting subscription with doubling backoff
//! - **Sync**: Newest archive partitions pulled by an external bulk copy and merged
//! - **Bridge**: Per-producer FIFO channel into the single display consumer
//! - **Live window**: Bounded, filtered, time-ordered view of recent records
//!
//! ## Example
//!
//! ```ignore
//! use fleetwatch::{init_logging, Components, LogConfig, Pipeline, Settings};
//!
//! let settings = Settings::load(Settings::default().paths.config_path)?;
//! init_logging(&LogConfig {
//!     verbosity: settings.verbosity,
//!     file: Some(settings.paths.log_path()),
//!     stderr: false,
//! })?;
//!
//! let components = Components::from_settings(&settings);
//! let pipeline = Pipeline::start(settings, components)?;
//!
//! // Render from another thread
//! let state = pipeline.render_state();
//! println!("{} records in view", state.window.len());
//!
//! pipeline.cancel();
//! pipeline.join()?;
//! ```

pub mod bridge;
pub mod cancel;
pub mod codec;
pub mod config;
pub mod consumer;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod records;
pub mod reports;
pub mod store;
pub mod stream;
pub mod sync;
pub mod types;
pub mod window;
pub mod worker;

// Re-exports
pub use bridge::{bridge, BridgeItem, BridgeReceiver, BridgeSender};
pub use cancel::CancelToken;
pub use codec::{decode_inbound, Codec, DecodeError, Inbound, JsonCodec, Message};
pub use config::{
    DisplaySettings, MqttSettings, Paths, S3Settings, Settings, StoreSettings, SyncSettings,
};
pub use consumer::{DiagnosticLog, DisplayConsumer, RenderState, SharedRenderState, SyncProgress};
pub use error::{Result, WatchError};
pub use logging::{init_logging, LogConfig, LogError};
pub use pipeline::{Components, Pipeline, PipelineHandle};
pub use records::{read_table, write_table, IdentityIndex};
pub use reports::ReportIndex;
pub use store::{FlushOutcome, MergeOutcome, RecordStore, StoreConfig};
pub use stream::{Backoff, MqttTransport, StreamClient, StreamConfig, StreamState, Transport, TransportEvent};
pub use sync::{
    ArchiveLister, AwsCliCopy, AwsCliLister, BulkCopy, ListPage, SyncOrchestrator, SyncSummary,
};
pub use types::*;
pub use window::{LiveWindow, WindowFilter};
pub use worker::{StoreHandle, StoreWorker};
