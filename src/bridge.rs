//! Cross-context forwarding from producers to the single display consumer.
//!
//! Producers (stream client, sync orchestrator, store worker) hold cloned
//! [`BridgeSender`]s and never block on send. Exactly one consumer owns the
//! [`BridgeReceiver`]. Items from one sender arrive in send order; items from
//! different senders interleave in no guaranteed order.

use crate::error::{Result, WatchError};
use crate::types::{DeviceReport, Record, SyncLifecycleEvent};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

/// Everything the consumer can receive.
#[derive(Clone, Debug)]
pub enum BridgeItem {
    /// A fleet record for the store and the live window.
    Record(Record),
    /// A device snapshot or status report.
    Report(DeviceReport),
    /// Sync orchestrator progress.
    Lifecycle(SyncLifecycleEvent),
    /// A pipeline diagnostic for the log; never persisted.
    Diagnostic(Record),
}

/// Create a connected sender/receiver pair.
pub fn bridge() -> (BridgeSender, BridgeReceiver) {
    let (tx, rx) = unbounded();
    (BridgeSender { tx }, BridgeReceiver { rx })
}

/// Producer side. Cheap to clone.
#[derive(Clone, Debug)]
pub struct BridgeSender {
    tx: Sender<BridgeItem>,
}

impl BridgeSender {
    /// Enqueue an item. Fails only once the consumer is gone.
    pub fn send(&self, item: BridgeItem) -> Result<()> {
        self.tx
            .send(item)
            .map_err(|_| WatchError::Disconnected("bridge consumer"))
    }

    pub fn record(&self, record: Record) -> Result<()> {
        self.send(BridgeItem::Record(record))
    }

    pub fn report(&self, report: DeviceReport) -> Result<()> {
        self.send(BridgeItem::Report(report))
    }

    pub fn lifecycle(&self, event: SyncLifecycleEvent) -> Result<()> {
        self.send(BridgeItem::Lifecycle(event))
    }

    pub fn diagnostic(&self, record: Record) -> Result<()> {
        self.send(BridgeItem::Diagnostic(record))
    }
}

/// Consumer side. Not cloneable: there is exactly one consumer.
#[derive(Debug)]
pub struct BridgeReceiver {
    rx: Receiver<BridgeItem>,
}

impl BridgeReceiver {
    /// Wait up to `timeout` for the next item.
    ///
    /// Returns `Ok(None)` on timeout and an error once every sender is gone
    /// and the queue is empty.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<BridgeItem>> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Ok(Some(item)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(WatchError::Disconnected("bridge producers"))
            }
        }
    }

    /// Take up to `max` items that are already queued, without waiting.
    pub fn drain_available(&self, max: usize) -> Vec<BridgeItem> {
        self.rx.try_iter().take(max).collect()
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}
