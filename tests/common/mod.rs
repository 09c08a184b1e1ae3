//! Shared fakes for fleetwatch integration tests.
//!
//! Import from integration test files with:
//! ```ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use fleetwatch::{
    ArchiveLister, BulkCopy, CancelToken, ListPage, Paths, Record, Result, Settings, SyncPartition,
    TimestampNs, Transport, TransportEvent, WatchError,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// JSON payload for a bare structured event.
pub fn event_json(id: &str, time_ns: i64, kind: &str, src: &str) -> Value {
    json!({
        "MessageId": id,
        "TimeNS": time_ns,
        "TypeName": kind,
        "Src": src,
        "Summary": format!("summary of {id}"),
    })
}

pub fn problem(id: &str, time_ns: i64) -> Record {
    Record::new(
        id,
        TimestampNs(time_ns),
        "gridworks.event.problem",
        "hw1.isone.scada",
        json!({"Summary": id}),
    )
}

/// Settings rooted at `dir` with fast flushing and ticking.
pub fn test_settings(dir: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.paths = Paths::in_dir(dir);
    settings.mqtt.reconnect_min_delay = 0.01;
    settings.mqtt.reconnect_max_delay = 0.05;
    settings.display.tick_millis = 20;
    settings.store.flush_seconds = 1;
    settings.sync.s3.bucket = "archive".to_string();
    settings.sync.s3.prefix = "eventstore".to_string();
    settings
}

/// Plays back a fixed event script, then idles until disconnected.
pub struct ScriptedTransport {
    script: VecDeque<Result<TransportEvent>>,
    pub connects: Arc<Mutex<usize>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Result<TransportEvent>>) -> Self {
        Self {
            script: script.into(),
            connects: Arc::new(Mutex::new(0)),
        }
    }

    /// Connect, subscribe, then deliver each payload on `gw/test`.
    pub fn delivering(payloads: Vec<Vec<u8>>) -> Self {
        let mut script = vec![Ok(TransportEvent::Connected), Ok(TransportEvent::Subscribed)];
        script.extend(payloads.into_iter().map(|payload| {
            Ok(TransportEvent::Message {
                topic: "gw/test".to_string(),
                payload,
            })
        }));
        Self::new(script)
    }
}

impl Transport for ScriptedTransport {
    fn connect(&mut self) -> Result<()> {
        *self.connects.lock() += 1;
        Ok(())
    }

    fn subscribe(&mut self, _topic: &str) -> Result<()> {
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> Result<TransportEvent> {
        match self.script.pop_front() {
            Some(event) => event,
            None => {
                std::thread::sleep(timeout.min(Duration::from_millis(10)));
                Ok(TransportEvent::Idle)
            }
        }
    }

    fn disconnect(&mut self) {}

    fn peer(&self) -> String {
        "scripted:1883".to_string()
    }
}

/// Lists a fixed set of partitions under `eventstore/`.
pub struct FixedLister(pub Vec<&'static str>);

impl ArchiveLister for FixedLister {
    fn list_page(&self, _continuation: Option<&str>) -> Result<ListPage> {
        Ok(ListPage {
            prefixes: self.0.iter().map(|p| format!("eventstore/{p}/")).collect(),
            next_token: None,
            truncated: false,
        })
    }
}

/// Writes preset event files into each partition's destination.
#[derive(Default)]
pub struct FakeCopy {
    files: Vec<(&'static str, &'static str, Value)>,
    fail: Option<&'static str>,
    panic_on: Option<&'static str>,
    pub copied: Arc<Mutex<Vec<String>>>,
}

impl FakeCopy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `file` with `body` to `partition`.
    pub fn with_file(mut self, partition: &'static str, file: &'static str, body: Value) -> Self {
        self.files.push((partition, file, body));
        self
    }

    pub fn failing(mut self, partition: &'static str) -> Self {
        self.fail = Some(partition);
        self
    }

    pub fn panicking(mut self, partition: &'static str) -> Self {
        self.panic_on = Some(partition);
        self
    }
}

impl BulkCopy for FakeCopy {
    fn copy(&self, partition: &SyncPartition, dest: &Path, _cancel: &CancelToken) -> Result<()> {
        self.copied.lock().push(partition.name.clone());
        if self.panic_on == Some(partition.name.as_str()) {
            panic!("copy of {} blew up", partition.name);
        }
        if self.fail == Some(partition.name.as_str()) {
            return Err(WatchError::SyncCopy {
                partition: partition.remote_key.clone(),
                status: "exit status: 1".to_string(),
                stderr: "access denied".to_string(),
            });
        }
        fs::create_dir_all(dest)?;
        for (name, file, body) in &self.files {
            if *name == partition.name {
                fs::write(dest.join(file), body.to_string())?;
            }
        }
        Ok(())
    }
}

/// Poll `check` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    check()
}
