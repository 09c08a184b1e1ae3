//! Supervisor that starts every task under one cancellation token.

use crate::bridge::bridge;
use crate::cancel::CancelToken;
use crate::codec::{Codec, JsonCodec};
use crate::config::Settings;
use crate::consumer::{DisplayConsumer, RenderState, SharedRenderState};
use crate::error::{Result, WatchError};
use crate::reports::ReportIndex;
use crate::store::{RecordStore, StoreConfig};
use crate::stream::{MqttTransport, StreamClient, StreamConfig, Transport};
use crate::sync::{ArchiveLister, AwsCliCopy, AwsCliLister, BulkCopy, SyncOrchestrator};
use crate::window::{LiveWindow, WindowFilter};
use crate::worker::StoreWorker;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// External collaborators the pipeline drives.
pub struct Components {
    pub transport: Box<dyn Transport>,
    pub codec: Arc<dyn Codec>,
    pub lister: Box<dyn ArchiveLister>,
    pub copier: Box<dyn BulkCopy>,
}

impl Components {
    /// MQTT transport, JSON codec and the `aws` CLI for the archive.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            transport: Box::new(MqttTransport::new(settings.mqtt.clone())),
            codec: Arc::new(JsonCodec),
            lister: Box::new(AwsCliLister::new(settings.sync.s3.clone())),
            copier: Box::new(AwsCliCopy::new(settings.sync.clone())),
        }
    }
}

struct Task {
    name: &'static str,
    join: JoinHandle<Result<()>>,
}

/// Entry point for a running pipeline.
pub struct Pipeline;

impl Pipeline {
    /// Open the store and start the store worker, stream client, sync
    /// orchestrator and display consumer.
    ///
    /// The stream client and sync orchestrator stop on their own if they
    /// fail; a failed display consumer cancels the whole pipeline.
    pub fn start(settings: Settings, components: Components) -> Result<PipelineHandle> {
        settings.validate()?;
        if !settings.store.read_only {
            settings.paths.create_dirs()?;
        }

        let store = RecordStore::open(StoreConfig::from_settings(&settings))?;
        let mut window = LiveWindow::new(
            settings.display.displayed_events,
            WindowFilter::from_settings(&settings.display),
        );
        window.consider_all(store.records());
        let reports = ReportIndex::load(&settings.paths)?;
        info!(
            records = store.records().len(),
            window = window.len(),
            path = %store.path().display(),
            "store loaded"
        );

        let cancel = CancelToken::new();
        let render = SharedRenderState::new();
        let (tx, rx) = bridge();

        // The store worker outlives the other tasks: it exits once every
        // handle is gone, after the consumer has handed over its last records.
        let (store, store_join) =
            StoreWorker::spawn(store, settings.paths.clone(), tx.clone(), CancelToken::new())?;

        let mut tasks = Vec::new();
        let Components {
            mut transport,
            codec,
            lister,
            copier,
        } = components;

        {
            let tx = tx.clone();
            let codec = Arc::clone(&codec);
            let cancel_for_task = cancel.clone();
            let config = StreamConfig::from_settings(&settings.mqtt);
            tasks.push(spawn_task("stream-client", &cancel, false, move || {
                StreamClient::new(config).run(transport.as_mut(), codec.as_ref(), &tx, &cancel_for_task)
            })?);
        }

        {
            let orchestrator = SyncOrchestrator::new(
                settings.sync.clone(),
                settings.paths.clone(),
                lister,
                copier,
                codec,
                store.clone(),
                tx.clone(),
            );
            let cancel_for_task = cancel.clone();
            tasks.push(spawn_task("sync", &cancel, false, move || {
                match orchestrator.run(&cancel_for_task) {
                    Ok(summary) => {
                        info!(
                            completed = summary.completed.len(),
                            failed = summary.failed.len(),
                            "historical sync finished"
                        );
                        Ok(())
                    }
                    Err(e) if e.is_recoverable() => {
                        warn!(error = %e, "historical sync abandoned");
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            })?);
        }

        {
            let consumer = DisplayConsumer::new(settings.display.clone(), window, reports, store);
            let cancel_for_task = cancel.clone();
            let render = render.clone();
            tasks.push(spawn_task("display-consumer", &cancel, true, move || {
                consumer.run(rx, &cancel_for_task, &render)
            })?);
        }
        drop(tx);

        Ok(PipelineHandle {
            cancel,
            render,
            tasks,
            store_join,
        })
    }
}

fn spawn_task<F>(name: &'static str, cancel: &CancelToken, cancel_on_failure: bool, body: F) -> Result<Task>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    let cancel = cancel.clone();
    let join = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let result = body();
            match &result {
                Ok(()) => debug!(task = name, "task finished"),
                Err(WatchError::Disconnected(_) | WatchError::Cancelled) if cancel.is_cancelled() => {
                    debug!(task = name, "task stopped by cancellation");
                    return Ok(());
                }
                Err(e) => {
                    error!(task = name, error = %e, "task failed");
                    if cancel_on_failure {
                        cancel.cancel();
                    }
                }
            }
            result
        })?;
    Ok(Task { name, join })
}

/// Handle to a running pipeline.
pub struct PipelineHandle {
    cancel: CancelToken,
    render: SharedRenderState,
    tasks: Vec<Task>,
    store_join: JoinHandle<Result<()>>,
}

impl PipelineHandle {
    /// Latest snapshot published by the display consumer.
    pub fn render_state(&self) -> Arc<RenderState> {
        self.render.load()
    }

    /// Shared render snapshot, for a display running on another thread.
    pub fn shared_render_state(&self) -> SharedRenderState {
        self.render.clone()
    }

    /// Stop every task. In-flight bulk copies are killed.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Whether every task except the store worker has exited.
    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(|task| task.join.is_finished())
    }

    /// Wait for every task, the store worker last.
    ///
    /// Returns the first task failure, if any.
    pub fn join(self) -> Result<()> {
        let mut first_error = None;
        for task in self.tasks {
            if let Err(e) = join_task(task.name, task.join) {
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = join_task("store-worker", self.store_join) {
            error!(error = %e, "store worker failed");
            first_error.get_or_insert(e);
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn join_task(name: &str, join: JoinHandle<Result<()>>) -> Result<()> {
    match join.join() {
        Ok(result) => result,
        Err(_) => {
            error!(task = name, "task panicked");
            Err(WatchError::Fatal(format!("{name} panicked")))
        }
    }
}
