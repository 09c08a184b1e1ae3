//! External bulk copy of one partition into local storage.

use crate::cancel::{CancelToken, POLL_INTERVAL};
use crate::config::SyncSettings;
use crate::error::{Result, WatchError};
use crate::types::SyncPartition;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{debug, warn};

/// Bulk-copy seam. Implementations block until the copy finishes.
pub trait BulkCopy: Send + Sync {
    /// Copy `partition` into `dest`.
    ///
    /// Returns [`WatchError::Cancelled`] if interrupted and
    /// [`WatchError::SyncCopy`] on failure.
    fn copy(&self, partition: &SyncPartition, dest: &Path, cancel: &CancelToken) -> Result<()>;
}

/// Copies with `aws s3 sync`, restricted to the configured include pattern.
#[derive(Clone, Debug)]
pub struct AwsCliCopy {
    settings: SyncSettings,
    program: String,
}

impl AwsCliCopy {
    pub fn new(settings: SyncSettings) -> Self {
        Self {
            settings,
            program: "aws".to_string(),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Arguments for syncing `partition` into `dest`.
    pub fn args(&self, partition: &SyncPartition, dest: &Path) -> Vec<String> {
        let s3 = &self.settings.s3;
        let mut args = vec![
            "s3".to_string(),
            "sync".to_string(),
            format!("s3://{}/{}", s3.bucket, s3.subprefix(&partition.name)),
            dest.display().to_string(),
            "--quiet".to_string(),
        ];
        if !s3.profile.is_empty() {
            args.extend(["--profile".to_string(), s3.profile.clone()]);
        }
        if !s3.region.is_empty() {
            args.extend(["--region".to_string(), s3.region.clone()]);
        }
        if !self.settings.include_pattern.is_empty() {
            args.extend([
                "--exclude".to_string(),
                "*".to_string(),
                "--include".to_string(),
                self.settings.include_pattern.clone(),
            ]);
        }
        args
    }
}

impl BulkCopy for AwsCliCopy {
    fn copy(&self, partition: &SyncPartition, dest: &Path, cancel: &CancelToken) -> Result<()> {
        let mut command = Command::new(&self.program);
        command.args(self.args(partition, dest));
        run_cancellable(command, &partition.remote_key, cancel)
    }
}

/// Run `command` to completion, killing it if `cancel` fires.
///
/// Stderr is captured for the failure report; stdout is discarded.
pub(crate) fn run_cancellable(mut command: Command, partition: &str, cancel: &CancelToken) -> Result<()> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| WatchError::SyncCopy {
            partition: partition.to_string(),
            status: "not started".to_string(),
            stderr: e.to_string(),
        })?;

    // Drain stderr on its own thread so a chatty child cannot fill the pipe.
    let stderr_reader = child.stderr.take().map(|mut pipe| {
        std::thread::spawn(move || {
            let mut text = String::new();
            if let Err(e) = pipe.read_to_string(&mut text) {
                debug!(error = %e, "stderr read failed");
            }
            text
        })
    });
    let collect_stderr = |reader: Option<std::thread::JoinHandle<String>>| {
        reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default()
    };

    loop {
        if cancel.is_cancelled() {
            if let Err(e) = child.kill() {
                warn!(partition, error = %e, "failed to kill bulk copy");
            }
            child.wait()?;
            collect_stderr(stderr_reader);
            return Err(WatchError::Cancelled);
        }
        if let Some(status) = child.try_wait()? {
            let stderr = collect_stderr(stderr_reader);
            if status.success() {
                return Ok(());
            }
            return Err(WatchError::SyncCopy {
                partition: partition.to_string(),
                status: status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}
