//! Settings tree for the monitor.
//!
//! Every section carries `#[serde(default)]`, so a config file only needs the
//! keys it wants to override. Creating config files is left to the caller.

use crate::error::{Result, WatchError};
use crate::types::kinds;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const RELATIVE_APP_PATH: &str = "gridworks/debug-cli/events";
const CONFIG_FILE: &str = "gwd.events.config.json";
const STORE_FILE: &str = "events.csv";
const LOG_FILE: &str = "events.log";

/// Upper bound on either reconnect delay, in seconds.
pub const MAX_RECONNECT_DELAY_SECS: f64 = 86_400.0;

/// Filesystem locations.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Paths {
    pub config_path: PathBuf,
    /// Durable record table.
    pub store_path: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        let config_base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        let state_base = dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            config_path: config_base.join(RELATIVE_APP_PATH).join(CONFIG_FILE),
            store_path: state_base.join(RELATIVE_APP_PATH).join(STORE_FILE),
        }
    }
}

impl Paths {
    /// Paths rooted at a single data directory.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            config_path: dir.join(CONFIG_FILE),
            store_path: dir.join(STORE_FILE),
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.store_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn status_dir(&self) -> PathBuf {
        self.data_dir().join("status")
    }

    pub fn snap_dir(&self) -> PathBuf {
        self.data_dir().join("snap")
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir().join(LOG_FILE)
    }

    /// Local copy target for a synced partition.
    pub fn partition_dir(&self, partition: &str) -> PathBuf {
        self.data_dir().join(partition)
    }

    /// Per-partition summary table.
    pub fn partition_table_path(&self, partition: &str) -> PathBuf {
        self.data_dir().join(format!("{partition}.csv"))
    }

    /// Whether a remote partition name can be copied and summarized locally
    /// without touching the store, its lock or temp files, the log, or the
    /// side-file directories.
    pub fn is_safe_partition(&self, partition: &str) -> bool {
        if partition.is_empty()
            || partition == "."
            || partition == ".."
            || partition.contains(['/', '\\'])
        {
            return false;
        }
        let reserved = [
            self.store_path.clone(),
            with_suffix(&self.store_path, ".lock"),
            with_suffix(&self.store_path, ".tmp"),
            self.log_path(),
            self.status_dir(),
            self.snap_dir(),
        ];
        let dir = self.partition_dir(partition);
        let table = self.partition_table_path(partition);
        let table_tmp = with_suffix(&table, ".tmp");
        !reserved
            .iter()
            .any(|path| *path == dir || *path == table || *path == table_tmp)
    }

    /// Create the data, status and snapshot directories.
    pub fn create_dirs(&self) -> Result<()> {
        fs::create_dir_all(self.data_dir())?;
        fs::create_dir_all(self.status_dir())?;
        fs::create_dir_all(self.snap_dir())?;
        Ok(())
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Pub/sub broker connection.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttSettings {
    pub hostname: String,
    pub port: u16,
    /// Keepalive in seconds.
    pub keepalive: u64,
    pub client_id: String,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: String,
    pub topic: String,
    /// Seconds.
    pub reconnect_min_delay: f64,
    /// Seconds.
    pub reconnect_max_delay: f64,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            port: 1883,
            keepalive: 60,
            client_id: format!("fleetwatch-{}", std::process::id()),
            username: None,
            password: String::new(),
            topic: "gw/#".to_string(),
            reconnect_min_delay: 1.0,
            reconnect_max_delay: 120.0,
        }
    }
}

impl MqttSettings {
    pub fn min_delay(&self) -> Duration {
        delay_from_secs(self.reconnect_min_delay)
    }

    pub fn max_delay(&self) -> Duration {
        delay_from_secs(self.reconnect_max_delay)
    }
}

/// Seconds clamped to `0..=MAX_RECONNECT_DELAY_SECS`; NaN reads as zero.
fn delay_from_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.clamp(0.0, MAX_RECONNECT_DELAY_SECS)).unwrap_or(Duration::ZERO)
}

/// Archive bucket location.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Settings {
    pub bucket: String,
    pub prefix: String,
    pub profile: String,
    pub region: String,
}

impl S3Settings {
    /// Remote prefix of one partition.
    pub fn subprefix(&self, partition: &str) -> String {
        format!("{}/{}", self.prefix.trim_end_matches('/'), partition)
    }

    /// `<bucket>/<prefix>/<partition>`, the key reported in lifecycle events.
    pub fn synced_key(&self, partition: &str) -> String {
        format!("{}/{}", self.bucket, self.subprefix(partition))
    }
}

/// Historical sync.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub enabled: bool,
    pub s3: S3Settings,
    /// Number of most-recent partitions to sync.
    pub num_dirs_to_sync: usize,
    /// Inclusion filter passed to the bulk copy.
    pub include_pattern: String,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            s3: S3Settings::default(),
            num_dirs_to_sync: 4,
            include_pattern: "*event*".to_string(),
        }
    }
}

/// Live window and display feed.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    /// Live window capacity.
    pub displayed_events: usize,
    /// Source-name substrings; empty admits all sources.
    pub sources: Vec<String>,
    pub excluded_kinds: Vec<String>,
    /// Devices requested for the report panels.
    pub snaps: Vec<String>,
    pub report_slots: usize,
    /// Diagnostic log length.
    pub log_lines: usize,
    pub tick_millis: u64,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            displayed_events: 45,
            sources: Vec::new(),
            excluded_kinds: kinds::UNDISPLAYED.iter().map(|k| k.to_string()).collect(),
            snaps: Vec::new(),
            report_slots: 2,
            log_lines: 200,
            tick_millis: 1000,
        }
    }
}

impl DisplaySettings {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis.max(1))
    }
}

/// Durable store behaviour.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Flush once the live buffer grows past this many records.
    pub flush_threshold: usize,
    /// Flush at least this often while records are buffered.
    pub flush_seconds: u64,
    pub read_only: bool,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            flush_threshold: 100,
            flush_seconds: 60,
            read_only: false,
        }
    }
}

/// Top-level settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub verbosity: u8,
    pub paths: Paths,
    pub mqtt: MqttSettings,
    pub sync: SyncSettings,
    pub display: DisplaySettings,
    pub store: StoreSettings,
}

impl Settings {
    /// Load settings from a JSON file, falling back to defaults if it does not exist.
    pub fn load(config_path: impl AsRef<Path>) -> Result<Self> {
        let config_path = config_path.as_ref();
        let mut settings = if config_path.exists() {
            let text = fs::read_to_string(config_path)?;
            serde_json::from_str::<Settings>(&text)
                .map_err(|e| WatchError::Config(format!("{}: {e}", config_path.display())))?
        } else {
            Settings::default()
        };
        settings.paths.config_path = config_path.to_path_buf();
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, secs) in [
            ("reconnect_min_delay", self.mqtt.reconnect_min_delay),
            ("reconnect_max_delay", self.mqtt.reconnect_max_delay),
        ] {
            if !secs.is_finite() || secs > MAX_RECONNECT_DELAY_SECS {
                return Err(WatchError::Config(format!(
                    "mqtt.{name} must be a finite number of seconds up to {MAX_RECONNECT_DELAY_SECS}, got {secs}"
                )));
            }
        }
        if self.mqtt.reconnect_min_delay <= 0.0 {
            return Err(WatchError::Config(
                "mqtt.reconnect_min_delay must be positive".into(),
            ));
        }
        if self.mqtt.reconnect_min_delay > self.mqtt.reconnect_max_delay {
            return Err(WatchError::Config(format!(
                "mqtt.reconnect_min_delay ({}) exceeds reconnect_max_delay ({})",
                self.mqtt.reconnect_min_delay, self.mqtt.reconnect_max_delay
            )));
        }
        if self.display.displayed_events == 0 {
            return Err(WatchError::Config(
                "display.displayed_events must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
