//! Latest device snapshot/status reports and their side files.
//!
//! Each device has at most one side file per report kind,
//! `<snap_dir>/<device>.snap.json` or `<status_dir>/<device>.status.json`.
//! A report replaces the stored one only if its embedded report time is
//! strictly newer; arrival order does not matter.

use crate::config::Paths;
use crate::error::Result;
use crate::types::{DeviceReport, ReportKind};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// In-memory index of the newest report per device and kind.
///
/// Owned explicitly by whoever needs it; reload with [`rescan`](Self::rescan).
#[derive(Clone, Debug)]
pub struct ReportIndex {
    snap_dir: PathBuf,
    status_dir: PathBuf,
    latest: HashMap<(ReportKind, String), DeviceReport>,
}

impl ReportIndex {
    /// Empty index over the side-file directories of `paths`.
    pub fn new(paths: &Paths) -> Self {
        Self {
            snap_dir: paths.snap_dir(),
            status_dir: paths.status_dir(),
            latest: HashMap::new(),
        }
    }

    /// Build an index from the side files on disk.
    pub fn load(paths: &Paths) -> Result<Self> {
        let mut index = Self::new(paths);
        index.rescan()?;
        Ok(index)
    }

    /// Re-read every side file, keeping in-memory reports that are newer.
    ///
    /// Unreadable files are logged and skipped. Returns the number of files read.
    pub fn rescan(&mut self) -> Result<usize> {
        let mut loaded = 0;
        for kind in [ReportKind::Snapshot, ReportKind::Status] {
            let dir = self.dir_for(kind).to_path_buf();
            if !dir.exists() {
                continue;
            }
            let suffix = format!(".{}.json", kind.suffix());
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                let is_side_file = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(&suffix));
                if !is_side_file {
                    continue;
                }
                match read_report(&path) {
                    Ok(report) => {
                        self.offer(report);
                        loaded += 1;
                    }
                    Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable report"),
                }
            }
        }
        debug!(loaded, "rescanned report side files");
        Ok(loaded)
    }

    /// Keep `report` if it is newer than the one held for its device.
    ///
    /// Returns `true` if the index changed.
    pub fn offer(&mut self, report: DeviceReport) -> bool {
        let key = (report.kind, report.device.clone());
        match self.latest.get(&key) {
            Some(held) if held.report_time_ms >= report.report_time_ms => false,
            _ => {
                self.latest.insert(key, report);
                true
            }
        }
    }

    pub fn latest(&self, kind: ReportKind, device: &str) -> Option<&DeviceReport> {
        self.latest.get(&(kind, device.to_string()))
    }

    /// Devices with a report of `kind`, most recently reported first.
    pub fn devices(&self, kind: ReportKind) -> Vec<&str> {
        let mut reports: Vec<&DeviceReport> = self
            .latest
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, r)| r)
            .collect();
        reports.sort_by(|a, b| {
            b.report_time_ms
                .cmp(&a.report_time_ms)
                .then_with(|| a.device.cmp(&b.device))
        });
        reports.into_iter().map(|r| r.device.as_str()).collect()
    }

    /// Choose snapshot devices for the display's report slots.
    ///
    /// Devices matching a requested substring come first, in request order.
    /// Remaining slots are filled with the most recently reporting devices,
    /// then with `None`.
    pub fn select_devices(&self, requested: &[String], slots: usize) -> Vec<Option<String>> {
        let known = self.devices(ReportKind::Snapshot);
        let mut selected: Vec<Option<String>> = Vec::new();
        for wanted in requested {
            for device in &known {
                let device = Some(device.to_string());
                if device.as_deref().is_some_and(|d| d.contains(wanted.as_str()))
                    && !selected.contains(&device)
                {
                    selected.push(device);
                }
            }
        }
        let mut spare = known.iter().map(|d| Some(d.to_string()));
        while selected.len() < slots {
            match spare.find(|d| !selected.contains(d)) {
                Some(device) => selected.push(device),
                None => selected.push(None),
            }
        }
        selected
    }

    fn dir_for(&self, kind: ReportKind) -> &Path {
        match kind {
            ReportKind::Snapshot => &self.snap_dir,
            ReportKind::Status => &self.status_dir,
        }
    }

    /// Side-file path for a device report.
    pub fn side_file_path(&self, kind: ReportKind, device: &str) -> PathBuf {
        side_file_path(self.dir_for(kind), kind, device)
    }
}

fn side_file_path(dir: &Path, kind: ReportKind, device: &str) -> PathBuf {
    let safe: String = device
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    dir.join(format!("{safe}.{}.json", kind.suffix()))
}

fn read_report(path: &Path) -> Result<DeviceReport> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Write `report` to its side file unless the stored report is as new or newer.
///
/// Returns `true` if the file was written.
pub fn write_if_newer(paths: &Paths, report: &DeviceReport) -> Result<bool> {
    let dir = match report.kind {
        ReportKind::Snapshot => paths.snap_dir(),
        ReportKind::Status => paths.status_dir(),
    };
    let path = side_file_path(&dir, report.kind, &report.device);
    if path.exists() {
        match read_report(&path) {
            Ok(stored) if stored.report_time_ms >= report.report_time_ms => return Ok(false),
            Ok(_) => {}
            Err(e) => warn!(path = %path.display(), error = %e, "replacing unreadable report"),
        }
    }

    fs::create_dir_all(&dir)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_string_pretty(report)?)?;
    fs::rename(&tmp, &path)?;
    Ok(true)
}
