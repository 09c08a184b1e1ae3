//! CSV record table.

use crate::error::{Result, WatchError};
use crate::types::{Identity, Record, TimestampNs};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Column order of every table file. The first column is the index.
pub const TABLE_COLUMNS: [&str; 6] = [
    "timestamp_ns",
    "identity",
    "source",
    "kind",
    "summary",
    "other_fields",
];

/// One table row, with `other_fields` collapsed to JSON text.
#[derive(Debug, Serialize, Deserialize)]
struct Row {
    timestamp_ns: i64,
    identity: String,
    source: String,
    kind: String,
    summary: String,
    other_fields: String,
}

impl From<&Record> for Row {
    fn from(record: &Record) -> Self {
        Self {
            timestamp_ns: record.timestamp.0,
            identity: record.identity.0.clone(),
            source: record.source.clone(),
            kind: record.kind.clone(),
            summary: record.summary.clone(),
            other_fields: record.other_fields_json(),
        }
    }
}

impl From<Row> for Record {
    fn from(row: Row) -> Self {
        let other_fields = if row.other_fields.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&row.other_fields).unwrap_or(Value::String(row.other_fields))
        };
        Record {
            identity: Identity(row.identity),
            timestamp: TimestampNs(row.timestamp_ns),
            kind: row.kind,
            source: row.source,
            summary: row.summary,
            other_fields,
        }
    }
}

/// Read every row of a table file, in file order.
///
/// A missing file reads as an empty table.
pub fn read_table(path: impl AsRef<Path>) -> Result<Vec<Record>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Vec::new());
    }

    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    for column in TABLE_COLUMNS {
        if !headers.iter().any(|h| h == column) {
            return Err(WatchError::InvalidFormat(format!(
                "{}: missing column {column}",
                path.display()
            )));
        }
    }

    let mut records = Vec::new();
    for (line, row) in reader.deserialize::<Row>().enumerate() {
        let row = row.map_err(|e| {
            WatchError::InvalidFormat(format!("{} row {}: {e}", path.display(), line + 1))
        })?;
        records.push(Record::from(row));
    }
    Ok(records)
}

/// Replace a table file with `records`, written in the given order.
///
/// Writes to a sibling temp file and renames it over the target, so a failed
/// write leaves the previous table intact.
pub fn write_table(path: impl AsRef<Path>, records: &[Record]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp = temp_path(path);
    {
        let file = File::create(&tmp)?;
        let mut writer = csv::Writer::from_writer(BufWriter::new(file));
        if records.is_empty() {
            writer.write_record(TABLE_COLUMNS)?;
        }
        for record in records {
            writer.serialize(Row::from(record))?;
        }
        let mut inner = writer
            .into_inner()
            .map_err(|e| WatchError::Io(std::io::Error::other(e.to_string())))?;
        inner.flush()?;
        inner.get_ref().sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
