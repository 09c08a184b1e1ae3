//! Partition parse and per-partition summary table.

use crate::codec::{decode_inbound, Codec, Inbound};
use crate::error::Result;
use crate::records::{dedup_keep_first, write_table};
use crate::types::Record;
use std::fs;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// Records parsed from one partition directory.
#[derive(Clone, Debug, Default)]
pub struct ParsedPartition {
    /// Unique by identity, oldest first.
    pub records: Vec<Record>,
    /// JSON files read.
    pub files: usize,
    /// Files that did not decode as an event.
    pub skipped: usize,
}

/// Parse every `*.json` file under `dir` into records.
///
/// Files are visited in path order and the first record per identity is
/// kept. Undecodable files are counted and skipped; I/O errors abort. A
/// missing directory parses as empty.
pub fn parse_partition_dir(dir: &Path, codec: &dyn Codec) -> Result<ParsedPartition> {
    let mut parsed = ParsedPartition::default();
    if !dir.exists() {
        return Ok(parsed);
    }

    let mut records = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        let is_json = entry.file_type().is_file()
            && entry.path().extension().is_some_and(|ext| ext == "json");
        if !is_json {
            continue;
        }

        parsed.files += 1;
        let bytes = fs::read(entry.path())?;
        match decode_inbound(codec, &bytes) {
            Inbound::Event(record) => records.push(record),
            Inbound::Failed(reason) => {
                debug!(path = %entry.path().display(), %reason, "skipping undecodable file");
                parsed.skipped += 1;
            }
            Inbound::Report(_) | Inbound::Ignored => parsed.skipped += 1,
        }
    }

    let mut records = dedup_keep_first(records);
    records.sort_by_key(|r| r.timestamp);
    parsed.records = records;
    Ok(parsed)
}

/// Overwrite the partition's summary table with `records`.
pub fn write_partition_table(path: &Path, records: &[Record]) -> Result<()> {
    write_table(path, records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::records::read_table;
    use serde_json::json;
    use tempfile::TempDir;

    fn event(id: &str, ts: i64, summary: &str) -> String {
        json!({
            "MessageId": id,
            "TimeNS": ts,
            "TypeName": "gridworks.event.problem",
            "Src": "hw1.isone.scada",
            "Summary": summary,
        })
        .to_string()
    }

    #[test]
    fn test_parses_nested_files_dedups_and_sorts() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("hw1/2024");
        fs::create_dir_all(&nested).unwrap();
        fs::write(dir.path().join("a.json"), event("m2", 20, "first")).unwrap();
        fs::write(nested.join("b.json"), event("m1", 10, "one")).unwrap();
        fs::write(nested.join("c.json"), event("m2", 5, "second")).unwrap();
        fs::write(nested.join("d.json"), "{broken").unwrap();
        fs::write(nested.join("notes.txt"), "ignored").unwrap();

        let parsed = parse_partition_dir(dir.path(), &JsonCodec).unwrap();
        assert_eq!(parsed.files, 4);
        assert_eq!(parsed.skipped, 1);
        let ids: Vec<_> = parsed.records.iter().map(|r| r.identity.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
        assert_eq!(parsed.records[1].summary, "first");
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let parsed = parse_partition_dir(&dir.path().join("absent"), &JsonCodec).unwrap();
        assert!(parsed.records.is_empty());
        assert_eq!(parsed.files, 0);
    }

    #[test]
    fn test_partition_table_is_overwritten() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p1.csv");
        let codec = JsonCodec;
        let first = codec.decode_event(event("m1", 1, "x").as_bytes()).unwrap();
        let second = codec.decode_event(event("m2", 2, "y").as_bytes()).unwrap();

        write_partition_table(&path, &[first]).unwrap();
        write_partition_table(&path, &[second.clone()]).unwrap();
        assert_eq!(read_table(&path).unwrap(), vec![second]);
    }
}
