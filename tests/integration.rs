//! Integration tests for the ingestion pipeline.

mod common;

use common::*;
use fleetwatch::{
    bridge, read_table, CancelToken, Components, DisplayConsumer, JsonCodec, LiveWindow,
    MergeOutcome, Pipeline, RecordStore, ReportIndex, StoreConfig, StoreWorker, WindowFilter,
};
use serde_json::json;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn test_store(dir: &TempDir) -> RecordStore {
    RecordStore::open(StoreConfig {
        path: dir.path().join("events.csv"),
        flush_threshold: 100,
        flush_interval: Duration::from_secs(3600),
        read_only: false,
    })
    .unwrap()
}

fn ids(records: &[fleetwatch::Record]) -> Vec<&str> {
    records.iter().map(|r| r.identity.as_str()).collect()
}

// --- Bridge To Window ---

#[test]
fn test_bridge_feeds_bounded_window_in_order() {
    let dir = TempDir::new().unwrap();
    let paths = fleetwatch::Paths::in_dir(dir.path());
    let (tx, rx) = bridge();
    let (store, join) =
        StoreWorker::spawn(test_store(&dir), paths.clone(), tx.clone(), CancelToken::new()).unwrap();
    let mut consumer = DisplayConsumer::new(
        test_settings(dir.path()).display,
        LiveWindow::new(2, WindowFilter::default()),
        ReportIndex::new(&paths),
        store.clone(),
    );

    for (id, t) in [("a", 1), ("b", 2), ("c", 3)] {
        tx.record(problem(id, t)).unwrap();
    }
    for item in rx.drain_available(16) {
        consumer.handle(item).unwrap();
    }

    assert_eq!(ids(&consumer.window().records()), vec!["b", "c"]);

    // Every record still reaches the durable store.
    store.shutdown().unwrap();
    drop(store);
    drop(consumer);
    join.join().unwrap().unwrap();
    let stored = read_table(dir.path().join("events.csv")).unwrap();
    assert_eq!(ids(&stored), vec!["a", "b", "c"]);
}

#[test]
fn test_window_ignores_replayed_and_stale_records() {
    let mut window = LiveWindow::new(2, WindowFilter::default());
    window.consider(&problem("a", 10));
    window.consider(&problem("b", 20));

    assert!(!window.consider(&problem("a", 30)));
    assert!(!window.consider(&problem("old", 5)));
    assert!(!window.consider(&problem("tie", 10)));
    assert_eq!(ids(&window.records()), vec!["a", "b"]);
}

// --- Live And Synced Duplicates ---

#[test]
fn test_live_record_wins_over_later_sync() {
    let dir = TempDir::new().unwrap();
    let mut store = test_store(&dir);

    assert!(store.append_live(problem("dup", 100).with_summary("live")));
    let outcome = store
        .merge_partition(
            "p1",
            &[problem("dup", 100).with_summary("synced"), problem("other", 50)],
        )
        .unwrap();
    assert_eq!(outcome, MergeOutcome::Merged { added: 1, total: 1 });
    store.flush().unwrap();

    let stored = read_table(store.path()).unwrap();
    assert_eq!(ids(&stored), vec!["other", "dup"]);
    assert_eq!(stored[1].summary, "live");
}

#[test]
fn test_synced_record_wins_over_later_live() {
    let dir = TempDir::new().unwrap();
    let mut store = test_store(&dir);

    store
        .merge_partition("p1", &[problem("dup", 100).with_summary("synced")])
        .unwrap();
    assert!(!store.append_live(problem("dup", 100).with_summary("live")));
    store.flush().unwrap();

    let stored = read_table(store.path()).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].summary, "synced");
}

#[test]
fn test_repeated_merge_leaves_file_untouched() {
    let dir = TempDir::new().unwrap();
    let mut store = test_store(&dir);
    let records = vec![problem("x", 1), problem("y", 2)];

    store.merge_partition("p1", &records).unwrap();
    let before = fs::read(store.path()).unwrap();

    assert_eq!(store.merge_partition("p1", &records).unwrap(), MergeOutcome::Unchanged);
    assert_eq!(fs::read(store.path()).unwrap(), before);
}

#[test]
fn test_reopen_keeps_merged_history() {
    let dir = TempDir::new().unwrap();
    {
        let mut store = test_store(&dir);
        store.merge_partition("p1", &[problem("x", 2), problem("y", 1)]).unwrap();
    }
    let store = test_store(&dir);
    assert_eq!(ids(store.records()), vec!["y", "x"]);
}

// --- Full Pipeline ---

#[test]
fn test_pipeline_streams_syncs_and_persists() {
    let dir = TempDir::new().unwrap();
    let mut settings = test_settings(dir.path());
    settings.sync.num_dirs_to_sync = 2;

    let status = json!({
        "TypeName": "gw",
        "Header": {"MessageType": "gt.sh.status", "Src": "hw1.isone"},
        "Payload": {"FromGNodeAlias": "hw1.isone", "ReportTimeUnixMs": 5_000},
    });
    let transport = ScriptedTransport::delivering(vec![
        event_json("live-a", 3_000, "gridworks.event.problem", "hw1.isone.scada")
            .to_string()
            .into_bytes(),
        b"not json".to_vec(),
        status.to_string().into_bytes(),
        event_json("live-b", 4_000, "gridworks.event.problem", "hw1.isone.scada")
            .to_string()
            .into_bytes(),
    ]);
    let copier = FakeCopy::new()
        .with_file(
            "p2",
            "e1.json",
            event_json("synced-1", 1_000, "gridworks.event.problem", "hw1.isone.scada"),
        )
        .with_file(
            "p3",
            "e2.json",
            event_json("synced-2", 2_000, "gridworks.event.problem", "hw1.isone.scada"),
        );
    let copied = Arc::clone(&copier.copied);

    let pipeline = Pipeline::start(
        settings.clone(),
        Components {
            transport: Box::new(transport),
            codec: Arc::new(JsonCodec),
            lister: Box::new(FixedLister(vec!["p1", "p2", "p3"])),
            copier: Box::new(copier),
        },
    )
    .unwrap();

    let settled = wait_for(Duration::from_secs(10), || {
        let state = pipeline.render_state();
        state.window.len() == 4 && state.syncs.len() == 2 && state.syncs.iter().all(|s| s.is_done())
    });
    assert!(settled, "pipeline did not settle: {:?}", pipeline.render_state());

    let state = pipeline.render_state();
    assert_eq!(
        ids(&state.window),
        vec!["synced-1", "synced-2", "live-a", "live-b"]
    );
    assert_eq!(state.syncs[0].name, "p3");
    assert!(state.log.iter().any(|line| line.contains("mqtt_parse_exception")));
    assert!(state.log.iter().any(|line| line.contains("mqtt_fully_subscribed")));
    assert_eq!(copied.lock().first().map(String::as_str), Some("p3"));
    assert!(!copied.lock().contains(&"p1".to_string()));

    pipeline.cancel();
    pipeline.join().unwrap();

    let stored = read_table(&settings.paths.store_path).unwrap();
    assert_eq!(ids(&stored), vec!["synced-1", "synced-2", "live-a", "live-b"]);
    assert!(settings.paths.partition_table_path("p3").exists());
    assert!(settings
        .paths
        .status_dir()
        .join("hw1.isone.status.json")
        .exists());
}

#[test]
fn test_pipeline_restart_reloads_window_from_store() {
    let dir = TempDir::new().unwrap();
    let mut settings = test_settings(dir.path());
    settings.sync.enabled = false;

    let first = Pipeline::start(
        settings.clone(),
        Components {
            transport: Box::new(ScriptedTransport::delivering(vec![event_json(
                "kept",
                1_000,
                "gridworks.event.problem",
                "hw1.isone.scada",
            )
            .to_string()
            .into_bytes()])),
            codec: Arc::new(JsonCodec),
            lister: Box::new(FixedLister(vec![])),
            copier: Box::new(FakeCopy::new()),
        },
    )
    .unwrap();
    assert!(wait_for(Duration::from_secs(10), || first.render_state().window.len() == 1));
    first.cancel();
    first.join().unwrap();

    let second = Pipeline::start(
        settings,
        Components {
            transport: Box::new(ScriptedTransport::new(vec![])),
            codec: Arc::new(JsonCodec),
            lister: Box::new(FixedLister(vec![])),
            copier: Box::new(FakeCopy::new()),
        },
    )
    .unwrap();
    assert!(wait_for(Duration::from_secs(10), || {
        ids(&second.render_state().window) == vec!["kept"]
    }));
    second.cancel();
    second.join().unwrap();
}

#[test]
fn test_read_only_pipeline_never_writes_store() {
    let dir = TempDir::new().unwrap();
    let mut settings = test_settings(dir.path());
    settings.sync.enabled = false;
    settings.store.read_only = true;

    let pipeline = Pipeline::start(
        settings.clone(),
        Components {
            transport: Box::new(ScriptedTransport::delivering(vec![event_json(
                "shown",
                1_000,
                "gridworks.event.problem",
                "hw1.isone.scada",
            )
            .to_string()
            .into_bytes()])),
            codec: Arc::new(JsonCodec),
            lister: Box::new(FixedLister(vec![])),
            copier: Box::new(FakeCopy::new()),
        },
    )
    .unwrap();
    assert!(wait_for(Duration::from_secs(10), || pipeline.render_state().window.len() == 1));
    pipeline.cancel();
    pipeline.join().unwrap();

    assert!(!settings.paths.store_path.exists());
}
