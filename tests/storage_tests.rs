use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use vitals::model::MetricRecord;
use vitals::storage::{FileStorage, MemoryStorage, SqliteStorage, Storage, StorageError};

#[test]
fn test_counter_accumulates() {
    let storage = MemoryStorage::new();

    storage.set_counter("requests", 5).unwrap();
    storage.set_counter("requests", 3).unwrap();

    assert_eq!(storage.counter("requests").unwrap(), 8);
}

#[test]
fn test_negative_delta_accepted() {
    let storage = MemoryStorage::new();

    storage.set_counter("drift", 2).unwrap();
    storage.set_counter("drift", -5).unwrap();

    assert_eq!(storage.counter("drift").unwrap(), -3, "negative totals are valid");
}

#[test]
fn test_gauge_overwrites() {
    let storage = MemoryStorage::new();

    storage.set_gauge("cpu", 87.3).unwrap();
    storage.set_gauge("cpu", 12.1).unwrap();

    assert_eq!(storage.gauge("cpu").unwrap(), 12.1);
}

#[test]
fn test_unknown_metric_is_not_found() {
    let storage = MemoryStorage::new();

    assert!(matches!(
        storage.gauge("missing"),
        Err(StorageError::NotFound(_))
    ));
    assert!(matches!(
        storage.counter("missing"),
        Err(StorageError::NotFound(_))
    ));
}

#[test]
fn test_concurrent_counter_accumulation() {
    let storage = Arc::new(MemoryStorage::new());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let storage = storage.clone();
            thread::spawn(move || {
                for _ in 0..100 {
                    storage.set_counter("hits", 1).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(
        storage.counter("hits").unwrap(),
        800,
        "accumulation must be independent of interleaving"
    );
}

#[test]
fn test_memory_batch_is_not_atomic() {
    let storage = MemoryStorage::new();

    let mut broken = MetricRecord::counter("late", 1);
    broken.delta = None;
    let batch = vec![
        MetricRecord::gauge("early", 1.0),
        broken,
        MetricRecord::gauge("never", 2.0),
    ];

    let err = storage.set_batch(&batch).unwrap_err();
    assert!(matches!(err, StorageError::MissingField { .. }));

    // The prefix before the malformed record stays applied. This is the
    // documented in-memory behavior, not a bug to fix.
    assert_eq!(storage.gauge("early").unwrap(), 1.0);
    assert!(storage.gauge("never").is_err());
}

#[test]
fn test_sqlite_upsert_semantics() {
    let storage = SqliteStorage::open_in_memory().unwrap();

    storage.set_gauge("cpu", 87.3).unwrap();
    storage.set_gauge("cpu", 12.1).unwrap();
    storage.set_counter("requests", 5).unwrap();
    storage.set_counter("requests", 3).unwrap();

    assert_eq!(storage.gauge("cpu").unwrap(), 12.1);
    assert_eq!(storage.counter("requests").unwrap(), 8);

    let gauges = storage.all_gauges().unwrap();
    let counters = storage.all_counters().unwrap();
    assert_eq!(gauges.len(), 1);
    assert_eq!(counters.len(), 1);
}

#[test]
fn test_sqlite_batch_is_atomic() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.set_gauge("cpu", 1.5).unwrap();
    storage.set_counter("requests", 5).unwrap();

    let gauges_before = storage.all_gauges().unwrap();
    let counters_before = storage.all_counters().unwrap();

    let mut broken = MetricRecord::gauge("temp", 0.0);
    broken.value = None;
    let batch = vec![
        MetricRecord::gauge("cpu", 99.9),
        MetricRecord::counter("requests", 100),
        broken,
    ];

    assert!(storage.set_batch(&batch).is_err());

    // Rolled back entirely: the table is byte-for-byte what it was.
    assert_eq!(storage.all_gauges().unwrap(), gauges_before);
    assert_eq!(storage.all_counters().unwrap(), counters_before);
}

#[test]
fn test_sqlite_batch_applies_all_on_success() {
    let storage = SqliteStorage::open_in_memory().unwrap();

    let batch = vec![
        MetricRecord::gauge("cpu", 42.0),
        MetricRecord::counter("requests", 7),
        MetricRecord::counter("requests", 3),
    ];
    storage.set_batch(&batch).unwrap();

    assert_eq!(storage.gauge("cpu").unwrap(), 42.0);
    assert_eq!(storage.counter("requests").unwrap(), 10);
}

#[test]
fn test_sqlite_ping() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    assert!(storage.ping().is_ok());
}

#[test]
fn test_file_storage_write_through_and_restore() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("save.json");

    {
        let storage = FileStorage::open(&path, false, true).unwrap();
        storage.set_gauge("cpu", 12.1).unwrap();
        storage.set_counter("requests", 8).unwrap();
    }

    // Snapshot schema: {"counters": {...}, "gauges": {...}}
    let raw = std::fs::read_to_string(&path).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(doc["gauges"]["cpu"], 12.1);
    assert_eq!(doc["counters"]["requests"], 8);

    let restored = FileStorage::open(&path, true, true).unwrap();
    assert_eq!(restored.gauge("cpu").unwrap(), 12.1);
    assert_eq!(restored.counter("requests").unwrap(), 8);
}

#[test]
fn test_file_storage_skips_restore_when_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("save.json");

    {
        let storage = FileStorage::open(&path, false, true).unwrap();
        storage.set_gauge("cpu", 12.1).unwrap();
    }

    let fresh = FileStorage::open(&path, false, true).unwrap();
    assert!(fresh.gauge("cpu").is_err(), "restore=false must start empty");
}

#[tokio::test]
async fn test_flusher_writes_final_snapshot_on_cancel() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("save.json");

    let storage = Arc::new(FileStorage::open(&path, false, false).unwrap());
    let cancel = CancellationToken::new();
    // Interval far longer than the test: only the shutdown flush can
    // persist the write below.
    let flusher =
        FileStorage::spawn_flusher(storage.clone(), Duration::from_secs(300), cancel.clone());

    storage.set_gauge("cpu", 12.1).unwrap();
    cancel.cancel();
    flusher.await.unwrap();

    let raw = std::fs::read_to_string(&path).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(doc["gauges"]["cpu"], 12.1, "shutdown flush must land before exit");
}

#[test]
fn test_file_storage_open_without_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested/dir/save.json");

    let storage = FileStorage::open(&path, true, false).unwrap();
    assert!(storage.all_gauges().unwrap().is_empty());

    storage.set_gauge("cpu", 1.0).unwrap();
    storage.flush().unwrap();
    assert!(path.exists());
}
