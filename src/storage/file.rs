use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::model::MetricRecord;

use super::{MemoryStorage, Storage, StorageError};

/// On-disk snapshot document: `{"counters": {...}, "gauges": {...}}`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    counters: BTreeMap<String, i64>,
    gauges: BTreeMap<String, f64>,
}

/// In-memory storage with a JSON snapshot on disk.
///
/// With `write_through` every successful write rewrites the snapshot;
/// otherwise a periodic flusher task (see [`FileStorage::spawn_flusher`])
/// owns persistence. The snapshot is written to a temp file and renamed
/// so readers never observe a torn document.
#[derive(Debug)]
pub struct FileStorage {
    inner: MemoryStorage,
    path: PathBuf,
    write_through: bool,
}

impl FileStorage {
    /// Opens the snapshot file, optionally restoring prior state before
    /// any traffic is accepted. A missing or empty file is a clean start.
    pub fn open(path: &Path, restore: bool, write_through: bool) -> Result<Self, StorageError> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }

        let storage = Self {
            inner: MemoryStorage::new(),
            path: path.to_path_buf(),
            write_through,
        };

        if restore {
            storage.restore()?;
        }

        Ok(storage)
    }

    fn restore(&self) -> Result<(), StorageError> {
        let data = match std::fs::read(&self.path) {
            Ok(data) if !data.is_empty() => data,
            Ok(_) => {
                tracing::info!(path = %self.path.display(), "snapshot file exists but is empty");
                return Ok(());
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        let snapshot: Snapshot = serde_json::from_slice(&data)?;
        for (name, value) in snapshot.gauges {
            self.inner.set_gauge(&name, value)?;
        }
        for (name, delta) in snapshot.counters {
            self.inner.set_counter(&name, delta)?;
        }
        tracing::info!(path = %self.path.display(), "metrics restored from snapshot");
        Ok(())
    }

    /// Serializes both maps and replaces the snapshot file.
    pub fn flush(&self) -> Result<(), StorageError> {
        let (counters, gauges) = self.inner.snapshot();
        let snapshot = Snapshot { counters, gauges };
        let data = serde_json::to_vec(&snapshot)?;

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Periodic persistence loop used when the store interval is non-zero.
    /// Flushes once more on cancellation so shutdown never loses writes
    /// older than one interval.
    pub fn spawn_flusher(
        storage: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        if let Err(err) = storage.flush() {
                            tracing::error!(error = %err, "failed to write metrics snapshot");
                        }
                    }
                }
            }
            if let Err(err) = storage.flush() {
                tracing::error!(error = %err, "final snapshot flush failed");
            }
        })
    }

    fn maybe_flush(&self) -> Result<(), StorageError> {
        if self.write_through {
            self.flush()?;
        }
        Ok(())
    }
}

impl Storage for FileStorage {
    fn set_gauge(&self, name: &str, value: f64) -> Result<(), StorageError> {
        self.inner.set_gauge(name, value)?;
        self.maybe_flush()
    }

    fn set_counter(&self, name: &str, delta: i64) -> Result<(), StorageError> {
        self.inner.set_counter(name, delta)?;
        self.maybe_flush()
    }

    fn gauge(&self, name: &str) -> Result<f64, StorageError> {
        self.inner.gauge(name)
    }

    fn counter(&self, name: &str) -> Result<i64, StorageError> {
        self.inner.counter(name)
    }

    fn all_gauges(&self) -> Result<BTreeMap<String, f64>, StorageError> {
        self.inner.all_gauges()
    }

    fn all_counters(&self) -> Result<BTreeMap<String, i64>, StorageError> {
        self.inner.all_counters()
    }

    fn set_batch(&self, records: &[MetricRecord]) -> Result<(), StorageError> {
        self.inner.set_batch(records)?;
        self.maybe_flush()
    }

    fn ping(&self) -> Result<(), StorageError> {
        self.inner.ping()
    }
}
