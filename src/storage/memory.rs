use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::model::{MetricKind, MetricRecord};

use super::{Storage, StorageError};

#[derive(Debug, Default)]
struct Maps {
    gauges: BTreeMap<String, f64>,
    counters: BTreeMap<String, i64>,
}

/// Process-lifetime storage: two maps behind a single reader/writer lock.
///
/// `set_batch` applies entries in order with no rollback, so a malformed
/// record part-way through leaves the preceding entries applied.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    maps: RwLock<Maps>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full copy of both maps, used by the file backend's snapshotter.
    pub(crate) fn snapshot(&self) -> (BTreeMap<String, i64>, BTreeMap<String, f64>) {
        let maps = self.maps.read().unwrap();
        (maps.counters.clone(), maps.gauges.clone())
    }
}

impl Storage for MemoryStorage {
    fn set_gauge(&self, name: &str, value: f64) -> Result<(), StorageError> {
        let mut maps = self.maps.write().unwrap();
        maps.gauges.insert(name.to_string(), value);
        Ok(())
    }

    fn set_counter(&self, name: &str, delta: i64) -> Result<(), StorageError> {
        let mut maps = self.maps.write().unwrap();
        *maps.counters.entry(name.to_string()).or_insert(0) += delta;
        Ok(())
    }

    fn gauge(&self, name: &str) -> Result<f64, StorageError> {
        let maps = self.maps.read().unwrap();
        maps.gauges
            .get(name)
            .copied()
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    fn counter(&self, name: &str) -> Result<i64, StorageError> {
        let maps = self.maps.read().unwrap();
        maps.counters
            .get(name)
            .copied()
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    fn all_gauges(&self) -> Result<BTreeMap<String, f64>, StorageError> {
        Ok(self.maps.read().unwrap().gauges.clone())
    }

    fn all_counters(&self) -> Result<BTreeMap<String, i64>, StorageError> {
        Ok(self.maps.read().unwrap().counters.clone())
    }

    fn set_batch(&self, records: &[MetricRecord]) -> Result<(), StorageError> {
        for record in records {
            match record.kind {
                MetricKind::Gauge => {
                    let value = record.value.ok_or_else(|| StorageError::MissingField {
                        id: record.id.clone(),
                        field: "value",
                    })?;
                    self.set_gauge(&record.id, value)?;
                }
                MetricKind::Counter => {
                    let delta = record.delta.ok_or_else(|| StorageError::MissingField {
                        id: record.id.clone(),
                        field: "delta",
                    })?;
                    self.set_counter(&record.id, delta)?;
                }
            }
        }
        Ok(())
    }

    fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
