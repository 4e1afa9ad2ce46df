use std::collections::HashMap;
use std::sync::RwLock;

use crate::model::MetricRecord;

/// Thread-safe staging area between the samplers and the delivery
/// pipeline. Keyed by metric id; `set` replaces, last write wins.
#[derive(Debug, Default)]
pub struct LocalBuffer {
    records: RwLock<HashMap<String, MetricRecord>>,
}

impl LocalBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, record: MetricRecord) {
        let mut records = self.records.write().unwrap();
        records.insert(record.id.clone(), record);
    }

    pub fn get(&self, id: &str) -> Option<MetricRecord> {
        self.records.read().unwrap().get(id).cloned()
    }

    /// Full independent copy. Writers racing with a flush cycle can
    /// never mutate state the flusher is iterating over.
    pub fn get_all(&self) -> HashMap<String, MetricRecord> {
        self.records.read().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().unwrap().is_empty()
    }
}
