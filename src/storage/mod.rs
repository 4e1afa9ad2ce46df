//! Pluggable persistence for gauges and counters.
//!
//! All backends share one contract: gauges are overwritten per write,
//! counters accumulate their deltas, entries are keyed by `(name, kind)`.
//! Durability differs per backend and is documented on each type.

pub mod file;
pub mod memory;
pub mod sqlite;

use std::collections::BTreeMap;

use crate::model::MetricRecord;

pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("metric {0:?} not found")]
    NotFound(String),
    #[error("metric {id:?}: missing {field}")]
    MissingField { id: String, field: &'static str },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Sql(#[from] rusqlite::Error),
    #[error("snapshot codec: {0}")]
    Snapshot(#[from] serde_json::Error),
}

/// Uniform storage contract consumed by the ingestion service.
///
/// Reads of unknown metrics fail with [`StorageError::NotFound`].
/// `set_batch` durability is backend-specific: the relational backend
/// is all-or-nothing, the in-memory and file backends apply entries
/// sequentially and may leave a prefix behind on a mid-batch failure.
pub trait Storage: Send + Sync {
    fn set_gauge(&self, name: &str, value: f64) -> Result<(), StorageError>;
    /// Accumulates: `new = old + delta`. Negative totals are accepted.
    fn set_counter(&self, name: &str, delta: i64) -> Result<(), StorageError>;
    fn gauge(&self, name: &str) -> Result<f64, StorageError>;
    fn counter(&self, name: &str) -> Result<i64, StorageError>;
    fn all_gauges(&self) -> Result<BTreeMap<String, f64>, StorageError>;
    fn all_counters(&self) -> Result<BTreeMap<String, i64>, StorageError>;
    fn set_batch(&self, records: &[MetricRecord]) -> Result<(), StorageError>;
    fn ping(&self) -> Result<(), StorageError>;

    /// Whether `err` is worth retrying against this backend. The retry
    /// policy in the service stays backend-agnostic through this hook.
    fn is_transient(&self, _err: &StorageError) -> bool {
        false
    }
}
