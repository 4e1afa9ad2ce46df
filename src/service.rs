//! Ingestion service: validation, retry/backoff around storage, and
//! audit fan-out on successful writes.

use std::sync::Arc;
use std::time::Duration;

use crate::model::{MetricKind, MetricRecord};
use crate::observer::{AuditEvent, AuditObserver};
use crate::storage::{Storage, StorageError};

/// Escalating delays between retry attempts; the attempt budget is the
/// length of this table.
const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(3),
    Duration::from_secs(5),
];

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("metric {0:?}: missing delta")]
    MissingDelta(String),
    #[error("metric {0:?}: missing value")]
    MissingValue(String),
    #[error("metric {0:?} not found")]
    NotFound(String),
    #[error("operation failed after retries: {0}")]
    RetriesExhausted(#[source] StorageError),
    #[error(transparent)]
    Storage(StorageError),
}

impl ServiceError {
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ServiceError::MissingDelta(_) | ServiceError::MissingValue(_)
        )
    }
}

/// Public ingestion surface over an interchangeable storage backend.
///
/// Every storage call runs under the retry policy: not-found returns
/// immediately, errors the backend classifies as transient are retried
/// after an escalating delay, anything else surfaces at once.
///
/// Audit observers are notified synchronously on the write path; the
/// response to the caller waits for every `notify` to return.
pub struct MetricsService {
    storage: Arc<dyn Storage>,
    observers: Vec<Arc<dyn AuditObserver>>,
}

impl MetricsService {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            observers: Vec::new(),
        }
    }

    /// Registration happens at startup, before the service is shared.
    pub fn register_observer(&mut self, observer: Arc<dyn AuditObserver>) {
        self.observers.push(observer);
    }

    pub async fn update_metric(
        &self,
        record: &MetricRecord,
        origin: &str,
    ) -> Result<(), ServiceError> {
        match record.kind {
            MetricKind::Counter => {
                let delta = record
                    .delta
                    .ok_or_else(|| ServiceError::MissingDelta(record.id.clone()))?;
                self.update_counter(&record.id, delta).await?;
            }
            MetricKind::Gauge => {
                let value = record
                    .value
                    .ok_or_else(|| ServiceError::MissingValue(record.id.clone()))?;
                self.update_gauge(&record.id, value).await?;
            }
        }

        self.notify(vec![record.id.clone()], origin);
        Ok(())
    }

    /// Unlike single updates, batch members are not validated up front:
    /// a malformed record surfaces from the backend as a storage error,
    /// which the HTTP layer reports as 500. Deliberate, so each
    /// backend's batch durability (prefix vs rollback) stays observable.
    pub async fn update_metric_batch(
        &self,
        records: &[MetricRecord],
        origin: &str,
    ) -> Result<(), ServiceError> {
        self.with_retry(|| self.storage.set_batch(records)).await?;

        let ids = records.iter().map(|r| r.id.clone()).collect();
        self.notify(ids, origin);
        Ok(())
    }

    pub async fn update_gauge(&self, name: &str, value: f64) -> Result<(), ServiceError> {
        self.with_retry(|| self.storage.set_gauge(name, value))
            .await
    }

    pub async fn update_counter(&self, name: &str, delta: i64) -> Result<(), ServiceError> {
        self.with_retry(|| self.storage.set_counter(name, delta))
            .await
    }

    pub async fn get_gauge(&self, name: &str) -> Result<f64, ServiceError> {
        self.with_retry(|| self.storage.gauge(name)).await
    }

    pub async fn get_counter(&self, name: &str) -> Result<i64, ServiceError> {
        self.with_retry(|| self.storage.counter(name)).await
    }

    pub async fn all_gauges(
        &self,
    ) -> Result<std::collections::BTreeMap<String, f64>, ServiceError> {
        self.with_retry(|| self.storage.all_gauges()).await
    }

    pub async fn all_counters(
        &self,
    ) -> Result<std::collections::BTreeMap<String, i64>, ServiceError> {
        self.with_retry(|| self.storage.all_counters()).await
    }

    pub async fn ping(&self) -> Result<(), ServiceError> {
        self.with_retry(|| self.storage.ping()).await
    }

    async fn with_retry<T>(
        &self,
        op: impl Fn() -> Result<T, StorageError>,
    ) -> Result<T, ServiceError> {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(StorageError::NotFound(name)) => return Err(ServiceError::NotFound(name)),
                Err(err) if self.storage.is_transient(&err) => {
                    attempt += 1;
                    if attempt == RETRY_DELAYS.len() {
                        return Err(ServiceError::RetriesExhausted(err));
                    }
                    let delay = RETRY_DELAYS[attempt - 1];
                    tracing::warn!(error = %err, ?delay, "transient storage error, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(ServiceError::Storage(err)),
            }
        }
    }

    fn notify(&self, metrics: Vec<String>, origin: &str) {
        if self.observers.is_empty() {
            return;
        }
        let event = AuditEvent::now(metrics, origin);
        for observer in &self.observers {
            observer.notify(&event);
        }
    }
}
