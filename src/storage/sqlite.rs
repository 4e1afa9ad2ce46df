use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, ErrorCode};

use crate::model::{MetricKind, MetricRecord};

use super::{Storage, StorageError};

const GAUGE_UPSERT: &str = "\
INSERT INTO metrics (name, metric_type, gauge_value)
VALUES (?1, 'gauge', ?2)
ON CONFLICT (name, metric_type)
DO UPDATE SET gauge_value = excluded.gauge_value, counter_value = NULL";

const COUNTER_UPSERT: &str = "\
INSERT INTO metrics (name, metric_type, counter_value)
VALUES (?1, 'counter', ?2)
ON CONFLICT (name, metric_type)
DO UPDATE SET counter_value = metrics.counter_value + excluded.counter_value,
              gauge_value = NULL";

/// Relational backend: one table keyed by `(name, metric_type)`.
///
/// The only backend with all-or-nothing batch semantics: `set_batch`
/// runs inside a single transaction and rolls back entirely on the
/// first failure.
#[derive(Debug)]
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS metrics (
                name          TEXT NOT NULL,
                metric_type   TEXT NOT NULL,
                gauge_value   REAL,
                counter_value INTEGER,
                PRIMARY KEY (name, metric_type)
            )",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl Storage for SqliteStorage {
    fn set_gauge(&self, name: &str, value: f64) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(GAUGE_UPSERT, params![name, value])?;
        Ok(())
    }

    fn set_counter(&self, name: &str, delta: i64) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(COUNTER_UPSERT, params![name, delta])?;
        Ok(())
    }

    fn gauge(&self, name: &str) -> Result<f64, StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT gauge_value FROM metrics WHERE name = ?1 AND metric_type = 'gauge'",
            params![name],
            |row| row.get(0),
        )
        .map_err(|err| match err {
            rusqlite::Error::QueryReturnedNoRows => StorageError::NotFound(name.to_string()),
            other => other.into(),
        })
    }

    fn counter(&self, name: &str) -> Result<i64, StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT counter_value FROM metrics WHERE name = ?1 AND metric_type = 'counter'",
            params![name],
            |row| row.get(0),
        )
        .map_err(|err| match err {
            rusqlite::Error::QueryReturnedNoRows => StorageError::NotFound(name.to_string()),
            other => other.into(),
        })
    }

    fn all_gauges(&self) -> Result<BTreeMap<String, f64>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT name, gauge_value FROM metrics
             WHERE metric_type = 'gauge' AND gauge_value IS NOT NULL",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<Result<BTreeMap<String, f64>, _>>()
            .map_err(Into::into)
    }

    fn all_counters(&self) -> Result<BTreeMap<String, i64>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT name, counter_value FROM metrics
             WHERE metric_type = 'counter' AND counter_value IS NOT NULL",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<Result<BTreeMap<String, i64>, _>>()
            .map_err(Into::into)
    }

    fn set_batch(&self, records: &[MetricRecord]) -> Result<(), StorageError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        {
            let mut gauge_stmt = tx.prepare(GAUGE_UPSERT)?;
            let mut counter_stmt = tx.prepare(COUNTER_UPSERT)?;

            for record in records {
                match record.kind {
                    MetricKind::Gauge => {
                        let value = record.value.ok_or_else(|| StorageError::MissingField {
                            id: record.id.clone(),
                            field: "value",
                        })?;
                        gauge_stmt.execute(params![record.id, value])?;
                    }
                    MetricKind::Counter => {
                        let delta = record.delta.ok_or_else(|| StorageError::MissingField {
                            id: record.id.clone(),
                            field: "delta",
                        })?;
                        counter_stmt.execute(params![record.id, delta])?;
                    }
                }
            }
        }
        // An early return above drops the transaction, which rolls back.
        tx.commit()?;
        Ok(())
    }

    fn ping(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    fn is_transient(&self, err: &StorageError) -> bool {
        matches!(
            err,
            StorageError::Sql(rusqlite::Error::SqliteFailure(inner, _))
                if matches!(inner.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
        )
    }
}
