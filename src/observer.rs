//! Audit notification, decoupled from the storage path.
//!
//! Observers are invoked synchronously on the write path: a slow
//! observer delays the caller's response. The HTTP observer keeps its
//! network hop off that path by handing delivery to a spawned task.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Emitted once per successful write operation, single or batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub ts: i64,
    pub metrics: Vec<String>,
    pub ip_address: String,
}

impl AuditEvent {
    pub fn now(metrics: Vec<String>, ip_address: impl Into<String>) -> Self {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Self {
            ts,
            metrics,
            ip_address: ip_address.into(),
        }
    }
}

/// Capability interface for audit listeners. Implementations must not
/// fail the write path; delivery problems are logged and swallowed.
pub trait AuditObserver: Send + Sync {
    fn notify(&self, event: &AuditEvent);
}

/// Appends one JSON line per event to a local file.
pub struct FileObserver {
    path: PathBuf,
}

impl FileObserver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl AuditObserver for FileObserver {
    fn notify(&self, event: &AuditEvent) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(err) => {
                tracing::error!(error = %err, "failed to encode audit event");
                return;
            }
        };

        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| writeln!(file, "{line}"));

        match result {
            Ok(()) => tracing::debug!(path = %self.path.display(), "audit event appended"),
            Err(err) => {
                tracing::error!(error = %err, path = %self.path.display(), "failed to append audit event");
            }
        }
    }
}

/// POSTs each event as JSON to a remote endpoint. The request runs on a
/// spawned task with a bounded timeout.
pub struct HttpObserver {
    url: String,
    client: reqwest::Client,
}

impl HttpObserver {
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        Ok(Self {
            url: url.into(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()?,
        })
    }
}

impl AuditObserver for HttpObserver {
    fn notify(&self, event: &AuditEvent) {
        let client = self.client.clone();
        let url = self.url.clone();
        let event = event.clone();
        tokio::spawn(async move {
            match client.post(&url).json(&event).send().await {
                Ok(response) if response.status().is_success() => {
                    tracing::debug!(%url, "audit event delivered");
                }
                Ok(response) => {
                    tracing::error!(%url, status = %response.status(), "audit endpoint rejected event");
                }
                Err(err) => {
                    tracing::error!(%url, error = %err, "failed to deliver audit event");
                }
            }
        });
    }
}
