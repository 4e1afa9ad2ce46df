use std::path::PathBuf;
use std::time::Duration;

/// Agent-side settings, built once at startup and passed by value into
/// every constructor. Nothing here mutates after construction.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Collection server, `host:port`.
    pub server_address: String,
    /// Period of both sampling tasks.
    pub poll_interval: Duration,
    /// Period of the send scheduler.
    pub report_interval: Duration,
    /// Worker pool size and delivery queue capacity.
    pub rate_limit: usize,
    /// Shared secret for the body digest header. None disables signing.
    pub key: Option<String>,
    /// PEM-encoded RSA public key for payload encryption. None disables it.
    pub public_key_path: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_address: "localhost:8080".to_string(),
            poll_interval: Duration::from_secs(2),
            report_interval: Duration::from_secs(10),
            rate_limit: 4,
            key: None,
            public_key_path: None,
        }
    }
}

/// Server-side settings. The storage backend is selected by priority:
/// `database_path`, then `store_path`, then plain in-memory.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub address: String,
    /// Shared secret for verifying the batch digest header.
    pub key: Option<String>,
    /// PEM-encoded RSA private key for payload decryption.
    pub private_key_path: Option<PathBuf>,
    /// JSON snapshot file for the file-backed storage.
    pub store_path: Option<PathBuf>,
    /// Snapshot period; zero means write-through on every update.
    pub store_interval: Duration,
    /// Restore the snapshot file before accepting traffic.
    pub restore: bool,
    /// SQLite database file for the relational storage.
    pub database_path: Option<PathBuf>,
    /// Append audit events to this file.
    pub audit_file: Option<PathBuf>,
    /// POST audit events to this URL.
    pub audit_url: Option<String>,
    /// How long in-flight handlers get after the shutdown signal.
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "localhost:8080".to_string(),
            key: None,
            private_key_path: None,
            store_path: None,
            store_interval: Duration::from_secs(300),
            restore: false,
            database_path: None,
            audit_file: None,
            audit_url: None,
            shutdown_grace: Duration::from_secs(3),
        }
    }
}
