use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use vitals::config::ServerConfig;
use vitals::observer::{FileObserver, HttpObserver};
use vitals::server::{self, AppState};
use vitals::storage::{FileStorage, MemoryStorage, SqliteStorage, Storage};
use vitals::wire;
use vitals::MetricsService;

/// Thin bootstrap glue: a handful of env vars over the defaults.
fn config_from_env() -> ServerConfig {
    let mut cfg = ServerConfig::default();
    if let Ok(address) = std::env::var("ADDRESS") {
        cfg.address = address;
    }
    if let Ok(key) = std::env::var("KEY") {
        cfg.key = Some(key);
    }
    if let Ok(path) = std::env::var("CRYPTO_KEY") {
        cfg.private_key_path = Some(path.into());
    }
    if let Ok(path) = std::env::var("FILE_STORAGE_PATH") {
        cfg.store_path = Some(path.into());
    }
    if let Some(secs) = env_u64("STORE_INTERVAL") {
        cfg.store_interval = Duration::from_secs(secs);
    }
    if let Ok(restore) = std::env::var("RESTORE") {
        cfg.restore = restore == "true";
    }
    if let Ok(path) = std::env::var("DATABASE_PATH") {
        cfg.database_path = Some(path.into());
    }
    if let Ok(path) = std::env::var("AUDIT_FILE") {
        cfg.audit_file = Some(path.into());
    }
    if let Ok(url) = std::env::var("AUDIT_URL") {
        cfg.audit_url = Some(url);
    }
    cfg
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.parse().ok()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cfg = config_from_env();
    let cancel = CancellationToken::new();

    let mut flusher = None;
    let storage: Arc<dyn Storage> = if let Some(path) = &cfg.database_path {
        tracing::info!(path = %path.display(), "relational storage initialized");
        Arc::new(SqliteStorage::open(path)?)
    } else if let Some(path) = &cfg.store_path {
        let write_through = cfg.store_interval.is_zero();
        let storage = Arc::new(FileStorage::open(path, cfg.restore, write_through)?);
        if !write_through {
            flusher = Some(FileStorage::spawn_flusher(
                storage.clone(),
                cfg.store_interval,
                cancel.clone(),
            ));
        }
        tracing::info!(path = %path.display(), "file-backed storage initialized");
        storage
    } else {
        tracing::info!("in-memory storage initialized");
        Arc::new(MemoryStorage::new())
    };

    let mut service = MetricsService::new(storage);
    if let Some(path) = &cfg.audit_file {
        service.register_observer(Arc::new(FileObserver::new(path)));
    }
    if let Some(url) = &cfg.audit_url {
        service.register_observer(Arc::new(HttpObserver::new(url)?));
    }

    let private_key = match &cfg.private_key_path {
        Some(path) => Some(wire::load_private_key(path)?),
        None => None,
    };

    let state = Arc::new(AppState {
        service: Arc::new(service),
        key: cfg.key.clone(),
        private_key,
    });

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            signal_cancel.cancel();
        }
    });

    server::run(&cfg, state, cancel).await?;

    // The flusher exits on cancellation after a final snapshot write;
    // waiting here keeps the runtime alive until that write lands.
    if let Some(handle) = flusher {
        handle.await?;
    }
    Ok(())
}
