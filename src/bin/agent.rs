use std::time::Duration;

use tokio_util::sync::CancellationToken;
use vitals::agent::Agent;
use vitals::config::AgentConfig;

/// Thin bootstrap glue: a handful of env vars over the defaults.
fn config_from_env() -> AgentConfig {
    let mut cfg = AgentConfig::default();
    if let Ok(address) = std::env::var("ADDRESS") {
        cfg.server_address = address;
    }
    if let Some(secs) = env_u64("POLL_INTERVAL") {
        cfg.poll_interval = Duration::from_secs(secs);
    }
    if let Some(secs) = env_u64("REPORT_INTERVAL") {
        cfg.report_interval = Duration::from_secs(secs);
    }
    if let Some(limit) = env_u64("RATE_LIMIT") {
        cfg.rate_limit = limit.max(1) as usize;
    }
    if let Ok(key) = std::env::var("KEY") {
        cfg.key = Some(key);
    }
    if let Ok(path) = std::env::var("CRYPTO_KEY") {
        cfg.public_key_path = Some(path.into());
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
    tracing::info!(server = %cfg.server_address, "agent starting");

    let agent = Agent::new(cfg)?;
    let cancel = CancellationToken::new();

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            signal_cancel.cancel();
        }
    });

    agent.run(cancel).await;
    Ok(())
}
