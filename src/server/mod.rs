//! Collection server: HTTP surface over the ingestion service.

pub mod decode;
pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use rsa::RsaPrivateKey;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::service::MetricsService;

/// Shared request state: the service plus the wire-level key material.
pub struct AppState {
    pub service: Arc<MetricsService>,
    pub key: Option<String>,
    pub private_key: Option<RsaPrivateKey>,
}

/// Builds the full route table. Body-carrying
/// routes get the decode layer (gunzip + decrypt); `/updates`
/// additionally verifies the body digest before anything is decoded.
pub fn router(state: Arc<AppState>) -> Router {
    let decode = middleware::from_fn_with_state(state.clone(), decode::decode_request);
    let verify = middleware::from_fn_with_state(state.clone(), decode::verify_digest);

    Router::new()
        .route("/", get(handlers::index))
        .route("/update/:kind/:id/:value", post(handlers::update_path))
        .route("/value/:kind/:id", get(handlers::value_path))
        .route("/update", post(handlers::update_json).layer(decode.clone()))
        .route("/value", post(handlers::value_json).layer(decode.clone()))
        .route(
            "/updates",
            // Layer order matters: digest over the raw body, then decode.
            post(handlers::update_batch).layer(decode).layer(verify),
        )
        .route("/ping", get(handlers::ping))
        .layer(middleware::from_fn(decode::compress_response))
        .with_state(state)
}

/// Serves until `cancel` fires, then drains in-flight handlers for at
/// most `grace` before the serve future is abandoned.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    cancel: CancellationToken,
    grace: Duration,
) -> anyhow::Result<()> {
    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();

    let shutdown = {
        let cancel = cancel.clone();
        async move { cancel.cancelled().await }
    };
    let server = std::future::IntoFuture::into_future(
        axum::serve(listener, app).with_graceful_shutdown(shutdown),
    );
    let mut server = std::pin::pin!(server);

    tokio::select! {
        result = &mut server => result?,
        _ = async { cancel.cancelled().await; tokio::time::sleep(grace).await; } => {
            tracing::warn!("shutdown grace period elapsed, dropping in-flight requests");
        }
    }
    Ok(())
}

pub async fn run(
    cfg: &ServerConfig,
    state: Arc<AppState>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&cfg.address).await?;
    tracing::info!(address = %cfg.address, "server listening");
    serve(listener, state, cancel, cfg.shutdown_grace).await
}
