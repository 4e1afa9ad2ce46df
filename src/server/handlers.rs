use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;

use crate::model::{MetricKind, MetricRecord};
use crate::service::ServiceError;

use super::AppState;

/// Machine-readable error body: `{"error": "..."}` with a taxonomy
/// status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let status = match &err {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            err if err.is_validation() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

/// First hop of `X-Forwarded-For`, else the raw peer address.
fn origin(headers: &HeaderMap, addr: SocketAddr) -> String {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    addr.ip().to_string()
}

/// GET `/` - human-readable listing of everything stored.
pub async fn index(State(state): State<Arc<AppState>>) -> Result<Html<String>, ApiError> {
    let counters = state.service.all_counters().await?;
    let gauges = state.service.all_gauges().await?;

    let mut page = String::from(
        "<!DOCTYPE html><html><head><title>Metrics List</title></head><body>\
         <h1>Metrics List</h1><h2>Counters</h2><ul>",
    );
    for (name, value) in &counters {
        let _ = write!(page, "<li>{name}: {value}</li>");
    }
    page.push_str("</ul><h2>Gauges</h2><ul>");
    for (name, value) in &gauges {
        let _ = write!(page, "<li>{name}: {value}</li>");
    }
    page.push_str("</ul></body></html>");

    Ok(Html(page))
}

/// POST `/update/{type}/{id}/{value}` - legacy path-segment update.
pub async fn update_path(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path((kind, id, value)): Path<(String, String, String)>,
) -> Result<StatusCode, ApiError> {
    let kind: MetricKind = kind
        .parse()
        .map_err(|_| ApiError::new(StatusCode::BAD_REQUEST, "unknown metric type"))?;

    let record = match kind {
        MetricKind::Counter => {
            let delta: i64 = value
                .parse()
                .map_err(|_| ApiError::new(StatusCode::BAD_REQUEST, "invalid delta value"))?;
            MetricRecord::counter(id, delta)
        }
        MetricKind::Gauge => {
            let value: f64 = value
                .parse()
                .map_err(|_| ApiError::new(StatusCode::BAD_REQUEST, "invalid metric value"))?;
            MetricRecord::gauge(id, value)
        }
    };

    state
        .service
        .update_metric(&record, &origin(&headers, addr))
        .await?;
    Ok(StatusCode::OK)
}

/// GET `/value/{type}/{id}` - legacy plain-text read.
pub async fn value_path(
    State(state): State<Arc<AppState>>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<String, ApiError> {
    let kind: MetricKind = kind
        .parse()
        .map_err(|_| ApiError::new(StatusCode::BAD_REQUEST, "unknown metric type"))?;

    let value = match kind {
        MetricKind::Counter => state.service.get_counter(&id).await?.to_string(),
        MetricKind::Gauge => state.service.get_gauge(&id).await?.to_string(),
    };
    Ok(value)
}

/// POST `/update` - structured single-metric update.
pub async fn update_json(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let record: MetricRecord = serde_json::from_slice(&body)
        .map_err(|_| ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, "wrong body structure"))?;

    state
        .service
        .update_metric(&record, &origin(&headers, addr))
        .await?;
    Ok(StatusCode::OK)
}

/// POST `/value` - structured single-metric read: the request carries
/// id and type, the response echoes the record with its current value.
pub async fn value_json(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<MetricRecord>, ApiError> {
    let mut record: MetricRecord = serde_json::from_slice(&body)
        .map_err(|_| ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, "wrong body structure"))?;

    match record.kind {
        MetricKind::Counter => record.delta = Some(state.service.get_counter(&record.id).await?),
        MetricKind::Gauge => record.value = Some(state.service.get_gauge(&record.id).await?),
    }
    Ok(Json(record))
}

/// POST `/updates` - batch update. The digest layer has already
/// verified the body when a key is configured.
pub async fn update_batch(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let records: Vec<MetricRecord> = serde_json::from_slice(&body)
        .map_err(|_| ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, "wrong body structure"))?;

    state
        .service
        .update_metric_batch(&records, &origin(&headers, addr))
        .await?;
    Ok(StatusCode::OK)
}

/// GET `/ping` - backend connectivity probe.
pub async fn ping(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    state
        .service
        .ping()
        .await
        .map_err(|_| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "failed storage connection"))?;
    Ok(StatusCode::OK)
}
