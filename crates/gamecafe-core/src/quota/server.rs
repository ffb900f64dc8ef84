//! HTTP surface of the Quota Store.
//!
//! ```text
//! GET   /health
//! GET   /quota?userId=..        -> { totalMinutes, usedMinutes, updatedAt }
//! PATCH /quota?userId=..        { usedMinutes, timestamp } -> { acknowledged }
//! PATCH /quota?userId=..        { minutesToAdd }           -> quota
//! POST  /quota/reset?userId=..  -> quota
//! ```

use std::future::Future;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::{Ack, QuotaPatch, QuotaService, UserQuota};
use crate::error::{DatabaseError, QuotaError};

#[derive(Debug, Deserialize)]
pub struct QuotaQuery {
    #[serde(rename = "userId", default)]
    pub user_id: String,
}

enum ApiError {
    Quota(QuotaError),
    MalformedBody(String),
}

impl From<QuotaError> for ApiError {
    fn from(err: QuotaError) -> Self {
        ApiError::Quota(err)
    }
}

impl QuotaError {
    fn status(&self) -> StatusCode {
        match self {
            QuotaError::Unauthorized => StatusCode::UNAUTHORIZED,
            QuotaError::Forbidden { .. } => StatusCode::FORBIDDEN,
            QuotaError::NotFound { .. } => StatusCode::NOT_FOUND,
            QuotaError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            QuotaError::Conflict { .. } => StatusCode::CONFLICT,
            QuotaError::Transport(_) | QuotaError::Decode(_) => StatusCode::BAD_GATEWAY,
            QuotaError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for QuotaError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self, "quota request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Quota(err) => err.into_response(),
            ApiError::MalformedBody(message) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "error": format!("malformed body: {message}") })),
            )
                .into_response(),
        }
    }
}

/// Routes for `service`.
pub fn router(service: Arc<QuotaService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/quota", get(get_quota).patch(patch_quota))
        .route("/quota/reset", post(reset_quota))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// Serve `service` on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, service: Arc<QuotaService>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!(%addr, "quota store listening");
    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn get_quota(
    State(service): State<Arc<QuotaService>>,
    Query(query): Query<QuotaQuery>,
    headers: HeaderMap,
) -> Result<Json<UserQuota>, ApiError> {
    let user_id = authorized_user(&service, &query, &headers)?.to_string();
    let quota = on_ledger(&service, move |service| service.fetch(&user_id)).await?;
    Ok(Json(quota))
}

async fn patch_quota(
    State(service): State<Arc<QuotaService>>,
    Query(query): Query<QuotaQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let user_id = authorized_user(&service, &query, &headers)?.to_string();
    let patch: QuotaPatch =
        serde_json::from_slice(&body).map_err(|e| ApiError::MalformedBody(e.to_string()))?;

    match patch {
        QuotaPatch::Usage(report) => {
            on_ledger(&service, move |service| {
                service.report_usage(&user_id, report.used_minutes, report.timestamp)
            })
            .await?;
            Ok(Json(Ack { acknowledged: true }).into_response())
        }
        QuotaPatch::Grant(grant) => {
            let quota = on_ledger(&service, move |service| {
                service.add_minutes(&user_id, grant.minutes_to_add)
            })
            .await?;
            Ok(Json(quota).into_response())
        }
    }
}

async fn reset_quota(
    State(service): State<Arc<QuotaService>>,
    Query(query): Query<QuotaQuery>,
    headers: HeaderMap,
) -> Result<Json<UserQuota>, ApiError> {
    let user_id = authorized_user(&service, &query, &headers)?.to_string();
    let quota = on_ledger(&service, move |service| service.reset_usage(&user_id)).await?;
    Ok(Json(quota))
}

/// Run a ledger call on the blocking pool. SQLite may wait out a busy
/// lock held by another process.
async fn on_ledger<T, F>(service: &Arc<QuotaService>, call: F) -> Result<T, QuotaError>
where
    T: Send + 'static,
    F: FnOnce(&QuotaService) -> Result<T, QuotaError> + Send + 'static,
{
    let service = Arc::clone(service);
    tokio::task::spawn_blocking(move || call(&service))
        .await
        .map_err(|e| QuotaError::Storage(DatabaseError::QueryFailed(e.to_string())))?
}

fn authorized_user<'q>(
    service: &QuotaService,
    query: &'q QuotaQuery,
    headers: &HeaderMap,
) -> Result<&'q str, QuotaError> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);
    service.authorize(&query.user_id, bearer)?;
    if query.user_id.is_empty() {
        return Err(QuotaError::invalid("userId", "missing"));
    }
    Ok(&query.user_id)
}
