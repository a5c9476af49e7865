//! # whisper-admin
//!
//! The thin HTTP surface next to the relay: liveness and stats for
//! monitoring, TURN credential minting, and the moderation endpoints.
//! Moderation actions flow through the relay's own teardown paths, so a
//! ban or forced deletion honors exactly the invariants self-service
//! deletion does.
//!
//! Everything except `/health` requires the shared API key in the
//! `x-api-key` header; an empty configured key rejects every request.

use std::sync::Arc;

use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use whisper_common::ids::WhisperId;
use whisper_common::turn;
use whisper_relay::{account, force_disconnect, RelayState};
use whisper_store::moderation::Report;

/// Admin-surface state: the relay components plus the shared key.
#[derive(Clone)]
pub struct AdminState {
    pub relay: Arc<RelayState>,
    pub api_key: String,
}

/// Errors surfaced as JSON bodies with an HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Invalid Whisper ID")]
    InvalidId,
    #[error("TURN credentials are not configured")]
    TurnNotConfigured,
    #[error("Store error: {0}")]
    Store(#[from] redis::RedisError),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    message: String,
}

impl AdminError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::InvalidId => StatusCode::BAD_REQUEST,
            Self::TurnNotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::InvalidId => "INVALID_ID",
            Self::TurnNotConfigured => "TURN_NOT_CONFIGURED",
            Self::Store(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        // Don't leak store details to callers.
        let message = match &self {
            AdminError::Store(e) => {
                tracing::error!("Store error: {e}");
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        };
        let body = ErrorBody {
            error: self.error_code().to_string(),
            message,
        };
        (self.status_code(), Json(body)).into_response()
    }
}

type AdminResult<T> = Result<T, AdminError>;

/// Build the admin router.
pub fn build_router(state: AdminState) -> Router {
    let gated = Router::new()
        .route("/stats", get(stats))
        .route("/turn-credentials", get(turn_credentials))
        .route("/admin/ban/{whisper_id}", post(ban_user).delete(unban_user))
        .route("/admin/users/{whisper_id}", delete(delete_user))
        .route("/admin/reports", get(reports))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(gated)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Shared-key gate for everything but `/health`.
async fn require_api_key(
    State(state): State<AdminState>,
    request: Request,
    next: Next,
) -> Result<Response, AdminError> {
    let presented = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .ok_or(AdminError::Unauthorized)?;
    if state.api_key.is_empty() || presented != state.api_key {
        return Err(AdminError::Unauthorized);
    }
    Ok(next.run(request).await)
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

/// GET /health — liveness plus store reachability.
async fn health(State(state): State<AdminState>) -> Json<HealthResponse> {
    let store_ok = state.relay.store.ping().await;
    Json(HealthResponse {
        status: if store_ok { "healthy".into() } else { "degraded".into() },
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    /// Sessions bound on this instance.
    active_connections: usize,
    /// Users authenticated within the last 24 hours, cluster-wide.
    registered_users: usize,
    /// Pending call offers parked on this instance.
    pending_call_offers: usize,
}

/// GET /stats.
async fn stats(State(state): State<AdminState>) -> AdminResult<Json<StatsResponse>> {
    Ok(Json(StatsResponse {
        active_connections: state.relay.connections.active_count().await,
        registered_users: state.relay.store.registered_count().await?,
        pending_call_offers: state.relay.offers.len().await,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TurnQuery {
    whisper_id: String,
}

/// GET /turn-credentials?whisperId= — the same minting path the relay
/// uses, for out-of-band provisioning.
async fn turn_credentials(
    State(state): State<AdminState>,
    Query(query): Query<TurnQuery>,
) -> AdminResult<Json<turn::TurnCredentials>> {
    let wid = WhisperId::parse(&query.whisper_id).map_err(|_| AdminError::InvalidId)?;
    let settings = &state.relay.settings;
    if settings.turn_secret.is_empty() {
        return Err(AdminError::TurnNotConfigured);
    }
    Ok(Json(turn::mint(
        &settings.turn_secret,
        &wid,
        chrono::Utc::now().timestamp(),
        settings.turn_ttl_secs,
        settings.turn_urls.clone(),
    )))
}

#[derive(Serialize)]
struct AckResponse {
    success: bool,
}

/// POST /admin/ban/{wid} — flag the account and drop any live socket.
async fn ban_user(
    State(state): State<AdminState>,
    Path(whisper_id): Path<String>,
) -> AdminResult<Json<AckResponse>> {
    let wid = WhisperId::parse(&whisper_id).map_err(|_| AdminError::InvalidId)?;
    state.relay.store.ban(&wid).await?;
    force_disconnect(&state.relay, &wid, 1008, "banned").await;
    tracing::info!(user = %wid, "User banned");
    Ok(Json(AckResponse { success: true }))
}

/// DELETE /admin/ban/{wid}.
async fn unban_user(
    State(state): State<AdminState>,
    Path(whisper_id): Path<String>,
) -> AdminResult<Json<AckResponse>> {
    let wid = WhisperId::parse(&whisper_id).map_err(|_| AdminError::InvalidId)?;
    state.relay.store.unban(&wid).await?;
    Ok(Json(AckResponse { success: true }))
}

/// DELETE /admin/users/{wid} — moderation deletion through the same
/// teardown as self-service: queues, blocks, groups, directories.
async fn delete_user(
    State(state): State<AdminState>,
    Path(whisper_id): Path<String>,
) -> AdminResult<Json<AckResponse>> {
    let wid = WhisperId::parse(&whisper_id).map_err(|_| AdminError::InvalidId)?;
    account::purge_account(&state.relay, &wid).await;
    force_disconnect(&state.relay, &wid, 1000, "account deleted").await;
    tracing::info!(user = %wid, "Account deleted by moderation");
    Ok(Json(AckResponse { success: true }))
}

/// GET /admin/reports — drain the moderation inbox.
async fn reports(State(state): State<AdminState>) -> AdminResult<Json<Vec<Report>>> {
    Ok(Json(state.relay.store.drain_reports().await?))
}
