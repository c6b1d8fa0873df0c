//! Manual refresh and sync status

use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, routing::post, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{ApiResult, AppState};
use crate::auth::AuthUser;
use crate::sync::TriggerOutcome;

#[derive(Debug, Serialize)]
pub struct SyncStatus {
    pub in_progress: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub media_items: i64,
    pub requests: i64,
}

/// 202 when started, 409 while one is running, 429 inside the cooldown. The
/// body is always the tagged outcome.
async fn trigger(State(state): State<AppState>, user: AuthUser) -> ApiResult<Response> {
    let outcome = state.gate.trigger_manual(user.user_id).await?.outcome();

    let response = match outcome {
        TriggerOutcome::Started => (StatusCode::ACCEPTED, Json(outcome)).into_response(),
        TriggerOutcome::AlreadyInProgress => (StatusCode::CONFLICT, Json(outcome)).into_response(),
        TriggerOutcome::RateLimited { retry_after_secs } => {
            let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(outcome)).into_response();
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
            response
        }
    };
    Ok(response)
}

async fn status(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<SyncStatus>> {
    let sync = state.db.sync_state().get(user.user_id).await?;

    Ok(Json(SyncStatus {
        in_progress: sync.in_progress,
        last_synced_at: sync.last_synced_at,
        last_attempt_at: sync.last_attempt_at,
        last_error: sync.last_error,
        media_items: state.db.media_items().count(user.user_id).await?,
        requests: state.db.requests().count(user.user_id).await?,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sync", post(trigger))
        .route("/sync/status", get(status))
}
