//! Per-user thresholds and upstream service connections.
//!
//! Everything is validated here, at save time, so a bad URL or empty key can
//! never reach the sync path.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::{ApiError, ApiResult, AppState, ValidationError};
use crate::auth::AuthUser;
use crate::db::StoredConnection;
use crate::http::parse_base_url;
use crate::models::{ServiceKind, UserThresholds};

const MONTHS_MAX: u32 = 120;
const OVERSIZED_GB_MAX: u32 = 10_000;
const RECENT_RELEASE_DAYS_MAX: u32 = 365;

fn check_range(field: &'static str, value: u32, min: u32, max: u32) -> Result<(), ValidationError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange { field, min, max })
    }
}

pub fn validate_thresholds(t: &UserThresholds) -> Result<(), ValidationError> {
    check_range("staleness_months", t.staleness_months, 1, MONTHS_MAX)?;
    check_range("minimum_age_months", t.minimum_age_months, 0, MONTHS_MAX)?;
    check_range("oversized_gb", t.oversized_gb, 1, OVERSIZED_GB_MAX)?;
    check_range("recent_release_days", t.recent_release_days, 0, RECENT_RELEASE_DAYS_MAX)?;
    Ok(())
}

async fn get_thresholds(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<UserThresholds>> {
    Ok(Json(state.db.thresholds().get(user.user_id).await?))
}

async fn put_thresholds(
    State(state): State<AppState>,
    user: AuthUser,
    Json(thresholds): Json<UserThresholds>,
) -> ApiResult<Json<UserThresholds>> {
    validate_thresholds(&thresholds)?;
    state.db.thresholds().update(user.user_id, &thresholds).await?;
    info!(user_id = %user.user_id, "Thresholds updated");
    Ok(Json(thresholds))
}

#[derive(Debug, Deserialize)]
pub struct ServiceInput {
    pub base_url: String,
    /// Omit to keep the stored key
    pub api_key: Option<String>,
    pub external_user_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServicesInput {
    pub jellyfin: Option<ServiceInput>,
    pub jellyseerr: Option<ServiceInput>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ServiceView {
    pub base_url: String,
    /// Only the last four characters are ever shown
    pub api_key: String,
    pub external_user_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ServicesView {
    pub jellyfin: Option<ServiceView>,
    pub jellyseerr: Option<ServiceView>,
}

pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}

async fn load_view(state: &AppState, user_id: Uuid, service: ServiceKind) -> ApiResult<Option<ServiceView>> {
    let Some(stored) = state.db.services().get(user_id, service).await? else {
        return Ok(None);
    };

    let api_key = state
        .cipher
        .decrypt(&stored.api_key_encrypted, &stored.api_key_nonce)
        .map(|key| mask_key(&key))
        .unwrap_or_else(|_| "****".to_string());

    Ok(Some(ServiceView {
        base_url: stored.base_url,
        api_key,
        external_user_id: stored.external_user_id,
        updated_at: stored.updated_at,
    }))
}

async fn services_view(state: &AppState, user_id: Uuid) -> ApiResult<ServicesView> {
    Ok(ServicesView {
        jellyfin: load_view(state, user_id, ServiceKind::Jellyfin).await?,
        jellyseerr: load_view(state, user_id, ServiceKind::Jellyseerr).await?,
    })
}

async fn get_services(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<ServicesView>> {
    Ok(Json(services_view(&state, user.user_id).await?))
}

/// Validate one connection and encrypt its key. A missing key falls back to
/// the one already stored.
fn prepare(
    state: &AppState,
    service: ServiceKind,
    input: ServiceInput,
    existing: Option<StoredConnection>,
) -> ApiResult<StoredConnection> {
    let (url_field, key_field) = match service {
        ServiceKind::Jellyfin => ("jellyfin.base_url", "jellyfin.api_key"),
        ServiceKind::Jellyseerr => ("jellyseerr.base_url", "jellyseerr.api_key"),
    };

    let base_url = parse_base_url(&input.base_url)
        .map_err(|e| ValidationError::from_fetch(url_field, e))?
        .as_str()
        .trim_end_matches('/')
        .to_string();

    let external_user_id = input
        .external_user_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty());

    let (api_key_encrypted, api_key_nonce) = match input.api_key.map(|k| k.trim().to_string()) {
        Some(key) if key.is_empty() => return Err(ValidationError::Empty(key_field).into()),
        Some(key) => state.cipher.encrypt(&key)?,
        None => match existing {
            Some(stored) => (stored.api_key_encrypted, stored.api_key_nonce),
            None => return Err(ValidationError::Empty(key_field).into()),
        },
    };

    Ok(StoredConnection {
        base_url,
        api_key_encrypted,
        api_key_nonce,
        external_user_id,
        updated_at: Utc::now(),
    })
}

async fn put_services(
    State(state): State<AppState>,
    user: AuthUser,
    Json(input): Json<ServicesInput>,
) -> ApiResult<Json<ServicesView>> {
    let services = state.db.services();
    let mut prepared = Vec::new();

    // Validate both before writing either
    for (service, input) in [
        (ServiceKind::Jellyfin, input.jellyfin),
        (ServiceKind::Jellyseerr, input.jellyseerr),
    ] {
        if let Some(input) = input {
            let existing = services.get(user.user_id, service).await?;
            prepared.push((service, prepare(&state, service, input, existing)?));
        }
    }

    for (service, connection) in &prepared {
        services.upsert(user.user_id, *service, connection).await?;
        info!(user_id = %user.user_id, "{} connection saved", service);
    }

    Ok(Json(services_view(&state, user.user_id).await?))
}

async fn delete_service(
    State(state): State<AppState>,
    user: AuthUser,
    Path(service): Path<ServiceKind>,
) -> ApiResult<StatusCode> {
    if state.db.services().delete(user.user_id, service).await? {
        info!(user_id = %user.user_id, "{} connection removed", service);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("{} is not configured", service)))
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/settings/thresholds", get(get_thresholds).put(put_thresholds))
        .route("/settings/services", get(get_services).put(put_services))
        .route("/settings/services/{service}", axum::routing::delete(delete_service))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::TestApp;
    use crate::sync::testing::FakeConnector;
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[test]
    fn keys_are_masked() {
        assert_eq!(mask_key("abcdef123456"), "****3456");
        assert_eq!(mask_key("abc"), "****");
    }

    #[test]
    fn threshold_ranges() {
        assert!(validate_thresholds(&UserThresholds::default()).is_ok());

        let zero_staleness = UserThresholds {
            staleness_months: 0,
            ..UserThresholds::default()
        };
        assert_eq!(
            validate_thresholds(&zero_staleness),
            Err(ValidationError::OutOfRange {
                field: "staleness_months",
                min: 1,
                max: MONTHS_MAX
            })
        );

        let no_grace = UserThresholds {
            minimum_age_months: 0,
            recent_release_days: 0,
            ..UserThresholds::default()
        };
        assert!(validate_thresholds(&no_grace).is_ok());
    }

    #[tokio::test]
    async fn thresholds_round_trip() {
        let app = TestApp::new(FakeConnector::default()).await;
        let token = app.login("alice").await;

        let (status, body) = app
            .request(Method::GET, "/api/settings/thresholds", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["staleness_months"], 4);
        assert_eq!(body["oversized_gb"], 13);

        let update = json!({
            "staleness_months": 6,
            "minimum_age_months": 2,
            "oversized_gb": 20,
            "exclude_unreleased": false,
            "recent_release_days": 0
        });
        let (status, _) = app
            .request(Method::PUT, "/api/settings/thresholds", Some(&token), Some(update.clone()))
            .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = app
            .request(Method::GET, "/api/settings/thresholds", Some(&token), None)
            .await;
        assert_eq!(body, update);

        let (status, body) = app
            .request(
                Method::PUT,
                "/api/settings/thresholds",
                Some(&token),
                Some(json!({
                    "staleness_months": 0,
                    "minimum_age_months": 2,
                    "oversized_gb": 20,
                    "exclude_unreleased": false,
                    "recent_release_days": 0
                })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn services_are_validated_and_masked() {
        let app = TestApp::new(FakeConnector::default()).await;
        let token = app.login("alice").await;

        let (status, body) = app
            .request(
                Method::PUT,
                "/api/settings/services",
                Some(&token),
                Some(json!({ "jellyfin": { "base_url": "ftp://nas", "api_key": "k" } })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("jellyfin.base_url"));

        let (status, _) = app
            .request(
                Method::PUT,
                "/api/settings/services",
                Some(&token),
                Some(json!({ "jellyseerr": { "base_url": "http://seerr:5055", "api_key": "  " } })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app
            .request(
                Method::PUT,
                "/api/settings/services",
                Some(&token),
                Some(json!({ "jellyfin": { "base_url": "http://jf:8096" } })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        app.connect_services(&token).await;
        let (status, body) = app
            .request(Method::GET, "/api/settings/services", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["jellyfin"]["base_url"], "http://jellyfin.local:8096");
        assert_eq!(body["jellyfin"]["api_key"], "****-key");
        assert_eq!(body["jellyseerr"]["api_key"], "****-key");

        // Changing only the URL keeps the stored key
        let (status, body) = app
            .request(
                Method::PUT,
                "/api/settings/services",
                Some(&token),
                Some(json!({ "jellyfin": { "base_url": "https://jf.example.com/" } })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["jellyfin"]["base_url"], "https://jf.example.com");
        assert_eq!(body["jellyfin"]["api_key"], "****-key");

        let user_id = app.user_id("alice").await;
        let users = app.state.db.services().fully_configured_users().await.unwrap();
        assert_eq!(users, vec![user_id]);

        let (status, _) = app
            .request(Method::DELETE, "/api/settings/services/jellyseerr", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, body) = app
            .request(Method::GET, "/api/settings/services", Some(&token), None)
            .await;
        assert!(body["jellyseerr"].is_null());
        assert!(app.state.db.services().fully_configured_users().await.unwrap().is_empty());

        let (status, _) = app
            .request(Method::DELETE, "/api/settings/services/jellyseerr", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
