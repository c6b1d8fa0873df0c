//! Registration and login

use axum::extract::State;
use axum::http::StatusCode;
use axum::{routing::get, routing::post, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::{ApiError, ApiResult, AppState, ValidationError};
use crate::auth::{self, AuthUser, IssuedToken};

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisteredUser {
    pub id: Uuid,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

async fn register(
    State(state): State<AppState>,
    Json(input): Json<Credentials>,
) -> ApiResult<(StatusCode, Json<RegisteredUser>)> {
    let username = input.username.trim();
    if username.is_empty() {
        return Err(ValidationError::Empty("username").into());
    }
    if input.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::Invalid(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        ))
        .into());
    }

    let cost = state.bcrypt_cost;
    let password = input.password.clone();
    let hash = tokio::task::spawn_blocking(move || auth::hash_password(&password, cost))
        .await
        .map_err(anyhow::Error::from)??;

    let user = state
        .db
        .users()
        .create(username, &hash)
        .await?
        .ok_or_else(|| ApiError::Conflict(format!("username '{}' is taken", username)))?;

    info!(user_id = %user.id, "Registered user {}", user.username);
    Ok((
        StatusCode::CREATED,
        Json(RegisteredUser {
            id: user.id,
            username: user.username,
            created_at: user.created_at,
        }),
    ))
}

async fn login(
    State(state): State<AppState>,
    Json(input): Json<Credentials>,
) -> ApiResult<Json<IssuedToken>> {
    let rejected = || ApiError::Unauthorized("Invalid username or password".into());

    let user = state
        .db
        .users()
        .find_by_username(input.username.trim())
        .await?
        .ok_or_else(rejected)?;

    let hash = user.password_hash.clone();
    let password = input.password;
    let valid = tokio::task::spawn_blocking(move || auth::verify_password(&password, &hash))
        .await
        .map_err(anyhow::Error::from)??;
    if !valid {
        return Err(rejected());
    }

    Ok(Json(state.tokens.issue(&user)?))
}

/// The account behind the bearer token. A token for a deleted account is
/// rejected.
async fn me(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<RegisteredUser>> {
    let record = state
        .db
        .users()
        .get(user.user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized(format!("user '{}' no longer exists", user.username)))?;

    Ok(Json(RegisteredUser {
        id: record.id,
        username: record.username,
        created_at: record.created_at,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/me", get(me))
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::TestApp;
    use crate::sync::testing::FakeConnector;
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn register_then_login() {
        let app = TestApp::new(FakeConnector::default()).await;
        let token = app.login("alice").await;
        assert!(!token.is_empty());

        let (status, body) = app.request(Method::GET, "/api/auth/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], "alice");
        assert!(body.get("password_hash").is_none());

        let (status, body) = app
            .request(Method::GET, "/api/sync/status", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["in_progress"], false);
    }

    #[tokio::test]
    async fn duplicate_usernames_conflict() {
        let app = TestApp::new(FakeConnector::default()).await;
        app.login("alice").await;

        let (status, body) = app
            .request(
                Method::POST,
                "/api/auth/register",
                None,
                Some(json!({ "username": "alice", "password": "another-password" })),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "CONFLICT");
    }

    #[tokio::test]
    async fn bad_credentials_and_missing_tokens_are_unauthorized() {
        let app = TestApp::new(FakeConnector::default()).await;
        app.login("alice").await;

        let (status, _) = app
            .request(
                Method::POST,
                "/api/auth/login",
                None,
                Some(json!({ "username": "alice", "password": "wrong-password" })),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = app.request(Method::GET, "/api/issues", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = app
            .request(Method::GET, "/api/issues", Some("not-a-token"), None)
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn short_passwords_are_rejected() {
        let app = TestApp::new(FakeConnector::default()).await;
        let (status, body) = app
            .request(
                Method::POST,
                "/api/auth/register",
                None,
                Some(json!({ "username": "bob", "password": "short" })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");
    }
}
