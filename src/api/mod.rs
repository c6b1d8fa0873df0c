//! JSON API consumed by the dashboard.

pub mod auth;
pub mod health;
pub mod issues;
pub mod settings;
pub mod sync;
pub mod whitelist;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::TokenKeys;
use crate::crypto::CredentialCipher;
use crate::db::Database;
use crate::http::FetchError;
use crate::sync::SyncGate;

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub gate: SyncGate,
    pub cipher: CredentialCipher,
    pub tokens: TokenKeys,
    pub bcrypt_cost: u32,
}

/// Rejected user input on a write endpoint.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ValidationError {
    #[error("{field}: {reason}")]
    InvalidUrl { field: &'static str, reason: String },

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("{field} must be between {min} and {max}")]
    OutOfRange {
        field: &'static str,
        min: u32,
        max: u32,
    },

    #[error("{0}")]
    Invalid(String),
}

impl ValidationError {
    pub fn from_fetch(field: &'static str, err: FetchError) -> Self {
        match err {
            FetchError::InvalidUrl { reason, .. } => Self::InvalidUrl { field, reason },
            other => Self::InvalidUrl {
                field,
                reason: other.to_string(),
            },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Validation(err) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", err.to_string()),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            ApiError::Internal(err) => {
                tracing::error!(error = %format!("{:#}", err), "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message, "code": code }))).into_response()
    }
}

pub fn api_router() -> Router<AppState> {
    Router::new()
        .merge(auth::router())
        .merge(issues::router())
        .merge(sync::router())
        .merge(settings::router())
        .merge(whitelist::router())
}

/// Full application: health endpoints, `/api`, and the HTTP layers.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .nest("/api", api_router())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
pub mod test_support {
    //! Router harness for handler tests.

    use super::*;
    use crate::sync::testing::{test_cipher, FakeConnector};
    use crate::sync::SyncOrchestrator;
    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    pub struct TestApp {
        pub state: AppState,
        pub app: Router,
    }

    impl TestApp {
        pub async fn new(connector: FakeConnector) -> Self {
            let db = Database::in_memory().await.unwrap();
            let cipher = test_cipher();
            let orchestrator = SyncOrchestrator::new(
                db.clone(),
                Arc::new(connector),
                cipher.clone(),
                Duration::from_secs(5),
                false,
            );
            let state = AppState {
                db,
                gate: SyncGate::new(orchestrator, Duration::from_secs(300)),
                cipher,
                tokens: TokenKeys::new("test-secret", Duration::from_secs(3600)),
                bcrypt_cost: 4,
            };
            let app = build_app(state.clone());
            Self { state, app }
        }

        pub async fn request(
            &self,
            method: Method,
            uri: &str,
            token: Option<&str>,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(token) = token {
                builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
            }
            let request = match body {
                Some(body) => builder
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };

            let response = self.app.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let value = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, value)
        }

        pub async fn user_id(&self, username: &str) -> uuid::Uuid {
            self.state
                .db
                .users()
                .find_by_username(username)
                .await
                .unwrap()
                .unwrap()
                .id
        }

        /// Point both services of the token's user at placeholder hosts.
        pub async fn connect_services(&self, token: &str) {
            let body = serde_json::json!({
                "jellyfin": { "base_url": "http://jellyfin.local:8096", "api_key": "jf-key" },
                "jellyseerr": { "base_url": "http://jellyseerr.local:5055", "api_key": "js-key" },
            });
            let (status, _) = self
                .request(Method::PUT, "/api/settings/services", Some(token), Some(body))
                .await;
            assert_eq!(status, StatusCode::OK);
        }

        /// Register and log in, returning the bearer token.
        pub async fn login(&self, username: &str) -> String {
            let credentials = serde_json::json!({ "username": username, "password": "password123" });
            let (status, _) = self
                .request(Method::POST, "/api/auth/register", None, Some(credentials.clone()))
                .await;
            assert_eq!(status, StatusCode::CREATED);

            let (status, body) = self
                .request(Method::POST, "/api/auth/login", None, Some(credentials))
                .await;
            assert_eq!(status, StatusCode::OK);
            body["access_token"].as_str().unwrap().to_string()
        }
    }
}
