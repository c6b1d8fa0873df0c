//! Whitelist management. Expired entries are still listed, flagged as such.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{routing::delete, routing::get, Json, Router};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{ApiError, ApiResult, AppState, ValidationError};
use crate::auth::AuthUser;
use crate::models::{WhitelistEntry, WhitelistKind};

#[derive(Debug, Serialize)]
pub struct WhitelistView {
    #[serde(flatten)]
    pub entry: WhitelistEntry,
    pub expired: bool,
}

#[derive(Debug, Deserialize)]
pub struct AddEntry {
    pub item_id: String,
    pub item_name: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Shorthand for `expires_at = now + days`
    pub expires_in_days: Option<u32>,
}

async fn list(
    State(state): State<AppState>,
    user: AuthUser,
    Path(kind): Path<WhitelistKind>,
) -> ApiResult<Json<Vec<WhitelistView>>> {
    let now = Utc::now();
    let entries = state.db.whitelist().list(user.user_id, Some(kind)).await?;

    Ok(Json(
        entries
            .into_iter()
            .map(|entry| WhitelistView {
                expired: !entry.is_active(now),
                entry,
            })
            .collect(),
    ))
}

async fn add(
    State(state): State<AppState>,
    user: AuthUser,
    Path(kind): Path<WhitelistKind>,
    Json(input): Json<AddEntry>,
) -> ApiResult<(StatusCode, Json<WhitelistView>)> {
    let item_id = input.item_id.trim().to_string();
    if item_id.is_empty() {
        return Err(ValidationError::Empty("item_id").into());
    }

    let now = Utc::now();
    let expires_at = match (input.expires_at, input.expires_in_days) {
        (Some(_), Some(_)) => {
            return Err(ValidationError::Invalid(
                "give either expires_at or expires_in_days, not both".to_string(),
            )
            .into())
        }
        (Some(at), None) => Some(at),
        (None, Some(days)) => Some(now + Duration::days(i64::from(days))),
        (None, None) => None,
    };

    // Fall back to the cached name so expired entries stay readable
    let item_name = match input.item_name.filter(|n| !n.trim().is_empty()) {
        Some(name) => Some(name),
        None => state
            .db
            .media_items()
            .get(user.user_id, &item_id)
            .await?
            .map(|item| item.name),
    };

    let entry = WhitelistEntry {
        list: kind,
        item_id,
        item_name,
        created_at: now,
        expires_at,
    };
    state.db.whitelist().add(user.user_id, &entry).await?;
    info!(user_id = %user.user_id, list = %kind, item_id = %entry.item_id, "Whitelist entry added");

    Ok((
        StatusCode::CREATED,
        Json(WhitelistView {
            expired: !entry.is_active(now),
            entry,
        }),
    ))
}

async fn remove(
    State(state): State<AppState>,
    user: AuthUser,
    Path((kind, item_id)): Path<(WhitelistKind, String)>,
) -> ApiResult<StatusCode> {
    if state.db.whitelist().remove(user.user_id, kind, &item_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("'{}' is not on the {} list", item_id, kind)))
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/whitelist/{kind}", get(list).post(add))
        .route("/whitelist/{kind}/{item_id}", delete(remove))
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::TestApp;
    use crate::sync::testing::{sample_item, FakeConnector};
    use axum::http::{Method, StatusCode};
    use chrono::{Duration, Utc};
    use serde_json::json;

    #[tokio::test]
    async fn add_list_remove_round_trip() {
        let app = TestApp::new(FakeConnector::default()).await;
        let token = app.login("alice").await;

        let (status, body) = app
            .request(
                Method::POST,
                "/api/whitelist/protected",
                Some(&token),
                Some(json!({ "item_id": "m1", "item_name": "Heat" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["expired"], false);
        assert!(body["expires_at"].is_null());

        let (_, body) = app
            .request(Method::GET, "/api/whitelist/protected", Some(&token), None)
            .await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["item_id"], "m1");

        let (_, body) = app
            .request(Method::GET, "/api/whitelist/french_only", Some(&token), None)
            .await;
        assert_eq!(body, json!([]));

        let (status, _) = app
            .request(Method::DELETE, "/api/whitelist/protected/m1", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = app
            .request(Method::DELETE, "/api/whitelist/protected/m1", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = app
            .request(Method::GET, "/api/whitelist/protected", Some(&token), None)
            .await;
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn expired_entries_are_flagged_and_stop_protecting() {
        let mut old = sample_item("m1");
        old.added_at = Utc::now() - Duration::days(400);
        let app = TestApp::new(FakeConnector::with_data(vec![old], vec![])).await;
        let token = app.login("alice").await;
        app.connect_services(&token).await;
        let user_id = app.user_id("alice").await;
        app.state.gate.orchestrator().run(user_id).await;

        let (status, body) = app
            .request(
                Method::POST,
                "/api/whitelist/protected",
                Some(&token),
                Some(json!({ "item_id": "m1", "expires_at": Utc::now() - Duration::days(1) })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["expired"], true);
        assert_eq!(body["item_name"], "Movie m1");

        let (_, body) = app
            .request(Method::GET, "/api/issues?category=stale", Some(&token), None)
            .await;
        assert_eq!(body["total"], 1);

        let (_, _) = app
            .request(
                Method::POST,
                "/api/whitelist/protected",
                Some(&token),
                Some(json!({ "item_id": "m1", "expires_in_days": 30 })),
            )
            .await;
        let (_, body) = app
            .request(Method::GET, "/api/issues?category=stale", Some(&token), None)
            .await;
        assert_eq!(body["total"], 0);
    }

    #[tokio::test]
    async fn unknown_lists_and_empty_ids_are_rejected() {
        let app = TestApp::new(FakeConnector::default()).await;
        let token = app.login("alice").await;

        let (status, _) = app
            .request(Method::GET, "/api/whitelist/favourites", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app
            .request(
                Method::POST,
                "/api/whitelist/language_exempt",
                Some(&token),
                Some(json!({ "item_id": "  " })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
