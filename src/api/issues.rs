//! Issue listing, summary and the recently-available feed. These endpoints
//! never fail because of an empty cache; they return empty lists instead.

use axum::extract::{Query, State};
use axum::{routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::{ApiResult, AppState};
use crate::auth::AuthUser;
use crate::db::Database;
use crate::issues::{self, EvaluationInput, IssueEntry, IssueQuery, IssueReport, IssueSummary, RecentGroup};

/// Evaluate the user's cached snapshot as of `now`.
pub async fn load_report(db: &Database, user_id: Uuid, now: DateTime<Utc>) -> anyhow::Result<IssueReport> {
    let items = db.media_items().list(user_id).await?;
    let requests = db.requests().list(user_id).await?;
    let whitelist = db.whitelist().list(user_id, None).await?;
    let thresholds = db.thresholds().get(user_id).await?;

    Ok(issues::evaluate(&EvaluationInput {
        items: &items,
        requests: &requests,
        whitelist: &whitelist,
        thresholds: &thresholds,
        now,
    }))
}

/// An entry with the values the list is sortable by pulled to the top.
#[derive(Serialize)]
pub struct IssueView<'a> {
    pub id: String,
    pub name: &'a str,
    pub size_bytes: u64,
    pub date: DateTime<Utc>,
    pub issue_count: usize,
    #[serde(flatten)]
    pub entry: &'a IssueEntry,
}

impl<'a> From<&'a IssueEntry> for IssueView<'a> {
    fn from(entry: &'a IssueEntry) -> Self {
        Self {
            id: entry.id(),
            name: entry.name(),
            size_bytes: entry.size_bytes(),
            date: entry.date(),
            issue_count: entry.issue_count(),
            entry,
        }
    }
}

#[derive(Serialize)]
pub struct IssueList<'a> {
    pub last_synced_at: Option<DateTime<Utc>>,
    pub total: usize,
    pub entries: Vec<IssueView<'a>>,
}

#[derive(Serialize)]
pub struct SummaryResponse {
    pub last_synced_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub summary: IssueSummary,
}

async fn list_issues(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<IssueQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let report = load_report(&state.db, user.user_id, Utc::now()).await?;
    let sync = state.db.sync_state().get(user.user_id).await?;

    let entries: Vec<IssueView<'_>> = report.query(&query).into_iter().map(IssueView::from).collect();
    let body = IssueList {
        last_synced_at: sync.last_synced_at,
        total: entries.len(),
        entries,
    };
    Ok(Json(serde_json::to_value(body).map_err(anyhow::Error::from)?))
}

async fn summary(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<SummaryResponse>> {
    let report = load_report(&state.db, user.user_id, Utc::now()).await?;
    let sync = state.db.sync_state().get(user.user_id).await?;

    Ok(Json(SummaryResponse {
        last_synced_at: sync.last_synced_at,
        summary: report.summary(),
    }))
}

async fn recent(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<Vec<RecentGroup>>> {
    let db = &state.db;
    let items = db.media_items().list(user.user_id).await?;
    let requests = db.requests().list(user.user_id).await?;

    Ok(Json(issues::recently_available(&items, &requests, Utc::now())))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/issues", get(list_issues))
        .route("/issues/summary", get(summary))
        .route("/issues/recent", get(recent))
}
