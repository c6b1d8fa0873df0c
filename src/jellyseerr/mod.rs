use crate::http::{endpoint, parse_base_url, FetchResult, HttpClient};
use crate::models::{RequestKind, RequestRecord, RequestStatus, ServiceConnection};
use crate::sync::RequestTracker;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};
use url::Url;

const AUTH_HEADER: &str = "X-Api-Key";

// Request lifecycle codes
const REQUEST_PENDING: u8 = 1;
const REQUEST_APPROVED: u8 = 2;
const REQUEST_DECLINED: u8 = 3;

// Media availability codes
const MEDIA_PROCESSING: u8 = 3;
const MEDIA_PARTIALLY_AVAILABLE: u8 = 4;
const MEDIA_AVAILABLE: u8 = 5;

pub struct JellyseerrClient {
    http: HttpClient,
    base_url: Url,
    api_key: String,
    page_size: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestPage {
    page_info: PageInfo,
    #[serde(default)]
    results: Vec<JellyseerrRequest>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    #[serde(default)]
    pages: u32,
    #[serde(default)]
    page: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JellyseerrRequest {
    id: i64,
    status: u8,
    #[serde(rename = "type")]
    request_type: String,
    created_at: DateTime<Utc>,
    requested_by: Option<Requester>,
    media: Option<JellyseerrMedia>,
    #[serde(default)]
    seasons: Vec<RequestSeason>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Requester {
    display_name: Option<String>,
    username: Option<String>,
    jellyfin_username: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JellyseerrMedia {
    tmdb_id: Option<i64>,
    #[serde(default)]
    status: u8,
    #[serde(flatten)]
    titles: MediaTitles,
    media_added_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    seasons: Vec<MediaSeason>,
}

/// Title and date fields shared by the embedded media and the details endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaTitles {
    title: Option<String>,
    name: Option<String>,
    original_title: Option<String>,
    original_name: Option<String>,
    release_date: Option<String>,
    first_air_date: Option<String>,
}

impl MediaTitles {
    fn best_title(&self) -> Option<String> {
        [
            &self.title,
            &self.name,
            &self.original_title,
            &self.original_name,
        ]
        .into_iter()
        .flatten()
        .map(|t| t.trim())
        .find(|t| !t.is_empty())
        .map(str::to_string)
    }

    fn release_date(&self, kind: RequestKind) -> Option<NaiveDate> {
        let raw = match kind {
            RequestKind::Movie => self.release_date.as_ref().or(self.first_air_date.as_ref()),
            RequestKind::Tv => self.first_air_date.as_ref().or(self.release_date.as_ref()),
        };
        raw.and_then(|d| NaiveDate::parse_from_str(d.get(..10).unwrap_or(d.as_str()), "%Y-%m-%d").ok())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestSeason {
    season_number: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaSeason {
    season_number: u32,
    #[serde(default)]
    status: u8,
}

impl JellyseerrClient {
    pub fn new(http: HttpClient, connection: &ServiceConnection, page_size: u32) -> FetchResult<Self> {
        Ok(Self {
            http,
            base_url: parse_base_url(&connection.base_url)?,
            api_key: connection.api_key.clone(),
            page_size: page_size.max(1),
        })
    }

    #[instrument(skip(self))]
    async fn fetch_page(&self, skip: u32) -> FetchResult<RequestPage> {
        let url = format!(
            "{}?take={}&skip={}&sort=added",
            endpoint(&self.base_url, "/api/v1/request"),
            self.page_size,
            skip
        );
        self.http.get_json(&url, AUTH_HEADER, &self.api_key).await
    }

    /// Look up titles for a request whose embedded media carries none.
    #[instrument(skip(self))]
    async fn fetch_details(&self, kind: RequestKind, tmdb_id: i64) -> FetchResult<MediaTitles> {
        let path = match kind {
            RequestKind::Movie => format!("/api/v1/movie/{}", tmdb_id),
            RequestKind::Tv => format!("/api/v1/tv/{}", tmdb_id),
        };
        let url = endpoint(&self.base_url, &path);
        self.http.get_json(&url, AUTH_HEADER, &self.api_key).await
    }
}

#[async_trait]
impl RequestTracker for JellyseerrClient {
    #[instrument(skip(self), fields(base_url = %self.base_url))]
    async fn fetch_requests(&self) -> FetchResult<Vec<RequestRecord>> {
        info!("Fetching Jellyseerr requests");

        let mut records = Vec::new();
        let mut skip = 0u32;

        loop {
            let page = self.fetch_page(skip).await?;
            let fetched = page.results.len() as u32;
            debug!("Fetched {} requests at offset {}", fetched, skip);

            for raw in page.results {
                let Some(kind) = RequestKind::parse(&raw.request_type) else {
                    warn!("Skipping request {} of unknown type '{}'", raw.id, raw.request_type);
                    continue;
                };

                let embedded = raw.media.clone().unwrap_or_default();
                let needs_details = embedded.titles.best_title().is_none()
                    || embedded.titles.release_date(kind).is_none();

                let details = match embedded.tmdb_id {
                    Some(tmdb_id) if needs_details => match self.fetch_details(kind, tmdb_id).await {
                        Ok(details) => Some(details),
                        Err(e) => {
                            warn!("Details lookup for request {} failed: {}", raw.id, e);
                            None
                        }
                    },
                    _ => None,
                };

                records.push(to_record(raw, kind, details.as_ref()));
            }

            match next_skip(page.page_info, skip, fetched, self.page_size) {
                Some(next) => skip = next,
                None => break,
            }
        }

        info!("Retrieved {} Jellyseerr requests", records.len());
        Ok(records)
    }
}

/// Offset of the following page, or `None` once the listing is exhausted.
fn next_skip(info: PageInfo, skip: u32, fetched: u32, take: u32) -> Option<u32> {
    if fetched == 0 || fetched < take {
        return None;
    }
    if info.pages > 0 && info.page >= info.pages {
        return None;
    }
    Some(skip + fetched)
}

fn map_status(request_status: u8, media_status: u8) -> RequestStatus {
    match (request_status, media_status) {
        (_, MEDIA_AVAILABLE) => RequestStatus::Available,
        (_, MEDIA_PARTIALLY_AVAILABLE) => RequestStatus::PartiallyAvailable,
        (REQUEST_DECLINED, _) => RequestStatus::Declined,
        (REQUEST_PENDING, _) => RequestStatus::Pending,
        (REQUEST_APPROVED, MEDIA_PROCESSING) => RequestStatus::Approved,
        _ => RequestStatus::Unavailable,
    }
}

fn to_record(raw: JellyseerrRequest, kind: RequestKind, details: Option<&MediaTitles>) -> RequestRecord {
    let media = raw.media.unwrap_or_default();
    let status = map_status(raw.status, media.status);

    let title = media
        .titles
        .best_title()
        .or_else(|| details.and_then(MediaTitles::best_title))
        .unwrap_or_else(|| match media.tmdb_id {
            Some(tmdb_id) => format!("TMDB {}", tmdb_id),
            None => format!("Request #{}", raw.id),
        });

    let release_date = media
        .titles
        .release_date(kind)
        .or_else(|| details.and_then(|d| d.release_date(kind)));

    let requested_by = raw
        .requested_by
        .and_then(|r| {
            [r.display_name, r.username, r.jellyfin_username, r.email]
                .into_iter()
                .flatten()
                .find(|n| !n.trim().is_empty())
        })
        .unwrap_or_else(|| "Unknown".to_string());

    let available_at = match status {
        RequestStatus::Available | RequestStatus::PartiallyAvailable => {
            media.media_added_at.or(media.updated_at)
        }
        _ => None,
    };

    let missing_seasons = match kind {
        RequestKind::Tv => {
            let mut missing: Vec<u32> = raw
                .seasons
                .iter()
                .map(|s| s.season_number)
                .filter(|n| {
                    !media
                        .seasons
                        .iter()
                        .any(|s| s.season_number == *n && s.status == MEDIA_AVAILABLE)
                })
                .collect();
            missing.sort_unstable();
            missing.dedup();
            Some(missing)
        }
        RequestKind::Movie => None,
    };

    RequestRecord {
        external_id: raw.id,
        title,
        kind,
        status,
        requested_by,
        created_at: raw.created_at,
        release_date,
        available_at,
        tmdb_id: media.tmdb_id,
        missing_seasons,
    }
}
