use crate::http::{endpoint, parse_base_url, FetchError, FetchResult, HttpClient};
use crate::models::{LanguageGroup, MediaItem, MediaKind, ServiceConnection};
use crate::sync::MediaServer;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, info, instrument, warn};
use url::Url;

const AUTH_HEADER: &str = "X-Emby-Token";
const ITEM_FIELDS: &str = "MediaSources,Path,DateCreated,ProviderIds,MediaStreams";

pub struct JellyfinClient {
    http: HttpClient,
    base_url: Url,
    api_key: String,
    user_id: Option<String>,
    page_size: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct JellyfinUser {
    id: String,
    name: Option<String>,
    policy: Option<JellyfinPolicy>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct JellyfinPolicy {
    #[serde(default)]
    is_administrator: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ItemsResponse {
    #[serde(default)]
    items: Vec<JellyfinItem>,
    total_record_count: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct JellyfinItem {
    id: String,
    name: Option<String>,
    #[serde(rename = "Type")]
    item_type: String,
    production_year: Option<i32>,
    date_created: Option<DateTime<Utc>>,
    path: Option<String>,
    series_id: Option<String>,
    index_number: Option<u32>,
    parent_index_number: Option<u32>,
    provider_ids: Option<HashMap<String, String>>,
    user_data: Option<UserData>,
    #[serde(default)]
    media_sources: Vec<MediaSource>,
    #[serde(default)]
    media_streams: Vec<MediaStream>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UserData {
    #[serde(default)]
    played: bool,
    play_count: Option<u32>,
    last_played_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MediaSource {
    name: Option<String>,
    size: Option<u64>,
    #[serde(default)]
    media_streams: Vec<MediaStream>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MediaStream {
    #[serde(rename = "Type")]
    stream_type: String,
    language: Option<String>,
}

impl JellyfinClient {
    pub fn new(http: HttpClient, connection: &ServiceConnection, page_size: u32) -> FetchResult<Self> {
        Ok(Self {
            http,
            base_url: parse_base_url(&connection.base_url)?,
            api_key: connection.api_key.clone(),
            user_id: connection.external_user_id.clone(),
            page_size: page_size.max(1),
        })
    }

    /// The configured user, or the first administrator on the server.
    #[instrument(skip(self))]
    async fn resolve_user_id(&self) -> FetchResult<String> {
        if let Some(ref user_id) = self.user_id {
            return Ok(user_id.clone());
        }

        let url = endpoint(&self.base_url, "/Users");
        let users: Vec<JellyfinUser> = self.http.get_json(&url, AUTH_HEADER, &self.api_key).await?;

        let chosen = users
            .iter()
            .find(|u| u.policy.as_ref().is_some_and(|p| p.is_administrator))
            .or_else(|| users.first())
            .ok_or_else(|| FetchError::Malformed {
                url: url.clone(),
                reason: "server returned no users".to_string(),
            })?;

        debug!("Reading watch state of Jellyfin user {:?}", chosen.name);
        Ok(chosen.id.clone())
    }

    #[instrument(skip(self))]
    async fn fetch_raw_items(&self, user_id: &str) -> FetchResult<Vec<JellyfinItem>> {
        let mut items = Vec::new();
        let mut start_index = 0u32;

        loop {
            let url = format!(
                "{}?Recursive=true&IncludeItemTypes=Movie,Series,Episode&Fields={}&EnableUserData=true&StartIndex={}&Limit={}",
                endpoint(
                    &self.base_url,
                    &format!("/Users/{}/Items", urlencoding::encode(user_id))
                ),
                ITEM_FIELDS,
                start_index,
                self.page_size
            );

            let page: ItemsResponse = self.http.get_json(&url, AUTH_HEADER, &self.api_key).await?;
            let fetched = page.items.len() as u32;
            items.extend(page.items);

            let total = page.total_record_count.unwrap_or(0);
            if fetched < self.page_size || (total > 0 && items.len() as u32 >= total) {
                break;
            }
            start_index += fetched;
        }

        Ok(items)
    }
}

#[async_trait]
impl MediaServer for JellyfinClient {
    #[instrument(skip(self), fields(base_url = %self.base_url))]
    async fn fetch_items(&self) -> FetchResult<Vec<MediaItem>> {
        info!("Fetching Jellyfin library");

        let user_id = self.resolve_user_id().await?;
        let raw = self.fetch_raw_items(&user_id).await?;
        let items = fold_items(raw);

        info!("Retrieved {} Jellyfin items", items.len());
        Ok(items)
    }
}

/// Turn the flat item listing into movies and series, rolling every episode
/// up into its series.
fn fold_items(raw: Vec<JellyfinItem>) -> Vec<MediaItem> {
    let mut episodes: HashMap<String, Vec<JellyfinItem>> = HashMap::new();
    let mut tops = Vec::new();

    for item in raw {
        if item.item_type.eq_ignore_ascii_case("episode") {
            match item.series_id.clone() {
                Some(series_id) => episodes.entry(series_id).or_default().push(item),
                None => debug!("Skipping episode {} without a series", item.id),
            }
        } else {
            tops.push(item);
        }
    }

    let mut items = Vec::with_capacity(tops.len());
    for item in tops {
        let Some(kind) = MediaKind::parse(&item.item_type) else {
            debug!("Skipping Jellyfin item {} of type {}", item.id, item.item_type);
            continue;
        };

        // Without a creation date the item's age is unknown
        let series_episodes = episodes.remove(&item.id).unwrap_or_default();
        let Some(added_at) = item.date_created else {
            warn!("Skipping Jellyfin item {} without a creation date", item.id);
            continue;
        };

        let media = match kind {
            MediaKind::Movie => movie_from(item, added_at),
            MediaKind::Series => series_from(item, added_at, series_episodes),
        };
        items.push(media);
    }

    if !episodes.is_empty() {
        warn!("{} series had episodes but no series record", episodes.len());
    }

    items
}

fn movie_from(item: JellyfinItem, added_at: DateTime<Utc>) -> MediaItem {
    let user_data = item.user_data.clone().unwrap_or_default();
    let size_bytes = item.media_sources.iter().filter_map(|s| s.size).sum();

    let language_groups = if item.media_sources.is_empty() {
        vec![languages_of(None, &item.media_streams)]
    } else {
        item.media_sources
            .iter()
            .map(|s| languages_of(s.name.clone(), &s.media_streams))
            .collect()
    };

    MediaItem {
        external_id: item.id.clone(),
        name: item.name.clone().unwrap_or_else(|| item.id.clone()),
        kind: MediaKind::Movie,
        year: item.production_year,
        added_at,
        path: item.path.clone(),
        size_bytes,
        played: user_data.played,
        play_count: user_data.play_count.unwrap_or(0),
        last_played_at: user_data.last_played_date,
        language_groups,
        tmdb_id: provider_id(&item, "Tmdb").and_then(|id| id.parse().ok()),
        imdb_id: provider_id(&item, "Imdb"),
    }
}

fn series_from(item: JellyfinItem, added_at: DateTime<Utc>, episodes: Vec<JellyfinItem>) -> MediaItem {
    let user_data = item.user_data.clone().unwrap_or_default();

    let mut size_bytes = 0u64;
    let mut play_count = 0u32;
    let mut last_played_at = user_data.last_played_date;
    let mut all_played = !episodes.is_empty();
    let mut language_groups = Vec::with_capacity(episodes.len());

    for episode in &episodes {
        let episode_data = episode.user_data.clone().unwrap_or_default();
        size_bytes += episode.media_sources.iter().filter_map(|s| s.size).sum::<u64>();
        play_count += episode_data.play_count.unwrap_or(0);
        all_played &= episode_data.played;
        last_played_at = last_played_at.max(episode_data.last_played_date);

        let streams = episode
            .media_sources
            .first()
            .map(|s| s.media_streams.as_slice())
            .unwrap_or(episode.media_streams.as_slice());
        language_groups.push(languages_of(Some(episode_label(episode)), streams));
    }

    MediaItem {
        external_id: item.id.clone(),
        name: item.name.clone().unwrap_or_else(|| item.id.clone()),
        kind: MediaKind::Series,
        year: item.production_year,
        added_at,
        path: item.path.clone(),
        size_bytes,
        played: user_data.played || all_played,
        play_count,
        last_played_at,
        language_groups,
        tmdb_id: provider_id(&item, "Tmdb").and_then(|id| id.parse().ok()),
        imdb_id: provider_id(&item, "Imdb"),
    }
}

fn episode_label(episode: &JellyfinItem) -> String {
    match (episode.parent_index_number, episode.index_number) {
        (Some(season), Some(number)) => format!("S{:02}E{:02}", season, number),
        _ => episode.name.clone().unwrap_or_else(|| episode.id.clone()),
    }
}

fn provider_id(item: &JellyfinItem, key: &str) -> Option<String> {
    item.provider_ids.as_ref().and_then(|ids| {
        ids.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.clone())
            .filter(|v| !v.is_empty())
    })
}

fn languages_of(label: Option<String>, streams: &[MediaStream]) -> LanguageGroup {
    let mut group = LanguageGroup {
        label,
        ..LanguageGroup::default()
    };

    for stream in streams {
        let Some(language) = stream
            .language
            .as_deref()
            .map(|l| l.trim().to_ascii_lowercase())
            .filter(|l| !l.is_empty())
        else {
            continue;
        };

        let target = if stream.stream_type.eq_ignore_ascii_case("audio") {
            &mut group.audio
        } else if stream.stream_type.eq_ignore_ascii_case("subtitle") {
            &mut group.subtitles
        } else {
            continue;
        };

        if !target.contains(&language) {
            target.push(language);
        }
    }

    group
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Vec<JellyfinItem> {
        let response: ItemsResponse = serde_json::from_str(json).unwrap();
        response.items
    }

    #[test]
    fn movie_sums_sources_and_reads_languages() {
        let items = parse(
            r#"{
            "Items": [{
                "Id": "m1", "Name": "Heat", "Type": "Movie", "ProductionYear": 1995,
                "DateCreated": "2024-01-05T12:34:56.0000000Z",
                "Path": "/movies/Heat.mkv",
                "ProviderIds": {"Tmdb": "949", "Imdb": "tt0113277"},
                "UserData": {"Played": true, "PlayCount": 2, "LastPlayedDate": "2024-03-01T20:00:00Z"},
                "MediaSources": [
                    {"Name": "1080p", "Size": 1000, "MediaStreams": [
                        {"Type": "Video"},
                        {"Type": "Audio", "Language": "ENG"},
                        {"Type": "Subtitle", "Language": "fre"}
                    ]},
                    {"Name": "4K", "Size": 5000, "MediaStreams": [{"Type": "Audio", "Language": "fre"}]}
                ]
            }],
            "TotalRecordCount": 1
        }"#,
        );

        let folded = fold_items(items);
        assert_eq!(folded.len(), 1);
        let movie = &folded[0];
        assert_eq!(movie.kind, MediaKind::Movie);
        assert_eq!(movie.size_bytes, 6000);
        assert!(movie.played);
        assert_eq!(movie.play_count, 2);
        assert_eq!(movie.tmdb_id, Some(949));
        assert_eq!(movie.imdb_id.as_deref(), Some("tt0113277"));
        assert_eq!(movie.language_groups.len(), 2);
        assert_eq!(movie.language_groups[0].audio, vec!["eng"]);
        assert_eq!(movie.language_groups[0].subtitles, vec!["fre"]);
        assert_eq!(movie.language_groups[1].label.as_deref(), Some("4K"));
    }

    #[test]
    fn episodes_roll_up_into_series() {
        let items = parse(
            r#"{
            "Items": [
                {"Id": "s1", "Name": "Show", "Type": "Series", "DateCreated": "2023-01-01T00:00:00Z"},
                {"Id": "e1", "Type": "Episode", "SeriesId": "s1", "ParentIndexNumber": 1, "IndexNumber": 1,
                 "UserData": {"Played": true, "PlayCount": 1, "LastPlayedDate": "2024-01-01T00:00:00Z"},
                 "MediaSources": [{"Size": 100, "MediaStreams": [{"Type": "Audio", "Language": "eng"}]}]},
                {"Id": "e2", "Type": "Episode", "SeriesId": "s1", "ParentIndexNumber": 1, "IndexNumber": 2,
                 "UserData": {"Played": false, "PlayCount": 0},
                 "MediaSources": [{"Size": 200, "MediaStreams": [{"Type": "Audio", "Language": "jpn"}]}]},
                {"Id": "orphan", "Type": "Episode"}
            ]
        }"#,
        );

        let folded = fold_items(items);
        assert_eq!(folded.len(), 1);
        let series = &folded[0];
        assert_eq!(series.kind, MediaKind::Series);
        assert_eq!(series.size_bytes, 300);
        assert!(!series.played);
        assert_eq!(series.play_count, 1);
        assert_eq!(
            series.last_played_at.map(|d| d.to_rfc3339()),
            Some("2024-01-01T00:00:00+00:00".to_string())
        );
        assert_eq!(series.language_groups.len(), 2);
        assert_eq!(series.language_groups[1].label.as_deref(), Some("S01E02"));
        assert_eq!(series.language_groups[1].audio, vec!["jpn"]);
    }

    #[test]
    fn items_without_a_creation_date_are_skipped() {
        let items = parse(
            r#"{"Items": [
                {"Id": "m1", "Name": "Undated", "Type": "Movie"},
                {"Id": "s1", "Name": "Undated Show", "Type": "Series"},
                {"Id": "e1", "Type": "Episode", "SeriesId": "s1"},
                {"Id": "m2", "Name": "Dated", "Type": "Movie", "DateCreated": "2024-01-05T00:00:00Z"}
            ]}"#,
        );

        let folded = fold_items(items);
        assert_eq!(folded.len(), 1);
        assert_eq!(folded[0].external_id, "m2");
        assert_eq!(folded[0].added_at.to_rfc3339(), "2024-01-05T00:00:00+00:00");
    }

    #[test]
    fn unknown_types_are_skipped() {
        let items = parse(r#"{"Items": [{"Id": "x", "Type": "BoxSet"}]}"#);
        assert!(fold_items(items).is_empty());
    }
}
