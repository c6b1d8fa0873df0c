use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Movie,
    Series,
}

impl MediaKind {
    /// Upstream services disagree on casing ("Movie" vs "movie"), so kinds are
    /// normalized once at ingestion.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "movie" => Some(Self::Movie),
            "series" | "show" | "tv" => Some(Self::Series),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Movie => "movie",
            Self::Series => "series",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Movie,
    Tv,
}

impl RequestKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "movie" => Some(Self::Movie),
            "tv" | "series" | "show" => Some(Self::Tv),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Movie => "movie",
            Self::Tv => "tv",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Declined,
    Available,
    PartiallyAvailable,
    Unavailable,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Declined => "declined",
            Self::Available => "available",
            Self::PartiallyAvailable => "partially-available",
            Self::Unavailable => "unavailable",
        }
    }
}

impl FromStr for RequestStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "declined" => Ok(Self::Declined),
            "available" => Ok(Self::Available),
            "partially-available" => Ok(Self::PartiallyAvailable),
            "unavailable" => Ok(Self::Unavailable),
            other => Err(anyhow::anyhow!("unknown request status '{}'", other)),
        }
    }
}

/// Audio and subtitle languages of one backing file (a movie source or a
/// single episode of a series).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LanguageGroup {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub audio: Vec<String>,
    #[serde(default)]
    pub subtitles: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaItem {
    pub external_id: String,
    pub name: String,
    pub kind: MediaKind,
    pub year: Option<i32>,
    pub added_at: DateTime<Utc>,
    pub path: Option<String>,
    pub size_bytes: u64,
    pub played: bool,
    pub play_count: u32,
    pub last_played_at: Option<DateTime<Utc>>,
    pub language_groups: Vec<LanguageGroup>,
    pub tmdb_id: Option<i64>,
    pub imdb_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestRecord {
    pub external_id: i64,
    pub title: String,
    pub kind: RequestKind,
    pub status: RequestStatus,
    pub requested_by: String,
    pub created_at: DateTime<Utc>,
    pub release_date: Option<NaiveDate>,
    pub available_at: Option<DateTime<Utc>>,
    pub tmdb_id: Option<i64>,
    pub missing_seasons: Option<Vec<u32>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WhitelistKind {
    /// Never reported as stale
    Protected,
    /// French audio without English is expected
    FrenchOnly,
    /// Skipped by the language check entirely
    LanguageExempt,
}

impl WhitelistKind {
    pub const ALL: [WhitelistKind; 3] = [Self::Protected, Self::FrenchOnly, Self::LanguageExempt];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Protected => "protected",
            Self::FrenchOnly => "french_only",
            Self::LanguageExempt => "language_exempt",
        }
    }
}

impl FromStr for WhitelistKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown whitelist '{}'", s))
    }
}

impl fmt::Display for WhitelistKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WhitelistEntry {
    pub list: WhitelistKind,
    pub item_id: String,
    pub item_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl WhitelistEntry {
    /// An entry past its expiry is kept for display but no longer exempts anything.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expires| expires > now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserThresholds {
    pub staleness_months: u32,
    pub minimum_age_months: u32,
    pub oversized_gb: u32,
    pub exclude_unreleased: bool,
    /// Requests released this recently are still moving through automation;
    /// 0 disables the filter.
    pub recent_release_days: u32,
}

impl Default for UserThresholds {
    fn default() -> Self {
        Self {
            staleness_months: 4,
            minimum_age_months: 3,
            oversized_gb: 13,
            exclude_unreleased: true,
            recent_release_days: 7,
        }
    }
}

impl UserThresholds {
    pub const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

    pub fn oversized_bytes(&self) -> u64 {
        u64::from(self.oversized_gb) * Self::BYTES_PER_GB
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SyncState {
    pub in_progress: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Jellyfin,
    Jellyseerr,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jellyfin => "jellyfin",
            Self::Jellyseerr => "jellyseerr",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decrypted connection details for one upstream service.
#[derive(Clone, PartialEq)]
pub struct ServiceConnection {
    pub base_url: String,
    pub api_key: String,
    /// Jellyfin user whose watch state is read
    pub external_user_id: Option<String>,
}

impl fmt::Debug for ServiceConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConnection")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("external_user_id", &self.external_user_id)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConnections {
    pub jellyfin: ServiceConnection,
    pub jellyseerr: ServiceConnection,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn kind_parsing_ignores_case() {
        assert_eq!(MediaKind::parse("Movie"), Some(MediaKind::Movie));
        assert_eq!(MediaKind::parse("movie"), Some(MediaKind::Movie));
        assert_eq!(MediaKind::parse("Series"), Some(MediaKind::Series));
        assert_eq!(MediaKind::parse("Episode"), None);
        assert_eq!(RequestKind::parse("TV"), Some(RequestKind::Tv));
    }

    #[test]
    fn whitelist_entry_expiry() {
        let now = Utc::now();
        let mut entry = WhitelistEntry {
            list: WhitelistKind::Protected,
            item_id: "abc".to_string(),
            item_name: None,
            created_at: now - Duration::days(10),
            expires_at: None,
        };
        assert!(entry.is_active(now));

        entry.expires_at = Some(now + Duration::days(1));
        assert!(entry.is_active(now));

        entry.expires_at = Some(now - Duration::seconds(1));
        assert!(!entry.is_active(now));
    }

    #[test]
    fn whitelist_kind_round_trips_through_str() {
        for kind in WhitelistKind::ALL {
            assert_eq!(kind.as_str().parse::<WhitelistKind>().unwrap(), kind);
        }
        assert!("nope".parse::<WhitelistKind>().is_err());
    }

    #[test]
    fn oversized_threshold_is_binary_gigabytes() {
        let thresholds = UserThresholds::default();
        assert_eq!(thresholds.oversized_bytes(), 13_958_643_712);
    }
}
