//! Issue evaluation over a cached snapshot.
//!
//! [`evaluate`] is a pure function of its input: the same snapshot, whitelists,
//! thresholds and clock always give the same report.

pub mod language;

use chrono::{DateTime, Duration, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::models::{
    MediaItem, MediaKind, RequestKind, RequestRecord, RequestStatus, UserThresholds,
    WhitelistEntry, WhitelistKind,
};
pub use language::{LanguageFinding, LanguageProblem};

/// Window for the informational "recently available" list.
pub const RECENT_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    Stale,
    Oversized,
    Language,
    UnavailableRequest,
}

impl IssueCategory {
    pub const ALL: [IssueCategory; 4] = [
        Self::Stale,
        Self::Oversized,
        Self::Language,
        Self::UnavailableRequest,
    ];
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Subject {
    Media {
        item: MediaItem,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        language: Vec<LanguageFinding>,
    },
    Request {
        request: RequestRecord,
    },
}

/// One item or request with every category it matched.
#[derive(Debug, Clone, Serialize)]
pub struct IssueEntry {
    #[serde(flatten)]
    pub subject: Subject,
    pub categories: BTreeSet<IssueCategory>,
}

impl IssueEntry {
    pub fn id(&self) -> String {
        match &self.subject {
            Subject::Media { item, .. } => item.external_id.clone(),
            Subject::Request { request } => request.external_id.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        match &self.subject {
            Subject::Media { item, .. } => &item.name,
            Subject::Request { request } => &request.title,
        }
    }

    pub fn size_bytes(&self) -> u64 {
        match &self.subject {
            Subject::Media { item, .. } => item.size_bytes,
            Subject::Request { .. } => 0,
        }
    }

    pub fn date(&self) -> DateTime<Utc> {
        match &self.subject {
            Subject::Media { item, .. } => item.added_at,
            Subject::Request { request } => request.created_at,
        }
    }

    pub fn issue_count(&self) -> usize {
        self.categories.len()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RecentEntry {
    pub source: &'static str,
    pub id: String,
    pub name: String,
    pub kind: &'static str,
    pub available_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RecentGroup {
    pub date: NaiveDate,
    pub entries: Vec<RecentEntry>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IssueReport {
    pub entries: Vec<IssueEntry>,
    pub recently_available: Vec<RecentGroup>,
}

pub struct EvaluationInput<'a> {
    pub items: &'a [MediaItem],
    pub requests: &'a [RequestRecord],
    pub whitelist: &'a [WhitelistEntry],
    pub thresholds: &'a UserThresholds,
    pub now: DateTime<Utc>,
}

/// Active whitelist ids, one set per list.
struct Exemptions<'a> {
    protected: HashSet<&'a str>,
    french_only: HashSet<&'a str>,
    language_exempt: HashSet<&'a str>,
}

impl<'a> Exemptions<'a> {
    fn new(entries: &'a [WhitelistEntry], now: DateTime<Utc>) -> Self {
        let mut exemptions = Self {
            protected: HashSet::new(),
            french_only: HashSet::new(),
            language_exempt: HashSet::new(),
        };

        for entry in entries.iter().filter(|e| e.is_active(now)) {
            let set = match entry.list {
                WhitelistKind::Protected => &mut exemptions.protected,
                WhitelistKind::FrenchOnly => &mut exemptions.french_only,
                WhitelistKind::LanguageExempt => &mut exemptions.language_exempt,
            };
            set.insert(entry.item_id.as_str());
        }

        exemptions
    }
}

fn months_before(now: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    now.checked_sub_months(Months::new(months))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Played long ago, or never played and old enough to have had a chance.
pub fn is_stale(item: &MediaItem, thresholds: &UserThresholds, now: DateTime<Utc>) -> bool {
    let stale_before = months_before(now, thresholds.staleness_months);
    let grace_before = months_before(now, thresholds.minimum_age_months);

    let played_long_ago = item.last_played_at.is_some_and(|played| played < stale_before);
    let never_played_and_old = !item.played && item.added_at < grace_before;

    played_long_ago || never_played_and_old
}

/// Inclusive: a movie exactly at the threshold is oversized.
pub fn is_oversized(item: &MediaItem, thresholds: &UserThresholds) -> bool {
    item.kind == MediaKind::Movie && item.size_bytes >= thresholds.oversized_bytes()
}

pub fn is_unavailable_request(
    request: &RequestRecord,
    thresholds: &UserThresholds,
    now: DateTime<Utc>,
) -> bool {
    if request.status == RequestStatus::Available {
        return false;
    }

    let today = now.date_naive();
    if let Some(release) = request.release_date {
        if thresholds.exclude_unreleased && release > today {
            return false;
        }
        if thresholds.recent_release_days > 0 {
            let window_start = today - Duration::days(i64::from(thresholds.recent_release_days));
            if release >= window_start && release <= today {
                return false;
            }
        }
    }

    true
}

pub fn evaluate(input: &EvaluationInput<'_>) -> IssueReport {
    let exemptions = Exemptions::new(input.whitelist, input.now);
    let mut entries = Vec::new();

    let mut items: Vec<&MediaItem> = input.items.iter().collect();
    items.sort_by(|a, b| a.external_id.cmp(&b.external_id));

    for item in items {
        let id = item.external_id.as_str();
        let mut categories = BTreeSet::new();

        if !exemptions.protected.contains(id) && is_stale(item, input.thresholds, input.now) {
            categories.insert(IssueCategory::Stale);
        }
        if is_oversized(item, input.thresholds) {
            categories.insert(IssueCategory::Oversized);
        }

        let language = if exemptions.language_exempt.contains(id) {
            Vec::new()
        } else {
            language::check_item(&item.language_groups, exemptions.french_only.contains(id))
        };
        if !language.is_empty() {
            categories.insert(IssueCategory::Language);
        }

        if !categories.is_empty() {
            entries.push(IssueEntry {
                subject: Subject::Media {
                    item: item.clone(),
                    language,
                },
                categories,
            });
        }
    }

    let mut requests: Vec<&RequestRecord> = input.requests.iter().collect();
    requests.sort_by_key(|r| r.external_id);

    for request in requests {
        if is_unavailable_request(request, input.thresholds, input.now) {
            entries.push(IssueEntry {
                subject: Subject::Request {
                    request: request.clone(),
                },
                categories: BTreeSet::from([IssueCategory::UnavailableRequest]),
            });
        }
    }

    IssueReport {
        entries,
        recently_available: recently_available(input.items, input.requests, input.now),
    }
}

/// Items added and requests fulfilled in the last week, grouped by day,
/// newest first.
pub fn recently_available(
    items: &[MediaItem],
    requests: &[RequestRecord],
    now: DateTime<Utc>,
) -> Vec<RecentGroup> {
    let since = now - Duration::days(RECENT_WINDOW_DAYS);
    let in_window = |at: DateTime<Utc>| at >= since && at <= now;

    let mut recent: Vec<RecentEntry> = items
        .iter()
        .filter(|item| in_window(item.added_at))
        .map(|item| RecentEntry {
            source: "media",
            id: item.external_id.clone(),
            name: item.name.clone(),
            kind: item.kind.as_str(),
            available_at: item.added_at,
        })
        .collect();

    recent.extend(requests.iter().filter_map(|request| {
        let at = request.available_at?;
        let available = matches!(
            request.status,
            RequestStatus::Available | RequestStatus::PartiallyAvailable
        );
        (available && in_window(at)).then(|| RecentEntry {
            source: "request",
            id: request.external_id.to_string(),
            name: request.title.clone(),
            kind: match request.kind {
                RequestKind::Movie => "movie",
                RequestKind::Tv => "tv",
            },
            available_at: at,
        })
    }));

    recent.sort_by(|a, b| {
        b.available_at
            .cmp(&a.available_at)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut groups: BTreeMap<NaiveDate, Vec<RecentEntry>> = BTreeMap::new();
    for entry in recent {
        groups.entry(entry.available_at.date_naive()).or_default().push(entry);
    }

    groups
        .into_iter()
        .rev()
        .map(|(date, entries)| RecentGroup { date, entries })
        .collect()
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Name,
    Size,
    Date,
    #[default]
    Issues,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IssueQuery {
    pub category: Option<IssueCategory>,
    #[serde(default)]
    pub sort: SortKey,
    /// Names sort ascending and everything else descending unless given.
    pub order: Option<SortOrder>,
}

impl IssueReport {
    /// Entries matching the query's category, sorted by its key. Ties fall back
    /// to name then id, so the order never depends on input order.
    pub fn query(&self, query: &IssueQuery) -> Vec<&IssueEntry> {
        let mut entries: Vec<&IssueEntry> = self
            .entries
            .iter()
            .filter(|e| query.category.map_or(true, |c| e.categories.contains(&c)))
            .collect();

        let order = query.order.unwrap_or(match query.sort {
            SortKey::Name => SortOrder::Asc,
            _ => SortOrder::Desc,
        });

        entries.sort_by(|a, b| {
            let primary = match query.sort {
                SortKey::Name => a.name().to_lowercase().cmp(&b.name().to_lowercase()),
                SortKey::Size => a.size_bytes().cmp(&b.size_bytes()),
                SortKey::Date => a.date().cmp(&b.date()),
                SortKey::Issues => a.issue_count().cmp(&b.issue_count()),
            };
            let primary = match order {
                SortOrder::Asc => primary,
                SortOrder::Desc => primary.reverse(),
            };
            primary
                .then_with(|| a.name().to_lowercase().cmp(&b.name().to_lowercase()))
                .then_with(|| a.id().cmp(&b.id()))
        });

        entries
    }

    pub fn summary(&self) -> IssueSummary {
        let categories = IssueCategory::ALL
            .into_iter()
            .map(|category| {
                let matching = self.entries.iter().filter(|e| e.categories.contains(&category));
                let (count, total_size_bytes) =
                    matching.fold((0, 0u64), |(n, size), e| (n + 1, size + e.size_bytes()));
                CategorySummary {
                    category,
                    count,
                    total_size_bytes,
                }
            })
            .collect();

        IssueSummary {
            categories,
            total_entries: self.entries.len(),
            total_size_bytes: self.entries.iter().map(IssueEntry::size_bytes).sum(),
            recently_available: self.recently_available.iter().map(|g| g.entries.len()).sum(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CategorySummary {
    pub category: IssueCategory,
    pub count: usize,
    pub total_size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IssueSummary {
    pub categories: Vec<CategorySummary>,
    pub total_entries: usize,
    /// Each entry counted once even when it matches several categories
    pub total_size_bytes: u64,
    pub recently_available: usize,
}
