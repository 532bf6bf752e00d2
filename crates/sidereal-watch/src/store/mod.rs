//! Entry storage backends.
//!
//! Every backend implements [`EntryStore`] with identical observable
//! behaviour: the same data and the same query return the same entries in the
//! same order. Coarse predicates may be pushed down to the backend, but the
//! final say always belongs to [`EntryFilter::matches`].

mod filter;
#[cfg(feature = "memory")]
mod memory;
mod provider;
#[cfg(feature = "sqlite")]
mod sqlite;
#[cfg(feature = "valkey")]
mod valkey;

pub use filter::{EntryFilter, GateOutcome, StatusFilter};
#[cfg(feature = "memory")]
pub use memory::MemoryStore;
pub use provider::open_store;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
#[cfg(feature = "valkey")]
pub use valkey::ValkeyStore;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entry::{Entry, EntryKind, FamilyGroup, MonitoredTag, NewEntry, TagCount};
use crate::WatchResult;

/// Page size used when none is given.
pub const DEFAULT_PAGE_LIMIT: usize = 50;

/// Largest page a single cursor query returns.
pub const MAX_PAGE_LIMIT: usize = 1_000;

/// Criteria for [`EntryStore::find`].
#[derive(Debug, Clone, Default)]
pub struct EntryQuery {
    pub kind: Option<EntryKind>,
    pub request_id: Option<String>,
    /// Inclusive lower bound on `created_at`.
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`.
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl EntryQuery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_kind(mut self, kind: EntryKind) -> Self {
        self.kind = Some(kind);
        self
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    #[must_use]
    pub const fn with_since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    #[must_use]
    pub const fn with_until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub const fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Whether an entry satisfies the kind, request and time criteria.
    #[must_use]
    pub fn matches(&self, entry: &Entry) -> bool {
        self.kind.map_or(true, |k| entry.kind == k)
            && self
                .request_id
                .as_deref()
                .map_or(true, |r| entry.request_id.as_deref() == Some(r))
            && self.since.map_or(true, |s| entry.created_at >= s)
            && self.until.map_or(true, |u| entry.created_at <= u)
    }
}

/// Cursor pagination request.
///
/// Without cursors the newest entries come first. `before` pages towards
/// older entries, `after` towards newer ones; when both are set both bounds
/// apply and the page is taken from the `after` side.
#[derive(Debug, Clone)]
pub struct CursorParams {
    pub before: Option<u64>,
    pub after: Option<u64>,
    pub limit: usize,
    pub filter: EntryFilter,
}

impl Default for CursorParams {
    fn default() -> Self {
        Self {
            before: None,
            after: None,
            limit: DEFAULT_PAGE_LIMIT,
            filter: EntryFilter::default(),
        }
    }
}

impl CursorParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_before(mut self, before: u64) -> Self {
        self.before = Some(before);
        self
    }

    #[must_use]
    pub const fn with_after(mut self, after: u64) -> Self {
        self.after = Some(after);
        self
    }

    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: EntryFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Page size clamped to `1..=MAX_PAGE_LIMIT`.
    #[must_use]
    pub fn page_limit(&self) -> usize {
        self.limit.clamp(1, MAX_PAGE_LIMIT)
    }

    /// Whether candidates are taken oldest first (the `after` direction).
    #[must_use]
    pub const fn ascending(&self) -> bool {
        self.after.is_some()
    }

    /// Whether an id lies strictly inside the cursor bounds.
    #[must_use]
    pub fn in_bounds(&self, id: u64) -> bool {
        self.after.map_or(true, |a| id > a) && self.before.map_or(true, |b| id < b)
    }
}

/// One page of a cursor query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorPage {
    /// Newest first.
    pub data: Vec<Entry>,
    pub meta: CursorMeta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorMeta {
    pub has_more: bool,
    /// Smallest id on the page.
    pub oldest_sequence: Option<u64>,
    /// Largest id on the page.
    pub newest_sequence: Option<u64>,
    /// Entries matching kind and filter, regardless of cursor and limit.
    pub total: u64,
}

impl CursorPage {
    /// Build a page from up to `limit + 1` candidates taken in cursor order.
    #[must_use]
    pub fn from_candidates(mut rows: Vec<Entry>, params: &CursorParams, total: u64) -> Self {
        let limit = params.page_limit();
        let has_more = rows.len() > limit;
        rows.truncate(limit);
        if params.ascending() {
            rows.reverse();
        }
        let meta = CursorMeta {
            has_more,
            oldest_sequence: rows.last().map(|e| e.id),
            newest_sequence: rows.first().map(|e| e.id),
            total,
        };
        Self { data: rows, meta }
    }
}

/// How multiple tags combine in [`EntryStore::find_by_tags`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagLogic {
    /// Entry carries at least one of the tags.
    #[default]
    Any,
    /// Entry carries every tag.
    All,
}

impl fmt::Display for TagLogic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("any"),
            Self::All => f.write_str("all"),
        }
    }
}

impl FromStr for TagLogic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "any" | "or" => Ok(Self::Any),
            "all" | "and" => Ok(Self::All),
            other => Err(format!("invalid tag logic: {other}")),
        }
    }
}

/// Aggregate counts over stored entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryStats {
    pub total: u64,
    /// Every kind is present, with zero when nothing was recorded.
    pub by_kind: BTreeMap<EntryKind, u64>,
    /// Mean request duration in milliseconds.
    pub avg_request_duration: Option<f64>,
    pub slow_queries: u64,
    pub unresolved_exceptions: u64,
}

impl Default for EntryStats {
    fn default() -> Self {
        Self {
            total: 0,
            by_kind: EntryKind::ALL.into_iter().map(|k| (k, 0)).collect(),
            avg_request_duration: None,
            slow_queries: 0,
            unresolved_exceptions: 0,
        }
    }
}

/// [`EntryStats`] plus physical storage details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageStats {
    pub stats: EntryStats,
    /// Bytes on disk, where the backend can tell.
    pub storage_size: Option<u64>,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
}

/// Accumulates [`EntryStats`] from a stream of entries.
#[derive(Debug, Default)]
pub(crate) struct StatsAccumulator {
    stats: EntryStats,
    request_duration_sum: f64,
    request_count: u64,
}

impl StatsAccumulator {
    pub(crate) fn record(&mut self, entry: &Entry) {
        self.stats.total += 1;
        *self.stats.by_kind.entry(entry.kind).or_insert(0) += 1;
        match entry.kind {
            EntryKind::Request => {
                if let Some(duration) = entry.payload.duration_ms() {
                    self.request_duration_sum += duration;
                    self.request_count += 1;
                }
            }
            EntryKind::Query => {
                if entry.payload.slow_flag() == Some(true) {
                    self.stats.slow_queries += 1;
                }
            }
            EntryKind::Exception => {
                if !entry.is_resolved() {
                    self.stats.unresolved_exceptions += 1;
                }
            }
            _ => {}
        }
    }

    pub(crate) fn finish(mut self) -> EntryStats {
        if self.request_count > 0 {
            #[allow(clippy::cast_precision_loss)]
            let count = self.request_count as f64;
            self.stats.avg_request_duration = Some(self.request_duration_sum / count);
        }
        self.stats
    }
}

/// Group entries by family hash.
///
/// Entries must be given newest first; groups are ordered by size, then by
/// their newest entry.
pub(crate) fn group_families<'a>(
    entries: impl IntoIterator<Item = &'a Entry>,
    limit: usize,
) -> Vec<FamilyGroup> {
    let mut groups: Vec<FamilyGroup> = Vec::new();
    let mut index: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
    for entry in entries {
        let Some(hash) = entry.family_hash.as_deref() else {
            continue;
        };
        match index.get(hash) {
            Some(&i) => groups[i].count += 1,
            None => {
                index.insert(hash, groups.len());
                groups.push(FamilyGroup {
                    family_hash: hash.to_owned(),
                    count: 1,
                    latest_entry: entry.clone(),
                });
            }
        }
    }
    groups.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| b.latest_entry.id.cmp(&a.latest_entry.id))
    });
    groups.truncate(limit);
    groups
}

/// Backend for storing telemetry entries.
///
/// Lookups of missing ids return `None`, `false` or an empty list rather than
/// an error. Tags are compared case-insensitively and stored upper-case.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Persist a single entry, assigning its id and creation time.
    async fn save(&self, entry: NewEntry) -> WatchResult<Entry>;

    /// Persist entries atomically; ids follow input order.
    async fn save_batch(&self, entries: Vec<NewEntry>) -> WatchResult<Vec<Entry>>;

    async fn find_by_id(&self, id: u64) -> WatchResult<Option<Entry>>;

    /// List entries newest first.
    async fn find(&self, query: &EntryQuery) -> WatchResult<Vec<Entry>>;

    /// Cursor-paginated listing with filters.
    async fn find_with_cursor(
        &self,
        kind: Option<EntryKind>,
        params: &CursorParams,
    ) -> WatchResult<CursorPage>;

    async fn count(&self, kind: Option<EntryKind>) -> WatchResult<u64>;

    /// Highest id stored.
    async fn latest_sequence(&self, kind: Option<EntryKind>) -> WatchResult<Option<u64>>;

    /// Whether any entry has an id greater than `sequence`.
    async fn has_entries_after(&self, sequence: u64, kind: Option<EntryKind>)
        -> WatchResult<bool>;

    async fn stats(&self) -> WatchResult<EntryStats>;

    async fn storage_stats(&self) -> WatchResult<StorageStats>;

    /// Delete entries created strictly before `before`.
    async fn prune(&self, before: DateTime<Utc>) -> WatchResult<u64>;

    /// Delete entries of one kind created strictly before `before`.
    async fn prune_by_kind(&self, kind: EntryKind, before: DateTime<Utc>) -> WatchResult<u64>;

    /// Delete every entry, tag and monitored tag. Ids are not reused.
    async fn clear(&self) -> WatchResult<()>;

    async fn add_tags(&self, id: u64, tags: &[String]) -> WatchResult<()>;

    async fn remove_tags(&self, id: u64, tags: &[String]) -> WatchResult<()>;

    async fn entry_tags(&self, id: u64) -> WatchResult<Vec<String>>;

    /// Tag usage, most used first.
    async fn all_tags(&self) -> WatchResult<Vec<TagCount>>;

    async fn find_by_tags(
        &self,
        tags: &[String],
        logic: TagLogic,
        limit: usize,
    ) -> WatchResult<Vec<Entry>>;

    /// Watch a tag. Adding an existing tag returns the existing record.
    async fn add_monitored_tag(&self, tag: &str) -> WatchResult<MonitoredTag>;

    async fn remove_monitored_tag(&self, tag: &str) -> WatchResult<bool>;

    async fn monitored_tags(&self) -> WatchResult<Vec<MonitoredTag>>;

    async fn resolve_entry(&self, id: u64) -> WatchResult<bool>;

    async fn unresolve_entry(&self, id: u64) -> WatchResult<bool>;

    async fn update_family_hash(&self, id: u64, hash: &str) -> WatchResult<bool>;

    async fn find_by_family_hash(&self, hash: &str, limit: usize) -> WatchResult<Vec<Entry>>;

    /// Families with their sizes and newest member.
    async fn grouped_by_family_hash(
        &self,
        kind: Option<EntryKind>,
        limit: usize,
    ) -> WatchResult<Vec<FamilyGroup>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{LogPayload, Payload};

    fn entry(id: u64) -> Entry {
        Entry::from_new(id, NewEntry::new(Payload::Log(LogPayload::default())), Utc::now())
    }

    #[test]
    fn page_from_descending_candidates() {
        let params = CursorParams::new().with_limit(2);
        let rows = vec![entry(9), entry(8), entry(7)];
        let page = CursorPage::from_candidates(rows, &params, 3);
        let ids: Vec<u64> = page.data.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![9, 8]);
        assert!(page.meta.has_more);
        assert_eq!(page.meta.newest_sequence, Some(9));
        assert_eq!(page.meta.oldest_sequence, Some(8));
    }

    #[test]
    fn page_from_ascending_candidates_is_reversed() {
        let params = CursorParams::new().with_after(3).with_limit(2);
        let rows = vec![entry(4), entry(5), entry(6)];
        let page = CursorPage::from_candidates(rows, &params, 6);
        let ids: Vec<u64> = page.data.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![5, 4]);
        assert!(page.meta.has_more);
    }

    #[test]
    fn both_bounds_apply() {
        let params = CursorParams::new().with_after(3).with_before(6);
        assert!(!params.in_bounds(3));
        assert!(params.in_bounds(4));
        assert!(!params.in_bounds(6));
        assert!(params.ascending());
    }

    #[test]
    fn page_limit_is_clamped() {
        assert_eq!(CursorParams::new().with_limit(0).page_limit(), 1);
        assert_eq!(CursorParams::new().with_limit(5_000).page_limit(), MAX_PAGE_LIMIT);
    }

    #[test]
    fn default_stats_list_every_kind() {
        let stats = EntryStats::default();
        assert_eq!(stats.by_kind.len(), EntryKind::ALL.len());
        assert!(stats.by_kind.values().all(|&c| c == 0));
    }

    #[test]
    fn families_sorted_by_count_then_recency() {
        let mut a1 = entry(5);
        a1.family_hash = Some("a".to_string());
        let mut b1 = entry(4);
        b1.family_hash = Some("b".to_string());
        let mut a2 = entry(2);
        a2.family_hash = Some("a".to_string());
        let mut c1 = entry(1);
        c1.family_hash = Some("c".to_string());

        let groups = group_families([&a1, &b1, &a2, &c1], 10);
        let hashes: Vec<&str> = groups.iter().map(|g| g.family_hash.as_str()).collect();
        assert_eq!(hashes, vec!["a", "b", "c"]);
        assert_eq!(groups[0].count, 2);
        assert_eq!(groups[0].latest_entry.id, 5);
    }

    #[test]
    fn tag_logic_parsing() {
        assert_eq!("AND".parse::<TagLogic>().unwrap(), TagLogic::All);
        assert_eq!("or".parse::<TagLogic>().unwrap(), TagLogic::Any);
        assert!("xor".parse::<TagLogic>().is_err());
    }
}
