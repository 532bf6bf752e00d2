//! In-memory entry store.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::entry::{
    normalise_tag, normalise_tags, now_micros, Entry, EntryKind, FamilyGroup, MonitoredTag,
    NewEntry, TagCount,
};
use crate::{WatchError, WatchResult};

use super::{
    group_families, CursorPage, CursorParams, EntryQuery, EntryStats, EntryStore,
    StatsAccumulator, StorageStats, TagLogic,
};

#[derive(Debug, Default)]
struct MemoryState {
    entries: BTreeMap<u64, Entry>,
    tag_index: HashMap<String, BTreeSet<u64>>,
    monitored: BTreeMap<String, MonitoredTag>,
    next_monitored_id: u64,
}

impl MemoryState {
    fn remove_entry(&mut self, id: u64) -> Option<Entry> {
        let entry = self.entries.remove(&id)?;
        for tag in &entry.tags {
            if let Some(ids) = self.tag_index.get_mut(tag) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.tag_index.remove(tag);
                }
            }
        }
        Some(entry)
    }

    fn remove_where(&mut self, pred: impl Fn(&Entry) -> bool) -> u64 {
        let doomed: Vec<u64> = self
            .entries
            .values()
            .filter(|e| pred(e))
            .map(|e| e.id)
            .collect();
        for id in &doomed {
            self.remove_entry(*id);
        }
        doomed.len() as u64
    }

    fn evict(&mut self, max_entries: Option<usize>) {
        let Some(max) = max_entries else {
            return;
        };
        while self.entries.len() > max {
            let Some(&oldest) = self.entries.keys().next() else {
                break;
            };
            self.remove_entry(oldest);
        }
    }

    fn newest(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values().rev()
    }
}

/// In-memory entry store.
///
/// Data is lost when the process exits. With `max_entries` set, the oldest
/// entries are evicted once the limit is exceeded.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    sequence: AtomicU64,
    max_entries: Option<usize>,
}

impl MemoryStore {
    /// Create a new empty store without an entry limit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that keeps at most `max_entries` entries.
    #[must_use]
    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            max_entries: Some(max_entries),
            ..Self::default()
        }
    }

    fn next_id(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl EntryStore for MemoryStore {
    async fn save(&self, entry: NewEntry) -> WatchResult<Entry> {
        let mut saved = self.save_batch(vec![entry]).await?;
        saved
            .pop()
            .ok_or_else(|| WatchError::storage("save produced no entry"))
    }

    async fn save_batch(&self, entries: Vec<NewEntry>) -> WatchResult<Vec<Entry>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        let mut state = self.state.write().await;
        let created_at = now_micros();
        let saved: Vec<Entry> = entries
            .into_iter()
            .map(|new| Entry::from_new(self.next_id(), new, created_at))
            .collect();
        for entry in &saved {
            state.entries.insert(entry.id, entry.clone());
        }
        state.evict(self.max_entries);
        Ok(saved)
    }

    async fn find_by_id(&self, id: u64) -> WatchResult<Option<Entry>> {
        let state = self.state.read().await;
        Ok(state.entries.get(&id).cloned())
    }

    async fn find(&self, query: &EntryQuery) -> WatchResult<Vec<Entry>> {
        let state = self.state.read().await;
        Ok(state
            .newest()
            .filter(|e| query.matches(e))
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn find_with_cursor(
        &self,
        kind: Option<EntryKind>,
        params: &CursorParams,
    ) -> WatchResult<CursorPage> {
        let state = self.state.read().await;
        let matching =
            |e: &&Entry| kind.map_or(true, |k| e.kind == k) && params.filter.matches(e);

        let total = state.entries.values().filter(matching).count() as u64;
        let wanted = params.page_limit() + 1;
        let in_bounds = |e: &&Entry| params.in_bounds(e.id);
        let rows: Vec<Entry> = if params.ascending() {
            state
                .entries
                .values()
                .filter(in_bounds)
                .filter(matching)
                .take(wanted)
                .cloned()
                .collect()
        } else {
            state
                .newest()
                .filter(in_bounds)
                .filter(matching)
                .take(wanted)
                .cloned()
                .collect()
        };
        Ok(CursorPage::from_candidates(rows, params, total))
    }

    async fn count(&self, kind: Option<EntryKind>) -> WatchResult<u64> {
        let state = self.state.read().await;
        let count = match kind {
            Some(kind) => state.entries.values().filter(|e| e.kind == kind).count(),
            None => state.entries.len(),
        };
        Ok(count as u64)
    }

    async fn latest_sequence(&self, kind: Option<EntryKind>) -> WatchResult<Option<u64>> {
        let state = self.state.read().await;
        let id = state
            .newest()
            .find(|e| kind.map_or(true, |k| e.kind == k))
            .map(|e| e.id);
        Ok(id)
    }

    async fn has_entries_after(
        &self,
        sequence: u64,
        kind: Option<EntryKind>,
    ) -> WatchResult<bool> {
        let state = self.state.read().await;
        Ok(state
            .entries
            .range(sequence.saturating_add(1)..)
            .any(|(_, e)| kind.map_or(true, |k| e.kind == k)))
    }

    async fn stats(&self) -> WatchResult<EntryStats> {
        let state = self.state.read().await;
        let mut acc = StatsAccumulator::default();
        for entry in state.entries.values() {
            acc.record(entry);
        }
        Ok(acc.finish())
    }

    async fn storage_stats(&self) -> WatchResult<StorageStats> {
        let stats = self.stats().await?;
        let state = self.state.read().await;
        Ok(StorageStats {
            stats,
            storage_size: None,
            oldest_entry: state.entries.values().map(|e| e.created_at).min(),
            newest_entry: state.entries.values().map(|e| e.created_at).max(),
        })
    }

    async fn prune(&self, before: DateTime<Utc>) -> WatchResult<u64> {
        let mut state = self.state.write().await;
        Ok(state.remove_where(|e| e.created_at < before))
    }

    async fn prune_by_kind(&self, kind: EntryKind, before: DateTime<Utc>) -> WatchResult<u64> {
        let mut state = self.state.write().await;
        Ok(state.remove_where(|e| e.kind == kind && e.created_at < before))
    }

    async fn clear(&self) -> WatchResult<()> {
        let mut state = self.state.write().await;
        state.entries.clear();
        state.tag_index.clear();
        state.monitored.clear();
        Ok(())
    }

    async fn add_tags(&self, id: u64, tags: &[String]) -> WatchResult<()> {
        let tags = normalise_tags(tags);
        let mut state = self.state.write().await;
        let Some(entry) = state.entries.get_mut(&id) else {
            return Ok(());
        };
        let mut merged: BTreeSet<String> = entry.tags.drain(..).collect();
        merged.extend(tags.iter().cloned());
        entry.tags = merged.into_iter().collect();
        for tag in tags {
            state.tag_index.entry(tag).or_default().insert(id);
        }
        Ok(())
    }

    async fn remove_tags(&self, id: u64, tags: &[String]) -> WatchResult<()> {
        let tags = normalise_tags(tags);
        let mut state = self.state.write().await;
        let Some(entry) = state.entries.get_mut(&id) else {
            return Ok(());
        };
        entry.tags.retain(|t| !tags.contains(t));
        for tag in &tags {
            if let Some(ids) = state.tag_index.get_mut(tag) {
                ids.remove(&id);
                if ids.is_empty() {
                    state.tag_index.remove(tag);
                }
            }
        }
        Ok(())
    }

    async fn entry_tags(&self, id: u64) -> WatchResult<Vec<String>> {
        let state = self.state.read().await;
        Ok(state
            .entries
            .get(&id)
            .map(|e| e.tags.clone())
            .unwrap_or_default())
    }

    async fn all_tags(&self) -> WatchResult<Vec<TagCount>> {
        let state = self.state.read().await;
        let mut counts: Vec<TagCount> = state
            .tag_index
            .iter()
            .map(|(tag, ids)| TagCount {
                tag: tag.clone(),
                count: ids.len() as u64,
            })
            .collect();
        counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.tag.cmp(&b.tag)));
        Ok(counts)
    }

    async fn find_by_tags(
        &self,
        tags: &[String],
        logic: TagLogic,
        limit: usize,
    ) -> WatchResult<Vec<Entry>> {
        let tags = normalise_tags(tags);
        if tags.is_empty() {
            return Ok(Vec::new());
        }
        let state = self.state.read().await;
        let empty = BTreeSet::new();
        let sets: Vec<&BTreeSet<u64>> = tags
            .iter()
            .map(|t| state.tag_index.get(t).unwrap_or(&empty))
            .collect();
        let ids: BTreeSet<u64> = match logic {
            TagLogic::Any => sets.iter().flat_map(|s| s.iter().copied()).collect(),
            TagLogic::All => sets
                .first()
                .map(|first| {
                    first
                        .iter()
                        .copied()
                        .filter(|id| sets.iter().all(|s| s.contains(id)))
                        .collect()
                })
                .unwrap_or_default(),
        };
        Ok(ids
            .iter()
            .rev()
            .filter_map(|id| state.entries.get(id).cloned())
            .take(limit)
            .collect())
    }

    async fn add_monitored_tag(&self, tag: &str) -> WatchResult<MonitoredTag> {
        let tag = normalise_tag(tag).ok_or_else(|| WatchError::invalid("tag is empty"))?;
        let mut state = self.state.write().await;
        if let Some(existing) = state.monitored.get(&tag) {
            return Ok(existing.clone());
        }
        state.next_monitored_id += 1;
        let monitored = MonitoredTag {
            id: state.next_monitored_id,
            tag: tag.clone(),
            created_at: now_micros(),
        };
        state.monitored.insert(tag, monitored.clone());
        Ok(monitored)
    }

    async fn remove_monitored_tag(&self, tag: &str) -> WatchResult<bool> {
        let Some(tag) = normalise_tag(tag) else {
            return Ok(false);
        };
        let mut state = self.state.write().await;
        Ok(state.monitored.remove(&tag).is_some())
    }

    async fn monitored_tags(&self) -> WatchResult<Vec<MonitoredTag>> {
        let state = self.state.read().await;
        Ok(state.monitored.values().cloned().collect())
    }

    async fn resolve_entry(&self, id: u64) -> WatchResult<bool> {
        let mut state = self.state.write().await;
        Ok(state
            .entries
            .get_mut(&id)
            .map(|e| e.resolved_at = Some(now_micros()))
            .is_some())
    }

    async fn unresolve_entry(&self, id: u64) -> WatchResult<bool> {
        let mut state = self.state.write().await;
        Ok(state
            .entries
            .get_mut(&id)
            .map(|e| e.resolved_at = None)
            .is_some())
    }

    async fn update_family_hash(&self, id: u64, hash: &str) -> WatchResult<bool> {
        let mut state = self.state.write().await;
        Ok(state
            .entries
            .get_mut(&id)
            .map(|e| e.family_hash = Some(hash.to_owned()))
            .is_some())
    }

    async fn find_by_family_hash(&self, hash: &str, limit: usize) -> WatchResult<Vec<Entry>> {
        let state = self.state.read().await;
        Ok(state
            .newest()
            .filter(|e| e.family_hash.as_deref() == Some(hash))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn grouped_by_family_hash(
        &self,
        kind: Option<EntryKind>,
        limit: usize,
    ) -> WatchResult<Vec<FamilyGroup>> {
        let state = self.state.read().await;
        Ok(group_families(
            state.newest().filter(|e| kind.map_or(true, |k| e.kind == k)),
            limit,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{LogPayload, Payload};

    fn log(message: &str) -> NewEntry {
        NewEntry::new(Payload::Log(LogPayload {
            message: message.to_string(),
            ..Default::default()
        }))
    }

    #[tokio::test]
    async fn ids_are_not_reused_after_clear() {
        let store = MemoryStore::new();
        let first = store.save(log("a")).await.unwrap();
        store.clear().await.unwrap();
        let second = store.save(log("b")).await.unwrap();
        assert!(second.id > first.id);
    }

    #[tokio::test]
    async fn eviction_drops_tag_index() {
        let store = MemoryStore::with_max_entries(1);
        let first = store.save(log("a")).await.unwrap();
        store.add_tags(first.id, &["old".to_string()]).await.unwrap();
        store.save(log("b")).await.unwrap();

        assert!(store.find_by_id(first.id).await.unwrap().is_none());
        assert!(store.all_tags().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn tags_on_missing_entry_are_ignored() {
        let store = MemoryStore::new();
        store.add_tags(42, &["x".to_string()]).await.unwrap();
        assert!(store.entry_tags(42).await.unwrap().is_empty());
        assert!(store.all_tags().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_monitored_tag_is_rejected() {
        let store = MemoryStore::new();
        assert!(store.add_monitored_tag("  ").await.is_err());
        assert!(!store.remove_monitored_tag("").await.unwrap());
    }
}
