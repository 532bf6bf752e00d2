//! Shared test fixtures.
//!
//! ```text
//! memory_store ──► collector
//! flaky_store  ──► (collector built per test)
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rstest::fixture;

use crate::config::CollectorConfig;
use crate::entry::{
    CachePayload, Entry, EntryKind, ExceptionPayload, FamilyGroup, LogLevel, LogPayload,
    MonitoredTag, NewEntry, Payload, TagCount,
};
use crate::store::{
    CursorPage, CursorParams, EntryQuery, EntryStats, EntryStore, MemoryStore, StorageStats,
    TagLogic,
};
use crate::collector::Collector;
use crate::{WatchError, WatchResult};

/// Collector settings that never flush on size alone.
#[fixture]
pub fn collector_config() -> CollectorConfig {
    CollectorConfig {
        buffer_size: 100,
        flush_interval_ms: 1_000,
        flush_max_attempts: 3,
        flush_initial_delay_ms: 10,
        flush_max_delay_ms: 100,
        max_buffered_entries: None,
    }
}

#[fixture]
pub fn memory_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}

#[fixture]
pub fn flaky_store() -> Arc<FlakyStore> {
    Arc::new(FlakyStore::new())
}

#[fixture]
pub fn collector(memory_store: Arc<MemoryStore>, collector_config: CollectorConfig) -> Collector {
    Collector::new(memory_store, collector_config)
}

pub fn log_entry(level: LogLevel, message: &str) -> NewEntry {
    NewEntry::new(Payload::Log(LogPayload {
        level,
        message: message.to_string(),
        ..Default::default()
    }))
}

pub fn cache_entry(key: &str, hit: bool) -> NewEntry {
    NewEntry::new(Payload::Cache(CachePayload {
        operation: "get".to_string(),
        key: key.to_string(),
        hit: Some(hit),
        ..Default::default()
    }))
}

pub fn exception_entry(name: &str, message: &str) -> NewEntry {
    NewEntry::new(Payload::Exception(ExceptionPayload {
        name: name.to_string(),
        message: message.to_string(),
        stack: Some(format!("{name}: {message}\n    at handler (/app/src/api.ts:10:3)")),
        ..Default::default()
    }))
}

/// Memory store whose writes can be made to fail on demand.
pub struct FlakyStore {
    inner: MemoryStore,
    failing_saves: AtomicU32,
    save_calls: AtomicU32,
    fail_tags: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            failing_saves: AtomicU32::new(0),
            save_calls: AtomicU32::new(0),
            fail_tags: AtomicBool::new(false),
        }
    }

    /// Fail the next `n` save calls.
    pub fn fail_next_saves(&self, n: u32) {
        self.failing_saves.store(n, Ordering::SeqCst);
    }

    pub fn fail_tag_writes(&self, fail: bool) {
        self.fail_tags.store(fail, Ordering::SeqCst);
    }

    pub fn save_calls(&self) -> u32 {
        self.save_calls.load(Ordering::SeqCst)
    }

    fn check_save(&self) -> WatchResult<()> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_saves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match failing {
            Ok(_) => Err(WatchError::connection("storage unavailable")),
            Err(_) => Ok(()),
        }
    }

    fn check_tags(&self) -> WatchResult<()> {
        if self.fail_tags.load(Ordering::SeqCst) {
            return Err(WatchError::storage("tag write failed"));
        }
        Ok(())
    }
}

#[async_trait]
impl EntryStore for FlakyStore {
    async fn save(&self, entry: NewEntry) -> WatchResult<Entry> {
        self.check_save()?;
        self.inner.save(entry).await
    }

    async fn save_batch(&self, entries: Vec<NewEntry>) -> WatchResult<Vec<Entry>> {
        self.check_save()?;
        self.inner.save_batch(entries).await
    }

    async fn find_by_id(&self, id: u64) -> WatchResult<Option<Entry>> {
        self.inner.find_by_id(id).await
    }

    async fn find(&self, query: &EntryQuery) -> WatchResult<Vec<Entry>> {
        self.inner.find(query).await
    }

    async fn find_with_cursor(
        &self,
        kind: Option<EntryKind>,
        params: &CursorParams,
    ) -> WatchResult<CursorPage> {
        self.inner.find_with_cursor(kind, params).await
    }

    async fn count(&self, kind: Option<EntryKind>) -> WatchResult<u64> {
        self.inner.count(kind).await
    }

    async fn latest_sequence(&self, kind: Option<EntryKind>) -> WatchResult<Option<u64>> {
        self.inner.latest_sequence(kind).await
    }

    async fn has_entries_after(
        &self,
        sequence: u64,
        kind: Option<EntryKind>,
    ) -> WatchResult<bool> {
        self.inner.has_entries_after(sequence, kind).await
    }

    async fn stats(&self) -> WatchResult<EntryStats> {
        self.inner.stats().await
    }

    async fn storage_stats(&self) -> WatchResult<StorageStats> {
        self.inner.storage_stats().await
    }

    async fn prune(&self, before: DateTime<Utc>) -> WatchResult<u64> {
        self.inner.prune(before).await
    }

    async fn prune_by_kind(&self, kind: EntryKind, before: DateTime<Utc>) -> WatchResult<u64> {
        self.inner.prune_by_kind(kind, before).await
    }

    async fn clear(&self) -> WatchResult<()> {
        self.inner.clear().await
    }

    async fn add_tags(&self, id: u64, tags: &[String]) -> WatchResult<()> {
        self.check_tags()?;
        self.inner.add_tags(id, tags).await
    }

    async fn remove_tags(&self, id: u64, tags: &[String]) -> WatchResult<()> {
        self.check_tags()?;
        self.inner.remove_tags(id, tags).await
    }

    async fn entry_tags(&self, id: u64) -> WatchResult<Vec<String>> {
        self.inner.entry_tags(id).await
    }

    async fn all_tags(&self) -> WatchResult<Vec<TagCount>> {
        self.inner.all_tags().await
    }

    async fn find_by_tags(
        &self,
        tags: &[String],
        logic: TagLogic,
        limit: usize,
    ) -> WatchResult<Vec<Entry>> {
        self.inner.find_by_tags(tags, logic, limit).await
    }

    async fn add_monitored_tag(&self, tag: &str) -> WatchResult<MonitoredTag> {
        self.inner.add_monitored_tag(tag).await
    }

    async fn remove_monitored_tag(&self, tag: &str) -> WatchResult<bool> {
        self.inner.remove_monitored_tag(tag).await
    }

    async fn monitored_tags(&self) -> WatchResult<Vec<MonitoredTag>> {
        self.inner.monitored_tags().await
    }

    async fn resolve_entry(&self, id: u64) -> WatchResult<bool> {
        self.inner.resolve_entry(id).await
    }

    async fn unresolve_entry(&self, id: u64) -> WatchResult<bool> {
        self.inner.unresolve_entry(id).await
    }

    async fn update_family_hash(&self, id: u64, hash: &str) -> WatchResult<bool> {
        self.inner.update_family_hash(id, hash).await
    }

    async fn find_by_family_hash(&self, hash: &str, limit: usize) -> WatchResult<Vec<Entry>> {
        self.inner.find_by_family_hash(hash, limit).await
    }

    async fn grouped_by_family_hash(
        &self,
        kind: Option<EntryKind>,
        limit: usize,
    ) -> WatchResult<Vec<FamilyGroup>> {
        self.inner.grouped_by_family_hash(kind, limit).await
    }
}
