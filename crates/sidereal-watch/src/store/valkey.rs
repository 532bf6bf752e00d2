//! Valkey/Redis entry store implementation.
//!
//! Layout under the namespace prefix:
//!
//! | key | type | contents |
//! |---|---|---|
//! | `seq` | string | last assigned entry id |
//! | `entry:{id}` | string | entry JSON, tags included |
//! | `entries` | zset | every id, scored by id |
//! | `kind:{kind}` | zset | ids of one kind |
//! | `request:{id}` | zset | ids of one request |
//! | `family:{hash}` | zset | ids sharing a family hash |
//! | `created` | zset | ids scored by creation time in microseconds |
//! | `tag:{TAG}` | set | ids carrying a tag |
//! | `tag_counts` | zset | tag usage counts |
//! | `monitored` | hash | tag to monitored tag JSON |
//! | `monitored_seq` | string | last assigned monitored tag id |
//!
//! Every write is an optimistic transaction: the keys it reads are WATCHed and
//! the changes are committed in one MULTI/EXEC, retried when another writer got
//! there first. Batches WATCH `seq`, so ids are reserved and committed in order.
//! Entry updates WATCH the entry key, so concurrent tag, family and resolution
//! changes never overwrite each other.

use std::fmt::Display;
use std::ops::ControlFlow;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::AsyncCommands;

use crate::entry::{
    normalise_tag, normalise_tags, now_micros, Entry, EntryKind, FamilyGroup, MonitoredTag,
    NewEntry, TagCount,
};
use crate::{WatchError, WatchResult};

use super::{
    CursorPage, CursorParams, EntryQuery, EntryStats, EntryStore, StatsAccumulator, StorageStats,
    TagLogic,
};

/// Ids read per round trip while scanning an index.
const SCAN_CHUNK: usize = 500;

/// Commits tried before a contended transaction gives up.
const WATCH_ATTEMPTS: usize = 16;

/// Valkey/Redis-backed entry store.
#[derive(Clone)]
pub struct ValkeyStore {
    pool: Pool,
    namespace: String,
}

impl ValkeyStore {
    /// Connect to Valkey and create a new store.
    pub async fn new(
        url: &str,
        namespace: impl Into<String>,
        pool_size: usize,
    ) -> WatchResult<Self> {
        let config = Config::from_url(url);
        let pool = config
            .builder()
            .map_err(|e| WatchError::connection(e.to_string()))?
            .max_size(pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| WatchError::connection(e.to_string()))?;

        let store = Self {
            pool,
            namespace: namespace.into(),
        };

        // Test the connection
        let mut conn = store.conn().await?;
        redis::cmd("PING").query_async::<String>(&mut *conn).await?;

        Ok(store)
    }

    async fn conn(&self) -> WatchResult<Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| WatchError::connection(e.to_string()))
    }

    fn key(&self, suffix: impl Display) -> String {
        format!("{}:{}", self.namespace, suffix)
    }

    fn entry_key(&self, id: u64) -> String {
        self.key(format_args!("entry:{id}"))
    }

    fn kind_key(&self, kind: EntryKind) -> String {
        self.key(format_args!("kind:{kind}"))
    }

    fn request_key(&self, request_id: &str) -> String {
        self.key(format_args!("request:{request_id}"))
    }

    fn family_key(&self, hash: &str) -> String {
        self.key(format_args!("family:{hash}"))
    }

    fn tag_key(&self, tag: &str) -> String {
        self.key(format_args!("tag:{tag}"))
    }

    /// Smallest index that still contains every candidate.
    fn index_for(&self, kind: Option<EntryKind>, request_id: Option<&str>) -> String {
        match (request_id, kind) {
            (Some(request_id), _) => self.request_key(request_id),
            (None, Some(kind)) => self.kind_key(kind),
            (None, None) => self.key("entries"),
        }
    }

    /// Load entries by id, keeping the given order and skipping missing ones.
    async fn load(&self, conn: &mut Connection, ids: &[u64]) -> WatchResult<Vec<Entry>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = ids.iter().map(|id| self.entry_key(*id)).collect();
        let values: Vec<Option<String>> = conn.mget(&keys).await?;
        values
            .into_iter()
            .flatten()
            .map(|json| serde_json::from_str(&json).map_err(WatchError::from))
            .collect()
    }

    async fn load_one(&self, conn: &mut Connection, id: u64) -> WatchResult<Option<Entry>> {
        let json: Option<String> = conn.get(self.entry_key(id)).await?;
        json.map(|j| serde_json::from_str(&j).map_err(WatchError::from))
            .transpose()
    }

    /// Read-modify-write of one entry under WATCH.
    ///
    /// `apply` mutates the entry and queues index changes on the transaction;
    /// it returns false when nothing changed. Returns false when the entry
    /// does not exist.
    async fn update_entry<F>(&self, id: u64, mut apply: F) -> WatchResult<bool>
    where
        F: FnMut(&mut Entry, &mut redis::Pipeline) -> bool + Send,
    {
        let key = self.entry_key(id);
        let mut conn = self.conn().await?;

        for attempt in 1..=WATCH_ATTEMPTS {
            redis::cmd("WATCH")
                .arg(&key)
                .query_async::<()>(&mut *conn)
                .await?;
            let Some(mut entry) = self.load_one(&mut conn, id).await? else {
                unwatch(&mut conn).await?;
                return Ok(false);
            };

            let mut pipe = redis::pipe();
            pipe.atomic();
            if !apply(&mut entry, &mut pipe) {
                unwatch(&mut conn).await?;
                return Ok(true);
            }
            let json = match serde_json::to_string(&entry) {
                Ok(json) => json,
                Err(e) => {
                    unwatch(&mut conn).await?;
                    return Err(e.into());
                }
            };
            pipe.set(&key, json).ignore();

            let committed: Option<()> = pipe.query_async(&mut *conn).await?;
            if committed.is_some() {
                return Ok(true);
            }
            tracing::debug!(entry_id = id, attempt, "entry changed during update, retrying");
        }

        Err(WatchError::storage(format!(
            "entry {id} kept changing during update"
        )))
    }

    /// Walk an id index in chunks, keeping up to `wanted` entries accepted by
    /// `keep`.
    #[allow(clippy::too_many_arguments)]
    async fn scan<F>(
        &self,
        conn: &mut Connection,
        index: &str,
        after: Option<u64>,
        before: Option<u64>,
        ascending: bool,
        wanted: usize,
        keep: F,
    ) -> WatchResult<Vec<Entry>>
    where
        F: Fn(&Entry) -> bool + Send + Sync,
    {
        let mut found = Vec::new();
        self.scan_each(conn, index, after, before, ascending, |entry| {
            if keep(&entry) {
                found.push(entry);
                if found.len() >= wanted {
                    return ControlFlow::Break(());
                }
            }
            ControlFlow::Continue(())
        })
        .await?;
        Ok(found)
    }

    /// Walk an id index in chunks, handing every stored entry to `visit` until
    /// it breaks or the index runs out.
    async fn scan_each<F>(
        &self,
        conn: &mut Connection,
        index: &str,
        after: Option<u64>,
        before: Option<u64>,
        ascending: bool,
        mut visit: F,
    ) -> WatchResult<()>
    where
        F: FnMut(Entry) -> ControlFlow<()> + Send,
    {
        let mut min = after.map_or_else(|| "-inf".to_owned(), |a| format!("({a}"));
        let mut max = before.map_or_else(|| "+inf".to_owned(), |b| format!("({b}"));

        loop {
            let ids: Vec<u64> = if ascending {
                redis::cmd("ZRANGEBYSCORE")
                    .arg(index)
                    .arg(&min)
                    .arg(&max)
                    .arg("LIMIT")
                    .arg(0)
                    .arg(SCAN_CHUNK)
                    .query_async(&mut *conn)
                    .await?
            } else {
                redis::cmd("ZREVRANGEBYSCORE")
                    .arg(index)
                    .arg(&max)
                    .arg(&min)
                    .arg("LIMIT")
                    .arg(0)
                    .arg(SCAN_CHUNK)
                    .query_async(&mut *conn)
                    .await?
            };
            let exhausted = ids.len() < SCAN_CHUNK;
            if let Some(last) = ids.last() {
                if ascending {
                    min = format!("({last}");
                } else {
                    max = format!("({last}");
                }
            }

            for entry in self.load(conn, &ids).await? {
                if visit(entry).is_break() {
                    return Ok(());
                }
            }
            if exhausted {
                return Ok(());
            }
        }
    }

    /// Keys matching a glob under the namespace.
    async fn scan_keys(&self, conn: &mut Connection, pattern: &str) -> WatchResult<Vec<String>> {
        let pattern = self.key(pattern);
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_CHUNK)
                .query_async(&mut *conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                return Ok(keys);
            }
            cursor = next;
        }
    }

    /// Queue removal of entries and every index entry pointing at them.
    fn queue_delete(&self, pipe: &mut redis::Pipeline, entries: &[Entry]) {
        for entry in entries {
            pipe.del(self.entry_key(entry.id)).ignore();
            pipe.zrem(self.key("entries"), entry.id).ignore();
            pipe.zrem(self.kind_key(entry.kind), entry.id).ignore();
            pipe.zrem(self.key("created"), entry.id).ignore();
            if let Some(request_id) = &entry.request_id {
                pipe.zrem(self.request_key(request_id), entry.id).ignore();
            }
            if let Some(hash) = &entry.family_hash {
                pipe.zrem(self.family_key(hash), entry.id).ignore();
            }
            for tag in &entry.tags {
                pipe.srem(self.tag_key(tag), entry.id).ignore();
                pipe.zincr(self.key("tag_counts"), tag, -1).ignore();
            }
        }
        pipe.zrembyscore(self.key("tag_counts"), "-inf", 0).ignore();
    }

    /// Delete the entries among `ids` accepted by `keep`, watching them so a
    /// concurrent tag or family update is not left dangling in the indexes.
    async fn delete_where<F>(
        &self,
        conn: &mut Connection,
        ids: &[u64],
        keep: &F,
    ) -> WatchResult<u64>
    where
        F: Fn(&Entry) -> bool + Send + Sync,
    {
        let keys: Vec<String> = ids.iter().map(|id| self.entry_key(*id)).collect();
        for attempt in 1..=WATCH_ATTEMPTS {
            redis::cmd("WATCH")
                .arg(&keys)
                .query_async::<()>(&mut *conn)
                .await?;
            let doomed: Vec<Entry> = self
                .load(conn, ids)
                .await?
                .into_iter()
                .filter(|e| keep(e))
                .collect();
            if doomed.is_empty() {
                unwatch(conn).await?;
                return Ok(0);
            }

            let mut pipe = redis::pipe();
            pipe.atomic();
            self.queue_delete(&mut pipe, &doomed);
            let committed: Option<()> = pipe.query_async(&mut *conn).await?;
            if committed.is_some() {
                return Ok(doomed.len() as u64);
            }
            tracing::debug!(attempt, "entries changed during prune, retrying");
        }
        Err(WatchError::storage("entries kept changing during prune"))
    }

    async fn prune_where<F>(&self, before: DateTime<Utc>, keep: F) -> WatchResult<u64>
    where
        F: Fn(&Entry) -> bool + Send + Sync,
    {
        let mut conn = self.conn().await?;
        let ids: Vec<u64> = redis::cmd("ZRANGEBYSCORE")
            .arg(self.key("created"))
            .arg("-inf")
            .arg(format!("({}", before.timestamp_micros()))
            .query_async(&mut *conn)
            .await?;
        let mut pruned = 0;
        for chunk in ids.chunks(SCAN_CHUNK) {
            pruned += self.delete_where(&mut conn, chunk, &keep).await?;
        }
        Ok(pruned)
    }

    async fn created_bound(
        &self,
        conn: &mut Connection,
        newest: bool,
    ) -> WatchResult<Option<DateTime<Utc>>> {
        let key = self.key("created");
        let bound: Vec<(u64, f64)> = if newest {
            conn.zrevrange_withscores(key, 0, 0).await?
        } else {
            conn.zrange_withscores(key, 0, 0).await?
        };
        #[allow(clippy::cast_possible_truncation)]
        let micros = bound.first().map(|(_, score)| *score as i64);
        Ok(micros.and_then(DateTime::from_timestamp_micros))
    }
}

async fn unwatch(conn: &mut Connection) -> WatchResult<()> {
    redis::cmd("UNWATCH").query_async::<()>(&mut *conn).await?;
    Ok(())
}

#[async_trait]
impl EntryStore for ValkeyStore {
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
        let mut conn = self.conn().await?;
        let seq_key = self.key("seq");

        let count = entries.len() as u64;
        let created_at = now_micros();
        let micros = created_at.timestamp_micros();
        let mut saved: Vec<Entry> = entries
            .into_iter()
            .map(|new| Entry::from_new(0, new, created_at))
            .collect();

        for attempt in 1..=WATCH_ATTEMPTS {
            redis::cmd("WATCH")
                .arg(&seq_key)
                .query_async::<()>(&mut *conn)
                .await?;
            let last: Option<u64> = conn.get(&seq_key).await?;
            let first = last.unwrap_or(0) + 1;
            for (entry, id) in saved.iter_mut().zip(first..) {
                entry.id = id;
            }

            let encoded = match saved
                .iter()
                .map(serde_json::to_string)
                .collect::<Result<Vec<_>, _>>()
            {
                Ok(encoded) => encoded,
                Err(e) => {
                    unwatch(&mut conn).await?;
                    return Err(e.into());
                }
            };

            let mut pipe = redis::pipe();
            pipe.atomic();
            pipe.incr(&seq_key, count).ignore();
            for (entry, json) in saved.iter().zip(encoded) {
                pipe.set(self.entry_key(entry.id), json).ignore();
                pipe.zadd(self.key("entries"), entry.id, entry.id).ignore();
                pipe.zadd(self.kind_key(entry.kind), entry.id, entry.id).ignore();
                pipe.zadd(self.key("created"), entry.id, micros).ignore();
                if let Some(request_id) = &entry.request_id {
                    pipe.zadd(self.request_key(request_id), entry.id, entry.id)
                        .ignore();
                }
            }

            let committed: Option<()> = pipe.query_async(&mut *conn).await?;
            if committed.is_some() {
                return Ok(saved);
            }
            tracing::debug!(attempt, count, "sequence moved during batch save, retrying");
        }

        Err(WatchError::storage("entry sequence kept moving during batch save"))
    }

    async fn find_by_id(&self, id: u64) -> WatchResult<Option<Entry>> {
        let mut conn = self.conn().await?;
        self.load_one(&mut conn, id).await
    }

    async fn find(&self, query: &EntryQuery) -> WatchResult<Vec<Entry>> {
        let mut conn = self.conn().await?;
        let index = self.index_for(query.kind, query.request_id.as_deref());
        let wanted = query
            .limit
            .map_or(usize::MAX, |limit| limit.saturating_add(query.offset));
        if wanted == 0 {
            return Ok(Vec::new());
        }
        let found = self
            .scan(&mut conn, &index, None, None, false, wanted, |e| query.matches(e))
            .await?;
        Ok(found.into_iter().skip(query.offset).collect())
    }

    async fn find_with_cursor(
        &self,
        kind: Option<EntryKind>,
        params: &CursorParams,
    ) -> WatchResult<CursorPage> {
        let mut conn = self.conn().await?;
        let index = self.index_for(kind, params.filter.request_id.as_deref());
        let keep = |e: &Entry| kind.map_or(true, |k| e.kind == k) && params.filter.matches(e);

        let rows = self
            .scan(
                &mut conn,
                &index,
                params.after,
                params.before,
                params.ascending(),
                params.page_limit() + 1,
                keep,
            )
            .await?;

        let total: u64 = if params.filter.is_empty() {
            conn.zcard(&index).await?
        } else {
            let mut total = 0;
            self.scan_each(&mut conn, &index, None, None, true, |entry| {
                if keep(&entry) {
                    total += 1;
                }
                ControlFlow::Continue(())
            })
            .await?;
            total
        };

        Ok(CursorPage::from_candidates(rows, params, total))
    }

    async fn count(&self, kind: Option<EntryKind>) -> WatchResult<u64> {
        let mut conn = self.conn().await?;
        let count: u64 = conn.zcard(self.index_for(kind, None)).await?;
        Ok(count)
    }

    async fn latest_sequence(&self, kind: Option<EntryKind>) -> WatchResult<Option<u64>> {
        let mut conn = self.conn().await?;
        let ids: Vec<u64> = conn.zrevrange(self.index_for(kind, None), 0, 0).await?;
        Ok(ids.first().copied())
    }

    async fn has_entries_after(
        &self,
        sequence: u64,
        kind: Option<EntryKind>,
    ) -> WatchResult<bool> {
        let mut conn = self.conn().await?;
        let count: u64 = conn
            .zcount(self.index_for(kind, None), format!("({sequence}"), "+inf")
            .await?;
        Ok(count > 0)
    }

    async fn stats(&self) -> WatchResult<EntryStats> {
        let mut conn = self.conn().await?;

        let mut acc = StatsAccumulator::default();
        for kind in [EntryKind::Request, EntryKind::Query, EntryKind::Exception] {
            let index = self.kind_key(kind);
            self.scan_each(&mut conn, &index, None, None, true, |entry| {
                acc.record(&entry);
                ControlFlow::Continue(())
            })
            .await?;
        }
        let mut stats = acc.finish();

        let mut pipe = redis::pipe();
        for kind in EntryKind::ALL {
            pipe.zcard(self.kind_key(kind));
        }
        let counts: Vec<u64> = pipe.query_async(&mut *conn).await?;
        stats.total = 0;
        for (kind, count) in EntryKind::ALL.into_iter().zip(counts) {
            stats.by_kind.insert(kind, count);
            stats.total += count;
        }

        Ok(stats)
    }

    async fn storage_stats(&self) -> WatchResult<StorageStats> {
        let stats = self.stats().await?;
        let mut conn = self.conn().await?;
        Ok(StorageStats {
            stats,
            storage_size: None,
            oldest_entry: self.created_bound(&mut conn, false).await?,
            newest_entry: self.created_bound(&mut conn, true).await?,
        })
    }

    async fn prune(&self, before: DateTime<Utc>) -> WatchResult<u64> {
        self.prune_where(before, |_| true).await
    }

    async fn prune_by_kind(&self, kind: EntryKind, before: DateTime<Utc>) -> WatchResult<u64> {
        self.prune_where(before, |e| e.kind == kind).await
    }

    async fn clear(&self) -> WatchResult<()> {
        let mut conn = self.conn().await?;
        let keep = [self.key("seq"), self.key("monitored_seq")];
        let keys: Vec<String> = self
            .scan_keys(&mut conn, "*")
            .await?
            .into_iter()
            .filter(|k| !keep.contains(k))
            .collect();
        for chunk in keys.chunks(SCAN_CHUNK) {
            conn.del::<_, ()>(chunk).await?;
        }
        Ok(())
    }

    async fn add_tags(&self, id: u64, tags: &[String]) -> WatchResult<()> {
        let tags = normalise_tags(tags);
        if tags.is_empty() {
            return Ok(());
        }
        let counts = self.key("tag_counts");
        self.update_entry(id, |entry, pipe| {
            let added: Vec<String> = tags
                .iter()
                .filter(|t| !entry.tags.contains(t))
                .cloned()
                .collect();
            for tag in &added {
                pipe.sadd(self.tag_key(tag), id).ignore();
                pipe.zincr(&counts, tag, 1).ignore();
            }
            entry.tags.extend(added.iter().cloned());
            entry.tags.sort();
            !added.is_empty()
        })
        .await?;
        Ok(())
    }

    async fn remove_tags(&self, id: u64, tags: &[String]) -> WatchResult<()> {
        let tags = normalise_tags(tags);
        if tags.is_empty() {
            return Ok(());
        }
        let counts = self.key("tag_counts");
        self.update_entry(id, |entry, pipe| {
            let removed: Vec<String> = tags
                .iter()
                .filter(|t| entry.tags.contains(t))
                .cloned()
                .collect();
            if removed.is_empty() {
                return false;
            }
            for tag in &removed {
                pipe.srem(self.tag_key(tag), id).ignore();
                pipe.zincr(&counts, tag, -1).ignore();
            }
            pipe.zrembyscore(&counts, "-inf", 0).ignore();
            entry.tags.retain(|t| !removed.contains(t));
            true
        })
        .await?;
        Ok(())
    }

    async fn entry_tags(&self, id: u64) -> WatchResult<Vec<String>> {
        let mut conn = self.conn().await?;
        Ok(self
            .load_one(&mut conn, id)
            .await?
            .map(|e| e.tags)
            .unwrap_or_default())
    }

    async fn all_tags(&self) -> WatchResult<Vec<TagCount>> {
        let mut conn = self.conn().await?;
        let counts: Vec<(String, f64)> = conn
            .zrevrange_withscores(self.key("tag_counts"), 0, -1)
            .await?;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let mut counts: Vec<TagCount> = counts
            .into_iter()
            .filter(|(_, count)| *count > 0.0)
            .map(|(tag, count)| TagCount {
                tag,
                count: count as u64,
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
        let mut conn = self.conn().await?;
        let keys: Vec<String> = tags.iter().map(|t| self.tag_key(t)).collect();
        let mut ids: Vec<u64> = match logic {
            TagLogic::Any => conn.sunion(&keys).await?,
            TagLogic::All => conn.sinter(&keys).await?,
        };
        ids.sort_unstable_by(|a, b| b.cmp(a));
        ids.truncate(limit);
        self.load(&mut conn, &ids).await
    }

    async fn add_monitored_tag(&self, tag: &str) -> WatchResult<MonitoredTag> {
        let tag = normalise_tag(tag).ok_or_else(|| WatchError::invalid("tag is empty"))?;
        let mut conn = self.conn().await?;
        let key = self.key("monitored");

        let existing: Option<String> = conn.hget(&key, &tag).await?;
        if let Some(json) = existing {
            return Ok(serde_json::from_str(&json)?);
        }

        let id: u64 = conn.incr(self.key("monitored_seq"), 1).await?;
        let monitored = MonitoredTag {
            id,
            tag: tag.clone(),
            created_at: now_micros(),
        };
        let inserted: bool = conn
            .hset_nx(&key, &tag, serde_json::to_string(&monitored)?)
            .await?;
        if inserted {
            return Ok(monitored);
        }

        let json: String = conn.hget(&key, &tag).await?;
        Ok(serde_json::from_str(&json)?)
    }

    async fn remove_monitored_tag(&self, tag: &str) -> WatchResult<bool> {
        let Some(tag) = normalise_tag(tag) else {
            return Ok(false);
        };
        let mut conn = self.conn().await?;
        let removed: u64 = conn.hdel(self.key("monitored"), tag).await?;
        Ok(removed > 0)
    }

    async fn monitored_tags(&self) -> WatchResult<Vec<MonitoredTag>> {
        let mut conn = self.conn().await?;
        let values: Vec<String> = conn.hvals(self.key("monitored")).await?;
        let mut tags = values
            .iter()
            .map(|json| serde_json::from_str(json))
            .collect::<Result<Vec<MonitoredTag>, _>>()?;
        tags.sort_by(|a, b| a.tag.cmp(&b.tag));
        Ok(tags)
    }

    async fn resolve_entry(&self, id: u64) -> WatchResult<bool> {
        self.update_entry(id, |entry, _| {
            entry.resolved_at = Some(now_micros());
            true
        })
        .await
    }

    async fn unresolve_entry(&self, id: u64) -> WatchResult<bool> {
        self.update_entry(id, |entry, _| entry.resolved_at.take().is_some())
            .await
    }

    async fn update_family_hash(&self, id: u64, hash: &str) -> WatchResult<bool> {
        self.update_entry(id, |entry, pipe| {
            if let Some(previous) = entry.family_hash.replace(hash.to_owned()) {
                pipe.zrem(self.family_key(&previous), id).ignore();
            }
            pipe.zadd(self.family_key(hash), id, id).ignore();
            true
        })
        .await
    }

    async fn find_by_family_hash(&self, hash: &str, limit: usize) -> WatchResult<Vec<Entry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        let stop = isize::try_from(limit).unwrap_or(isize::MAX) - 1;
        let ids: Vec<u64> = conn.zrevrange(self.family_key(hash), 0, stop).await?;
        self.load(&mut conn, &ids).await
    }

    async fn grouped_by_family_hash(
        &self,
        kind: Option<EntryKind>,
        limit: usize,
    ) -> WatchResult<Vec<FamilyGroup>> {
        let mut conn = self.conn().await?;
        let prefix = self.key("family:");
        let mut groups = Vec::new();

        for key in self.scan_keys(&mut conn, "family:*").await? {
            let Some(hash) = key.strip_prefix(&prefix) else {
                continue;
            };
            let members = self
                .scan(&mut conn, &key, None, None, false, usize::MAX, |e| {
                    kind.map_or(true, |k| e.kind == k)
                })
                .await?;
            if let Some(latest) = members.first() {
                groups.push(FamilyGroup {
                    family_hash: hash.to_owned(),
                    count: members.len() as u64,
                    latest_entry: latest.clone(),
                });
            }
        }

        groups.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| b.latest_entry.id.cmp(&a.latest_entry.id))
        });
        groups.truncate(limit);
        Ok(groups)
    }
}
