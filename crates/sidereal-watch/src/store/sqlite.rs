//! SQLite entry store implementation.

use std::ops::ControlFlow;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};

use crate::entry::{
    normalise_tag, normalise_tags, now_micros, Entry, EntryKind, FamilyGroup, MonitoredTag,
    NewEntry, Payload, TagCount,
};
use crate::{WatchError, WatchResult};

use super::{
    CursorPage, CursorParams, EntryFilter, EntryQuery, EntryStats, EntryStore, StorageStats,
    TagLogic,
};

/// Rows fetched per round trip when filters have to be checked in process.
const SCAN_CHUNK: i64 = 500;

const ENTRY_COLUMNS: &str = "e.id, e.kind, e.request_id, e.payload, e.created_at, \
     e.family_hash, e.resolved_at, \
     (SELECT json_group_array(t.tag) FROM watch_tags t WHERE t.entry_id = e.id) AS tags";

/// SQLite-backed entry store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `url`.
    ///
    /// The required tables are created if they don't exist. `sqlite::memory:`
    /// databases are held on a single connection that is never recycled.
    pub async fn new(url: &str, max_connections: u32) -> WatchResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(max_connections.max(1))
                .connect_with(options)
                .await?
        };

        Self::from_pool(pool).await
    }

    /// Private in-memory database.
    pub async fn in_memory() -> WatchResult<Self> {
        Self::new("sqlite::memory:", 1).await
    }

    /// Create a store from an existing connection pool.
    pub async fn from_pool(pool: SqlitePool) -> WatchResult<Self> {
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Ensure the required tables exist.
    async fn ensure_schema(&self) -> WatchResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS watch_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                request_id TEXT,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                family_hash TEXT,
                resolved_at INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS watch_tags (
                entry_id INTEGER NOT NULL REFERENCES watch_entries(id) ON DELETE CASCADE,
                tag TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (entry_id, tag)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS watch_monitored_tags (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tag TEXT NOT NULL UNIQUE,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for index in [
            "CREATE INDEX IF NOT EXISTS idx_watch_entries_kind ON watch_entries (kind, id)",
            "CREATE INDEX IF NOT EXISTS idx_watch_entries_request ON watch_entries (request_id)",
            "CREATE INDEX IF NOT EXISTS idx_watch_entries_created_at ON watch_entries (created_at)",
            "CREATE INDEX IF NOT EXISTS idx_watch_entries_family ON watch_entries (family_hash)",
            "CREATE INDEX IF NOT EXISTS idx_watch_tags_tag ON watch_tags (tag)",
        ] {
            sqlx::query(index).execute(&self.pool).await?;
        }

        Ok(())
    }

    /// Parse a row into an [`Entry`].
    fn row_to_entry(row: &SqliteRow) -> WatchResult<Entry> {
        let id: i64 = row.try_get("id")?;
        let request_id: Option<String> = row.try_get("request_id")?;
        let payload_json: String = row.try_get("payload")?;
        let created_at: i64 = row.try_get("created_at")?;
        let family_hash: Option<String> = row.try_get("family_hash")?;
        let resolved_at: Option<i64> = row.try_get("resolved_at")?;
        let tags_json: Option<String> = row.try_get("tags")?;

        let payload: Payload = serde_json::from_str(&payload_json)?;
        let mut tags: Vec<String> = match tags_json {
            Some(json) => serde_json::from_str(&json)?,
            None => Vec::new(),
        };
        tags.sort();

        Ok(Entry {
            id: from_sql_id(id)?,
            kind: payload.kind(),
            request_id,
            payload,
            created_at: from_micros(created_at)?,
            family_hash,
            resolved_at: resolved_at.map(from_micros).transpose()?,
            tags,
        })
    }

    fn rows_to_entries(rows: &[SqliteRow]) -> WatchResult<Vec<Entry>> {
        rows.iter().map(Self::row_to_entry).collect()
    }

    /// Fetch up to `limit` rows matching the indexed criteria, in id order.
    async fn fetch_chunk(
        &self,
        kind: Option<EntryKind>,
        filter: &EntryFilter,
        after: Option<u64>,
        before: Option<u64>,
        ascending: bool,
        limit: i64,
    ) -> WatchResult<Vec<Entry>> {
        let mut qb = select_entries();
        push_indexed(&mut qb, kind, filter);
        push_id_bounds(&mut qb, after, before);
        qb.push(if ascending {
            " ORDER BY e.id ASC"
        } else {
            " ORDER BY e.id DESC"
        });
        qb.push(" LIMIT ").push_bind(limit);
        let rows = qb.build().fetch_all(&self.pool).await?;
        Self::rows_to_entries(&rows)
    }

    /// Walk the id range in chunks, keeping entries accepted by the filter.
    async fn scan(
        &self,
        kind: Option<EntryKind>,
        filter: &EntryFilter,
        after: Option<u64>,
        before: Option<u64>,
        ascending: bool,
        wanted: usize,
    ) -> WatchResult<Vec<Entry>> {
        let mut found = Vec::new();
        self.scan_each(kind, filter, after, before, ascending, |entry| {
            found.push(entry);
            if found.len() >= wanted {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .await?;
        Ok(found)
    }

    /// Walk candidates in id order, handing each filter match to `visit`
    /// until it breaks or the candidates run out.
    async fn scan_each<F>(
        &self,
        kind: Option<EntryKind>,
        filter: &EntryFilter,
        mut after: Option<u64>,
        mut before: Option<u64>,
        ascending: bool,
        mut visit: F,
    ) -> WatchResult<()>
    where
        F: FnMut(Entry) -> ControlFlow<()> + Send,
    {
        loop {
            let chunk = self
                .fetch_chunk(kind, filter, after, before, ascending, SCAN_CHUNK)
                .await?;
            let exhausted = (chunk.len() as i64) < SCAN_CHUNK;
            if let Some(last) = chunk.last() {
                if ascending {
                    after = Some(last.id);
                } else {
                    before = Some(last.id);
                }
            }
            for entry in chunk {
                if filter.matches(&entry) && visit(entry).is_break() {
                    return Ok(());
                }
            }
            if exhausted {
                return Ok(());
            }
        }
    }

    async fn count_matching(
        &self,
        kind: Option<EntryKind>,
        filter: &EntryFilter,
    ) -> WatchResult<u64> {
        if filter.has_payload_criteria() {
            let mut count = 0;
            self.scan_each(kind, filter, None, None, true, |_| {
                count += 1;
                ControlFlow::Continue(())
            })
            .await?;
            return Ok(count);
        }
        let mut qb =
            QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM watch_entries e WHERE 1 = 1");
        push_indexed(&mut qb, kind, filter);
        let count: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(count.unsigned_abs())
    }

    async fn entries_by_ids(&self, ids: &[i64]) -> WatchResult<Vec<Entry>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb = select_entries();
        qb.push(" AND e.id IN (");
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        qb.push(") ORDER BY e.id DESC");
        let rows = qb.build().fetch_all(&self.pool).await?;
        Self::rows_to_entries(&rows)
    }
}

fn select_entries<'a>() -> QueryBuilder<'a, Sqlite> {
    QueryBuilder::new(format!(
        "SELECT {ENTRY_COLUMNS} FROM watch_entries e WHERE 1 = 1"
    ))
}

/// Push the criteria that indexes can answer.
fn push_indexed(qb: &mut QueryBuilder<'_, Sqlite>, kind: Option<EntryKind>, filter: &EntryFilter) {
    if let Some(kind) = kind {
        qb.push(" AND e.kind = ").push_bind(kind.as_str());
    }
    if let Some(request_id) = &filter.request_id {
        qb.push(" AND e.request_id = ").push_bind(request_id.clone());
    }
    if let Some(hash) = &filter.family_hash {
        qb.push(" AND e.family_hash = ").push_bind(hash.clone());
    }
    let tags = filter.normalised_tags();
    if !tags.is_empty() {
        qb.push(
            " AND EXISTS (SELECT 1 FROM watch_tags ft WHERE ft.entry_id = e.id AND ft.tag IN (",
        );
        let mut separated = qb.separated(", ");
        for tag in tags {
            separated.push_bind(tag);
        }
        qb.push("))");
    }
}

fn push_id_bounds(qb: &mut QueryBuilder<'_, Sqlite>, after: Option<u64>, before: Option<u64>) {
    if let Some(after) = after {
        qb.push(" AND e.id > ").push_bind(to_sql_id(after));
    }
    if let Some(before) = before {
        qb.push(" AND e.id < ").push_bind(to_sql_id(before));
    }
}

fn to_sql_id(id: u64) -> i64 {
    i64::try_from(id).unwrap_or(i64::MAX)
}

fn from_sql_id(id: i64) -> WatchResult<u64> {
    u64::try_from(id).map_err(|_| WatchError::storage(format!("negative entry id: {id}")))
}

fn limit_of(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn from_micros(micros: i64) -> WatchResult<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| WatchError::storage(format!("timestamp out of range: {micros}")))
}

fn row_to_monitored(row: &SqliteRow) -> WatchResult<MonitoredTag> {
    let id: i64 = row.try_get("id")?;
    let tag: String = row.try_get("tag")?;
    let created_at: i64 = row.try_get("created_at")?;
    Ok(MonitoredTag {
        id: from_sql_id(id)?,
        tag,
        created_at: from_micros(created_at)?,
    })
}

#[async_trait]
impl EntryStore for SqliteStore {
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

        let created_at = now_micros();
        let mut tx = self.pool.begin().await?;
        let mut saved = Vec::with_capacity(entries.len());
        for entry in entries {
            let payload = serde_json::to_string(&entry.payload)?;
            let result = sqlx::query(
                r#"
                INSERT INTO watch_entries (kind, request_id, payload, created_at)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(entry.kind().as_str())
            .bind(&entry.request_id)
            .bind(payload)
            .bind(created_at.timestamp_micros())
            .execute(&mut *tx)
            .await?;

            let id = from_sql_id(result.last_insert_rowid())?;
            saved.push(Entry::from_new(id, entry, created_at));
        }
        tx.commit().await?;

        Ok(saved)
    }

    async fn find_by_id(&self, id: u64) -> WatchResult<Option<Entry>> {
        let mut qb = select_entries();
        qb.push(" AND e.id = ").push_bind(to_sql_id(id));
        let row = qb.build().fetch_optional(&self.pool).await?;

        match row {
            Some(r) => Ok(Some(Self::row_to_entry(&r)?)),
            None => Ok(None),
        }
    }

    async fn find(&self, query: &EntryQuery) -> WatchResult<Vec<Entry>> {
        let mut qb = select_entries();
        if let Some(kind) = query.kind {
            qb.push(" AND e.kind = ").push_bind(kind.as_str());
        }
        if let Some(request_id) = &query.request_id {
            qb.push(" AND e.request_id = ").push_bind(request_id.clone());
        }
        if let Some(since) = query.since {
            qb.push(" AND e.created_at >= ").push_bind(since.timestamp_micros());
        }
        if let Some(until) = query.until {
            qb.push(" AND e.created_at <= ").push_bind(until.timestamp_micros());
        }
        qb.push(" ORDER BY e.id DESC LIMIT ")
            .push_bind(query.limit.map_or(-1, limit_of))
            .push(" OFFSET ")
            .push_bind(limit_of(query.offset));

        let rows = qb.build().fetch_all(&self.pool).await?;
        Self::rows_to_entries(&rows)
    }

    async fn find_with_cursor(
        &self,
        kind: Option<EntryKind>,
        params: &CursorParams,
    ) -> WatchResult<CursorPage> {
        let wanted = params.page_limit() + 1;
        let rows = if params.filter.has_payload_criteria() {
            self.scan(
                kind,
                &params.filter,
                params.after,
                params.before,
                params.ascending(),
                wanted,
            )
            .await?
        } else {
            self.fetch_chunk(
                kind,
                &params.filter,
                params.after,
                params.before,
                params.ascending(),
                limit_of(wanted),
            )
            .await?
        };
        let total = self.count_matching(kind, &params.filter).await?;
        Ok(CursorPage::from_candidates(rows, params, total))
    }

    async fn count(&self, kind: Option<EntryKind>) -> WatchResult<u64> {
        self.count_matching(kind, &EntryFilter::default()).await
    }

    async fn latest_sequence(&self, kind: Option<EntryKind>) -> WatchResult<Option<u64>> {
        let mut qb =
            QueryBuilder::<Sqlite>::new("SELECT MAX(e.id) FROM watch_entries e WHERE 1 = 1");
        if let Some(kind) = kind {
            qb.push(" AND e.kind = ").push_bind(kind.as_str());
        }
        let max: Option<i64> = qb.build_query_scalar().fetch_one(&self.pool).await?;
        max.map(from_sql_id).transpose()
    }

    async fn has_entries_after(
        &self,
        sequence: u64,
        kind: Option<EntryKind>,
    ) -> WatchResult<bool> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT EXISTS (SELECT 1 FROM watch_entries e WHERE e.id > ",
        );
        qb.push_bind(to_sql_id(sequence));
        if let Some(kind) = kind {
            qb.push(" AND e.kind = ").push_bind(kind.as_str());
        }
        qb.push(")");
        let exists: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(exists != 0)
    }

    async fn stats(&self) -> WatchResult<EntryStats> {
        let mut stats = EntryStats::default();

        let rows = sqlx::query("SELECT kind, COUNT(*) AS count FROM watch_entries GROUP BY kind")
            .fetch_all(&self.pool)
            .await?;
        for row in rows {
            let kind: String = row.try_get("kind")?;
            let count: i64 = row.try_get("count")?;
            let kind: EntryKind = kind.parse().map_err(WatchError::storage)?;
            stats.by_kind.insert(kind, count.unsigned_abs());
            stats.total += count.unsigned_abs();
        }

        stats.avg_request_duration = sqlx::query_scalar(
            r#"
            SELECT AVG(json_extract(payload, '$.payload.duration'))
            FROM watch_entries
            WHERE kind = 'request'
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let slow: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM watch_entries
            WHERE kind = 'query' AND json_extract(payload, '$.payload.slow') = 1
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        stats.slow_queries = slow.unsigned_abs();

        let unresolved: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM watch_entries
            WHERE kind = 'exception' AND resolved_at IS NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        stats.unresolved_exceptions = unresolved.unsigned_abs();

        Ok(stats)
    }

    async fn storage_stats(&self) -> WatchResult<StorageStats> {
        let stats = self.stats().await?;

        let size: i64 = sqlx::query_scalar(
            "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
        )
        .fetch_one(&self.pool)
        .await?;

        let row = sqlx::query(
            "SELECT MIN(created_at) AS oldest, MAX(created_at) AS newest FROM watch_entries",
        )
        .fetch_one(&self.pool)
        .await?;
        let oldest: Option<i64> = row.try_get("oldest")?;
        let newest: Option<i64> = row.try_get("newest")?;

        Ok(StorageStats {
            stats,
            storage_size: Some(size.unsigned_abs()),
            oldest_entry: oldest.map(from_micros).transpose()?,
            newest_entry: newest.map(from_micros).transpose()?,
        })
    }

    async fn prune(&self, before: DateTime<Utc>) -> WatchResult<u64> {
        let result = sqlx::query("DELETE FROM watch_entries WHERE created_at < ?")
            .bind(before.timestamp_micros())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn prune_by_kind(&self, kind: EntryKind, before: DateTime<Utc>) -> WatchResult<u64> {
        let result = sqlx::query("DELETE FROM watch_entries WHERE kind = ? AND created_at < ?")
            .bind(kind.as_str())
            .bind(before.timestamp_micros())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn clear(&self) -> WatchResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM watch_tags").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM watch_entries").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM watch_monitored_tags")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn add_tags(&self, id: u64, tags: &[String]) -> WatchResult<()> {
        let tags = normalise_tags(tags);
        if tags.is_empty() {
            return Ok(());
        }
        let now = now_micros().timestamp_micros();
        let mut tx = self.pool.begin().await?;
        for tag in tags {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO watch_tags (entry_id, tag, created_at)
                SELECT id, ?, ? FROM watch_entries WHERE id = ?
                "#,
            )
            .bind(tag)
            .bind(now)
            .bind(to_sql_id(id))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn remove_tags(&self, id: u64, tags: &[String]) -> WatchResult<()> {
        let tags = normalise_tags(tags);
        if tags.is_empty() {
            return Ok(());
        }
        let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM watch_tags WHERE entry_id = ");
        qb.push_bind(to_sql_id(id)).push(" AND tag IN (");
        let mut separated = qb.separated(", ");
        for tag in tags {
            separated.push_bind(tag);
        }
        qb.push(")");
        qb.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn entry_tags(&self, id: u64) -> WatchResult<Vec<String>> {
        let tags = sqlx::query_scalar("SELECT tag FROM watch_tags WHERE entry_id = ? ORDER BY tag")
            .bind(to_sql_id(id))
            .fetch_all(&self.pool)
            .await?;
        Ok(tags)
    }

    async fn all_tags(&self) -> WatchResult<Vec<TagCount>> {
        let rows = sqlx::query(
            r#"
            SELECT tag, COUNT(*) AS count
            FROM watch_tags
            GROUP BY tag
            ORDER BY count DESC, tag ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> WatchResult<TagCount> {
                let count: i64 = row.try_get("count")?;
                Ok(TagCount {
                    tag: row.try_get("tag")?,
                    count: count.unsigned_abs(),
                })
            })
            .collect()
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
        let wanted = tags.len();

        let mut qb = select_entries();
        qb.push(" AND e.id IN (SELECT entry_id FROM watch_tags WHERE tag IN (");
        let mut separated = qb.separated(", ");
        for tag in tags {
            separated.push_bind(tag);
        }
        qb.push(")");
        if logic == TagLogic::All {
            qb.push(" GROUP BY entry_id HAVING COUNT(DISTINCT tag) = ")
                .push_bind(limit_of(wanted));
        }
        qb.push(") ORDER BY e.id DESC LIMIT ").push_bind(limit_of(limit));

        let rows = qb.build().fetch_all(&self.pool).await?;
        Self::rows_to_entries(&rows)
    }

    async fn add_monitored_tag(&self, tag: &str) -> WatchResult<MonitoredTag> {
        let tag = normalise_tag(tag).ok_or_else(|| WatchError::invalid("tag is empty"))?;
        sqlx::query("INSERT OR IGNORE INTO watch_monitored_tags (tag, created_at) VALUES (?, ?)")
            .bind(&tag)
            .bind(now_micros().timestamp_micros())
            .execute(&self.pool)
            .await?;

        let row = sqlx::query("SELECT id, tag, created_at FROM watch_monitored_tags WHERE tag = ?")
            .bind(&tag)
            .fetch_one(&self.pool)
            .await?;
        row_to_monitored(&row)
    }

    async fn remove_monitored_tag(&self, tag: &str) -> WatchResult<bool> {
        let Some(tag) = normalise_tag(tag) else {
            return Ok(false);
        };
        let result = sqlx::query("DELETE FROM watch_monitored_tags WHERE tag = ?")
            .bind(tag)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn monitored_tags(&self) -> WatchResult<Vec<MonitoredTag>> {
        let rows = sqlx::query("SELECT id, tag, created_at FROM watch_monitored_tags ORDER BY tag")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_monitored).collect()
    }

    async fn resolve_entry(&self, id: u64) -> WatchResult<bool> {
        let result = sqlx::query("UPDATE watch_entries SET resolved_at = ? WHERE id = ?")
            .bind(now_micros().timestamp_micros())
            .bind(to_sql_id(id))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn unresolve_entry(&self, id: u64) -> WatchResult<bool> {
        let result = sqlx::query("UPDATE watch_entries SET resolved_at = NULL WHERE id = ?")
            .bind(to_sql_id(id))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_family_hash(&self, id: u64, hash: &str) -> WatchResult<bool> {
        let result = sqlx::query("UPDATE watch_entries SET family_hash = ? WHERE id = ?")
            .bind(hash)
            .bind(to_sql_id(id))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_by_family_hash(&self, hash: &str, limit: usize) -> WatchResult<Vec<Entry>> {
        let mut qb = select_entries();
        qb.push(" AND e.family_hash = ")
            .push_bind(hash.to_owned())
            .push(" ORDER BY e.id DESC LIMIT ")
            .push_bind(limit_of(limit));
        let rows = qb.build().fetch_all(&self.pool).await?;
        Self::rows_to_entries(&rows)
    }

    async fn grouped_by_family_hash(
        &self,
        kind: Option<EntryKind>,
        limit: usize,
    ) -> WatchResult<Vec<FamilyGroup>> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            r#"
            SELECT family_hash, COUNT(*) AS count, MAX(id) AS latest_id
            FROM watch_entries
            WHERE family_hash IS NOT NULL
            "#,
        );
        if let Some(kind) = kind {
            qb.push(" AND kind = ").push_bind(kind.as_str());
        }
        qb.push(" GROUP BY family_hash ORDER BY count DESC, latest_id DESC LIMIT ")
            .push_bind(limit_of(limit));
        let rows = qb.build().fetch_all(&self.pool).await?;

        let mut groups = Vec::with_capacity(rows.len());
        for row in &rows {
            let family_hash: String = row.try_get("family_hash")?;
            let count: i64 = row.try_get("count")?;
            let latest_id: i64 = row.try_get("latest_id")?;
            groups.push((family_hash, count.unsigned_abs(), latest_id));
        }

        let ids: Vec<i64> = groups.iter().map(|(_, _, id)| *id).collect();
        let latest = self.entries_by_ids(&ids).await?;

        Ok(groups
            .into_iter()
            .filter_map(|(family_hash, count, latest_id)| {
                let latest_id = u64::try_from(latest_id).ok()?;
                let latest_entry = latest.iter().find(|e| e.id == latest_id)?.clone();
                Some(FamilyGroup {
                    family_hash,
                    count,
                    latest_entry,
                })
            })
            .collect())
    }
}
