//! Buffered entry collection with background flush to storage.
//!
//! The collector queues entries in memory and saves them in batches when the
//! buffer reaches `buffer_size` or the flush interval elapses. After an entry
//! is saved it is fingerprinted and tagged.

mod hooks;

pub use hooks::{
    batch_filter_fn, ingest_filter_fn, BatchFilter, FnBatchFilter, FnIngestFilter, IngestFilter,
};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::config::{CollectorConfig, WatchConfig};
use crate::entry::{normalise_tags, Entry, NewEntry};
use crate::fingerprint::Fingerprinter;
use crate::store::{open_store, EntryStore};
use crate::tags::TagClassifier;
use crate::{WatchError, WatchResult};

/// Calculate exponential backoff delay for retry attempts.
///
/// The delay doubles with each attempt (2^attempt * initial_delay), capped at max_delay.
fn calculate_backoff_delay(attempt: u32, initial_delay: Duration, max_delay: Duration) -> Duration {
    let multiplier = 2u32.saturating_pow(attempt);
    initial_delay.saturating_mul(multiplier).min(max_delay)
}

/// Whether the collector is currently recording.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RecordingState {
    #[default]
    Active,
    Paused {
        paused_at: DateTime<Utc>,
        reason: Option<String>,
    },
}

impl RecordingState {
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

/// Handle for controlling a background flush task.
struct FlushHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    join_handle: JoinHandle<()>,
}

impl FlushHandle {
    /// Signal the background task to stop and wait for it to complete.
    async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.join_handle.await;
    }
}

/// Side effects of the post-save pipeline that reached storage.
#[derive(Debug, Default)]
struct Applied {
    family_hash: Option<String>,
    tags: Vec<String>,
}

/// Buffers telemetry entries and flushes them to an [`EntryStore`].
pub struct Collector {
    store: Arc<dyn EntryStore>,
    config: CollectorConfig,
    fingerprinter: Fingerprinter,
    classifier: TagClassifier,
    ingest_filter: Option<Arc<dyn IngestFilter>>,
    batch_filter: Option<Arc<dyn BatchFilter>>,
    buffer: Mutex<VecDeque<NewEntry>>,
    state: RwLock<RecordingState>,
    dropped: AtomicU64,
    flush_task: std::sync::Mutex<Option<FlushHandle>>,
}

impl Collector {
    /// Create a collector writing to `store`.
    pub fn new(store: Arc<dyn EntryStore>, config: CollectorConfig) -> Self {
        Self {
            store,
            config,
            fingerprinter: Fingerprinter::new(),
            classifier: TagClassifier::new(),
            ingest_filter: None,
            batch_filter: None,
            buffer: Mutex::new(VecDeque::new()),
            state: RwLock::new(RecordingState::Active),
            dropped: AtomicU64::new(0),
            flush_task: std::sync::Mutex::new(None),
        }
    }

    /// Open the configured store and build a collector around it.
    pub async fn from_config(config: &WatchConfig) -> WatchResult<Self> {
        let store = open_store(&config.storage).await?;
        Ok(Self::new(store, config.collector.clone())
            .with_classifier(TagClassifier::with_thresholds(config.tags)))
    }

    #[must_use]
    pub fn with_classifier(mut self, classifier: TagClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    #[must_use]
    pub fn with_ingest_filter(mut self, filter: impl IngestFilter + 'static) -> Self {
        self.ingest_filter = Some(Arc::new(filter));
        self
    }

    #[must_use]
    pub fn with_batch_filter(mut self, filter: impl BatchFilter + 'static) -> Self {
        self.batch_filter = Some(Arc::new(filter));
        self
    }

    /// The store entries are flushed to.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn EntryStore> {
        &self.store
    }

    pub async fn recording_state(&self) -> RecordingState {
        self.state.read().await.clone()
    }

    pub async fn is_recording(&self) -> bool {
        self.state.read().await.is_active()
    }

    /// Stop recording. Pausing an already paused collector keeps the first
    /// pause's time and reason.
    pub async fn pause(&self, reason: Option<String>) {
        let mut state = self.state.write().await;
        if state.is_active() {
            tracing::info!(reason = reason.as_deref(), "recording paused");
            *state = RecordingState::Paused {
                paused_at: Utc::now(),
                reason,
            };
        }
    }

    pub async fn resume(&self) {
        let mut state = self.state.write().await;
        if !state.is_active() {
            tracing::info!("recording resumed");
            *state = RecordingState::Active;
        }
    }

    /// Number of entries waiting to be flushed.
    pub async fn buffered_len(&self) -> usize {
        self.buffer.lock().await.len()
    }

    /// Entries discarded because the buffer hit `max_buffered_entries`.
    pub fn dropped_entries(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }

    /// Queue an entry for the next flush.
    ///
    /// Flushes immediately once the buffer reaches `buffer_size`. Storage
    /// failures are logged, never returned.
    pub async fn collect(&self, entry: NewEntry) {
        if !self.admit(&entry).await {
            return;
        }

        let buffered = {
            let mut buffer = self.buffer.lock().await;
            buffer.push_back(entry);
            self.enforce_capacity(&mut buffer);
            buffer.len()
        };

        if buffered >= self.config.buffer_size {
            if let Err(e) = self.flush().await {
                tracing::warn!(buffered, error = %e, "size-triggered flush failed");
            }
        }
    }

    /// Save an entry right away, bypassing the buffer.
    ///
    /// Returns `None` when recording is paused or the ingest filter rejects
    /// the entry.
    pub async fn collect_immediate(&self, entry: NewEntry) -> WatchResult<Option<Entry>> {
        if !self.admit(&entry).await {
            return Ok(None);
        }

        let mut saved = self.store.save(entry).await?;
        let applied = self.post_save(&saved).await;
        if applied.family_hash.is_some() {
            saved.family_hash = applied.family_hash;
        }
        if !applied.tags.is_empty() {
            saved.tags = normalise_tags(&[saved.tags, applied.tags].concat());
        }
        Ok(Some(saved))
    }

    /// Save everything buffered so far and return how many entries were saved.
    ///
    /// Failed saves are retried with exponential backoff. When every attempt
    /// fails the entries go back to the front of the buffer and the last
    /// error is returned.
    pub async fn flush(&self) -> WatchResult<usize> {
        let snapshot: Vec<NewEntry> = {
            let mut buffer = self.buffer.lock().await;
            std::mem::take(&mut *buffer).into()
        };
        if snapshot.is_empty() {
            return Ok(0);
        }

        let batch = self.apply_batch_filter(&snapshot).await;
        if batch.is_empty() {
            tracing::debug!(buffered = snapshot.len(), "batch filter dropped every entry");
            return Ok(0);
        }

        let max_attempts = self.config.flush_max_attempts.max(1);
        let initial_delay = Duration::from_millis(self.config.flush_initial_delay_ms);
        let max_delay = Duration::from_millis(self.config.flush_max_delay_ms);

        let mut last_error: Option<WatchError> = None;

        for attempt in 0..max_attempts {
            if attempt > 0 {
                let delay = calculate_backoff_delay(attempt - 1, initial_delay, max_delay);
                tracing::warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis(),
                    "retrying flush after failure"
                );
                tokio::time::sleep(delay).await;
            }

            match self.store.save_batch(batch.clone()).await {
                Ok(saved) => {
                    tracing::debug!(
                        entries = saved.len(),
                        attempts = attempt + 1,
                        "flushed buffered entries"
                    );
                    futures::future::join_all(saved.iter().map(|entry| self.post_save(entry)))
                        .await;
                    return Ok(saved.len());
                }
                Err(e) => {
                    tracing::error!(attempt, error = %e, "saving buffered entries failed");
                    last_error = Some(e);
                }
            }
        }

        tracing::error!(
            attempts = max_attempts,
            entries = snapshot.len(),
            "all flush attempts exhausted, restoring buffer"
        );
        self.restore(snapshot).await;

        Err(last_error.unwrap_or_else(|| WatchError::storage("flush failed after all attempts")))
    }

    /// Start the periodic background flush.
    ///
    /// The task holds only a weak reference, so dropping the last collector
    /// handle ends it. Calling `start` while a task is running does nothing.
    pub fn start(self: &Arc<Self>) {
        let mut task = self
            .flush_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let interval = Duration::from_millis(self.config.flush_interval_ms.max(1));
        let collector: Weak<Self> = Arc::downgrade(self);

        let join_handle = tokio::spawn(async move {
            tracing::info!(
                interval_ms = interval.as_millis(),
                "starting background flush task"
            );

            let mut interval_timer =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        let Some(collector) = collector.upgrade() else {
                            break;
                        };
                        if collector.buffered_len().await > 0 {
                            if let Err(e) = collector.flush().await {
                                tracing::error!(error = %e, "background flush failed");
                            }
                        }
                    }
                    _ = &mut shutdown_rx => {
                        tracing::info!("background flush task stopping");
                        break;
                    }
                }
            }
        });

        *task = Some(FlushHandle {
            shutdown_tx: Some(shutdown_tx),
            join_handle,
        });
    }

    /// Stop the background task, if any, and flush what is left.
    pub async fn shutdown(&self) -> WatchResult<usize> {
        let task = self
            .flush_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.stop().await;
        }

        let flushed = self.flush().await?;
        tracing::info!(flushed, "collector shut down");
        Ok(flushed)
    }

    /// Recording state and ingest filter check shared by both collect paths.
    async fn admit(&self, entry: &NewEntry) -> bool {
        if !self.is_recording().await {
            return false;
        }

        let Some(filter) = &self.ingest_filter else {
            return true;
        };
        match filter.accept(entry).await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(
                    kind = %entry.kind(),
                    error = %e,
                    "ingest filter failed, keeping entry"
                );
                true
            }
        }
    }

    async fn apply_batch_filter(&self, snapshot: &[NewEntry]) -> Vec<NewEntry> {
        let Some(filter) = &self.batch_filter else {
            return snapshot.to_vec();
        };
        match filter.filter(snapshot.to_vec()).await {
            Ok(filtered) => filtered,
            Err(e) => {
                tracing::warn!(error = %e, "batch filter failed, saving unfiltered batch");
                snapshot.to_vec()
            }
        }
    }

    /// Put entries that failed to save back ahead of anything collected since.
    async fn restore(&self, snapshot: Vec<NewEntry>) {
        let mut buffer = self.buffer.lock().await;
        let mut restored: VecDeque<NewEntry> = snapshot.into();
        restored.append(&mut buffer);
        *buffer = restored;
        self.enforce_capacity(&mut buffer);
    }

    /// Drop the oldest entries beyond `max_buffered_entries`.
    fn enforce_capacity(&self, buffer: &mut VecDeque<NewEntry>) {
        let Some(max) = self.config.max_buffered_entries else {
            return;
        };
        if buffer.len() <= max {
            return;
        }

        let excess = buffer.len() - max;
        buffer.drain(..excess);
        self.dropped
            .fetch_add(u64::try_from(excess).unwrap_or(u64::MAX), Ordering::SeqCst);
        tracing::warn!(
            dropped = excess,
            max_buffered_entries = max,
            "buffer full, dropping oldest entries"
        );
    }

    /// Fingerprint and tag a saved entry. Failures are logged only.
    async fn post_save(&self, entry: &Entry) -> Applied {
        let mut applied = Applied::default();

        if let Some(hash) = self.fingerprinter.compute(entry) {
            let result = self.store.update_family_hash(entry.id, &hash).await;
            match result {
                Ok(_) => applied.family_hash = Some(hash),
                Err(e) => {
                    tracing::warn!(entry_id = entry.id, error = %e, "failed to record family hash");
                }
            }
        }

        let tags = self.classifier.classify(entry);
        if !tags.is_empty() {
            let result = self.store.add_tags(entry.id, &tags).await;
            match result {
                Ok(()) => applied.tags = tags,
                Err(e) => {
                    tracing::warn!(entry_id = entry.id, error = %e, "failed to tag entry");
                }
            }
        }

        applied
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests;
