use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use rstest::rstest;

use super::*;
use crate::entry::{EntryKind, LogLevel, Payload};
use crate::store::{EntryQuery, MemoryStore};
use crate::test_fixtures::*;

async fn stored_messages(store: &dyn EntryStore) -> Vec<String> {
    let mut entries = store.find(&EntryQuery::new()).await.unwrap();
    entries.reverse();
    entries
        .into_iter()
        .filter_map(|e| match e.payload {
            Payload::Log(p) => Some(p.message),
            _ => None,
        })
        .collect()
}

#[test]
fn backoff_doubles_and_caps() {
    let initial = Duration::from_millis(100);
    let max = Duration::from_millis(1_000);
    assert_eq!(calculate_backoff_delay(0, initial, max), Duration::from_millis(100));
    assert_eq!(calculate_backoff_delay(1, initial, max), Duration::from_millis(200));
    assert_eq!(calculate_backoff_delay(3, initial, max), Duration::from_millis(800));
    assert_eq!(calculate_backoff_delay(4, initial, max), max);
    assert_eq!(calculate_backoff_delay(40, initial, max), max);
}

#[rstest]
#[tokio::test]
async fn buffer_flushes_when_threshold_reached(
    memory_store: Arc<MemoryStore>,
    mut collector_config: CollectorConfig,
) {
    collector_config.buffer_size = 3;
    let collector = Collector::new(memory_store.clone(), collector_config);

    collector.collect(log_entry(LogLevel::Info, "one")).await;
    collector.collect(log_entry(LogLevel::Info, "two")).await;
    assert_eq!(collector.buffered_len().await, 2);
    assert_eq!(memory_store.count(None).await.unwrap(), 0);

    collector.collect(log_entry(LogLevel::Info, "three")).await;
    assert_eq!(collector.buffered_len().await, 0);
    assert_eq!(
        stored_messages(memory_store.as_ref()).await,
        vec!["one", "two", "three"]
    );
}

#[rstest]
#[tokio::test]
async fn flush_of_empty_buffer_saves_nothing(collector: Collector) {
    assert_eq!(collector.flush().await.unwrap(), 0);
    assert_eq!(collector.store().count(None).await.unwrap(), 0);
}

#[rstest]
#[tokio::test]
async fn flush_returns_saved_count(collector: Collector) {
    collector.collect(log_entry(LogLevel::Info, "a")).await;
    collector.collect(log_entry(LogLevel::Info, "b")).await;

    assert_eq!(collector.flush().await.unwrap(), 2);
    assert_eq!(collector.buffered_len().await, 0);
    assert_eq!(collector.store().count(None).await.unwrap(), 2);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn flush_retries_until_save_succeeds(
    flaky_store: Arc<FlakyStore>,
    collector_config: CollectorConfig,
) {
    let collector = Collector::new(flaky_store.clone(), collector_config);
    collector.collect(log_entry(LogLevel::Info, "a")).await;
    flaky_store.fail_next_saves(2);

    assert_eq!(collector.flush().await.unwrap(), 1);
    assert_eq!(flaky_store.save_calls(), 3);
    assert_eq!(flaky_store.count(None).await.unwrap(), 1);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn failed_flush_restores_entries_ahead_of_newer_ones(
    flaky_store: Arc<FlakyStore>,
    collector_config: CollectorConfig,
) {
    let collector = Collector::new(flaky_store.clone(), collector_config);
    collector.collect(log_entry(LogLevel::Info, "a")).await;
    collector.collect(log_entry(LogLevel::Info, "b")).await;
    flaky_store.fail_next_saves(3);

    let result = collector.flush().await;
    assert!(matches!(result, Err(WatchError::Connection(_))));
    assert_eq!(flaky_store.save_calls(), 3);
    assert_eq!(collector.buffered_len().await, 2);

    collector.collect(log_entry(LogLevel::Info, "c")).await;
    assert_eq!(collector.flush().await.unwrap(), 3);
    assert_eq!(
        stored_messages(flaky_store.as_ref()).await,
        vec!["a", "b", "c"]
    );
}

#[rstest]
#[tokio::test]
async fn single_attempt_when_attempts_is_zero(
    flaky_store: Arc<FlakyStore>,
    mut collector_config: CollectorConfig,
) {
    collector_config.flush_max_attempts = 0;
    let collector = Collector::new(flaky_store.clone(), collector_config);
    collector.collect(log_entry(LogLevel::Info, "a")).await;
    flaky_store.fail_next_saves(1);

    assert!(collector.flush().await.is_err());
    assert_eq!(flaky_store.save_calls(), 1);
    assert_eq!(collector.buffered_len().await, 1);
}

#[rstest]
#[tokio::test]
async fn paused_collector_drops_entries(collector: Collector) {
    collector.pause(Some("maintenance".to_string())).await;
    collector.pause(Some("second".to_string())).await;

    match collector.recording_state().await {
        RecordingState::Paused { reason, .. } => assert_eq!(reason.as_deref(), Some("maintenance")),
        RecordingState::Active => panic!("expected paused state"),
    }

    collector.collect(log_entry(LogLevel::Info, "dropped")).await;
    assert_eq!(collector.buffered_len().await, 0);
    let immediate = collector
        .collect_immediate(log_entry(LogLevel::Info, "dropped"))
        .await
        .unwrap();
    assert!(immediate.is_none());
    assert_eq!(collector.store().count(None).await.unwrap(), 0);

    collector.resume().await;
    assert!(collector.is_recording().await);
    collector.collect(log_entry(LogLevel::Info, "kept")).await;
    assert_eq!(collector.buffered_len().await, 1);
}

#[rstest]
#[tokio::test]
async fn ingest_filter_rejects_and_fails_open(
    memory_store: Arc<MemoryStore>,
    collector_config: CollectorConfig,
) {
    let collector = Collector::new(memory_store, collector_config).with_ingest_filter(
        ingest_filter_fn(|entry: &NewEntry| match &entry.payload {
            Payload::Log(p) if p.message == "broken" => Err("filter crashed".into()),
            Payload::Log(p) => Ok(p.level.is_problem()),
            _ => Ok(true),
        }),
    );

    collector.collect(log_entry(LogLevel::Debug, "noise")).await;
    collector.collect(log_entry(LogLevel::Error, "signal")).await;
    collector.collect(log_entry(LogLevel::Info, "broken")).await;

    assert_eq!(collector.buffered_len().await, 2);
}

#[rstest]
#[tokio::test]
async fn batch_filter_rewrites_batch(
    memory_store: Arc<MemoryStore>,
    collector_config: CollectorConfig,
) {
    let collector = Collector::new(memory_store.clone(), collector_config).with_batch_filter(
        batch_filter_fn(|entries: Vec<NewEntry>| {
            Ok(entries
                .into_iter()
                .filter(|e| e.kind() == EntryKind::Cache)
                .collect())
        }),
    );

    collector.collect(log_entry(LogLevel::Info, "a")).await;
    collector.collect(cache_entry("users:1", true)).await;

    assert_eq!(collector.flush().await.unwrap(), 1);
    assert_eq!(memory_store.count(Some(EntryKind::Cache)).await.unwrap(), 1);
    assert_eq!(memory_store.count(Some(EntryKind::Log)).await.unwrap(), 0);
}

#[rstest]
#[tokio::test]
async fn failing_batch_filter_saves_original_batch(
    memory_store: Arc<MemoryStore>,
    collector_config: CollectorConfig,
) {
    let collector = Collector::new(memory_store.clone(), collector_config)
        .with_batch_filter(batch_filter_fn(|_: Vec<NewEntry>| Err("boom".into())));

    collector.collect(log_entry(LogLevel::Info, "a")).await;
    collector.collect(log_entry(LogLevel::Info, "b")).await;

    assert_eq!(collector.flush().await.unwrap(), 2);
}

#[rstest]
#[tokio::test]
async fn collect_immediate_tags_cache_hit(collector: Collector) {
    let entry = collector
        .collect_immediate(cache_entry("users:1", true))
        .await
        .unwrap()
        .expect("entry should be recorded");

    assert_eq!(entry.tags, vec!["GET".to_string(), "HIT".to_string()]);
    assert_eq!(
        collector.store().entry_tags(entry.id).await.unwrap(),
        vec!["GET".to_string(), "HIT".to_string()]
    );
    assert!(entry.family_hash.is_none());
}

#[rstest]
#[tokio::test]
async fn flushed_exceptions_share_a_family(collector: Collector) {
    collector
        .collect(exception_entry("TypeError", "user 1 missing"))
        .await;
    collector
        .collect(exception_entry("TypeError", "user 2 missing"))
        .await;
    assert_eq!(collector.flush().await.unwrap(), 2);

    let groups = collector
        .store()
        .grouped_by_family_hash(Some(EntryKind::Exception), 10)
        .await
        .unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].count, 2);

    let tagged = collector
        .store()
        .find_by_tags(&["TYPEERROR".to_string()], crate::store::TagLogic::Any, 10)
        .await
        .unwrap();
    assert_eq!(tagged.len(), 2);
}

#[rstest]
#[tokio::test]
async fn collect_immediate_propagates_storage_errors(
    flaky_store: Arc<FlakyStore>,
    collector_config: CollectorConfig,
) {
    let collector = Collector::new(flaky_store.clone(), collector_config);
    flaky_store.fail_next_saves(1);

    let result = collector
        .collect_immediate(log_entry(LogLevel::Info, "a"))
        .await;
    assert!(result.is_err());
}

#[rstest]
#[tokio::test]
async fn tagging_failures_do_not_fail_flush(
    flaky_store: Arc<FlakyStore>,
    collector_config: CollectorConfig,
) {
    let collector = Collector::new(flaky_store.clone(), collector_config);
    flaky_store.fail_tag_writes(true);

    collector.collect(cache_entry("k", false)).await;
    assert_eq!(collector.flush().await.unwrap(), 1);

    let saved = flaky_store.find(&EntryQuery::new()).await.unwrap();
    assert!(saved[0].tags.is_empty());
}

#[rstest]
#[tokio::test]
async fn buffer_cap_drops_oldest_entries(
    memory_store: Arc<MemoryStore>,
    mut collector_config: CollectorConfig,
) {
    collector_config.max_buffered_entries = Some(2);
    let collector = Collector::new(memory_store.clone(), collector_config);

    for message in ["1", "2", "3"] {
        collector.collect(log_entry(LogLevel::Info, message)).await;
    }
    assert_eq!(collector.buffered_len().await, 2);
    assert_eq!(collector.dropped_entries(), 1);

    collector.flush().await.unwrap();
    assert_eq!(stored_messages(memory_store.as_ref()).await, vec!["2", "3"]);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn background_task_flushes_on_interval(
    memory_store: Arc<MemoryStore>,
    collector_config: CollectorConfig,
) {
    let collector = Arc::new(Collector::new(memory_store.clone(), collector_config));
    collector.start();
    collector.start();

    collector.collect(log_entry(LogLevel::Info, "a")).await;
    assert_eq!(memory_store.count(None).await.unwrap(), 0);

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert_eq!(memory_store.count(None).await.unwrap(), 1);

    collector.collect(log_entry(LogLevel::Info, "b")).await;
    assert_eq!(collector.shutdown().await.unwrap(), 1);
    assert_eq!(memory_store.count(None).await.unwrap(), 2);
}

#[rstest]
#[tokio::test]
async fn shutdown_without_task_flushes(collector: Collector) {
    collector.collect(log_entry(LogLevel::Info, "a")).await;
    assert_eq!(collector.shutdown().await.unwrap(), 1);
    assert_eq!(collector.buffered_len().await, 0);
}
