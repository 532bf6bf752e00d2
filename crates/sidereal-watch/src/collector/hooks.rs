//! Filter hooks applied before entries reach storage.
//!
//! Both hooks fail open: an error from a hook is logged and the entries are
//! kept as if the hook had not been installed.

use async_trait::async_trait;

use crate::entry::NewEntry;
use crate::BoxError;

/// Decides whether a single entry is recorded.
#[async_trait]
pub trait IngestFilter: Send + Sync {
    /// Return `false` to drop the entry.
    async fn accept(&self, entry: &NewEntry) -> Result<bool, BoxError>;
}

/// Rewrites a buffered batch before it is saved.
///
/// The hook may drop, reorder or modify entries.
#[async_trait]
pub trait BatchFilter: Send + Sync {
    async fn filter(&self, entries: Vec<NewEntry>) -> Result<Vec<NewEntry>, BoxError>;
}

/// [`IngestFilter`] backed by a synchronous closure.
pub struct FnIngestFilter<F>(F);

/// Wrap a closure as an [`IngestFilter`].
pub const fn ingest_filter_fn<F>(f: F) -> FnIngestFilter<F>
where
    F: Fn(&NewEntry) -> Result<bool, BoxError> + Send + Sync,
{
    FnIngestFilter(f)
}

#[async_trait]
impl<F> IngestFilter for FnIngestFilter<F>
where
    F: Fn(&NewEntry) -> Result<bool, BoxError> + Send + Sync,
{
    async fn accept(&self, entry: &NewEntry) -> Result<bool, BoxError> {
        (self.0)(entry)
    }
}

/// [`BatchFilter`] backed by a synchronous closure.
pub struct FnBatchFilter<F>(F);

/// Wrap a closure as a [`BatchFilter`].
pub const fn batch_filter_fn<F>(f: F) -> FnBatchFilter<F>
where
    F: Fn(Vec<NewEntry>) -> Result<Vec<NewEntry>, BoxError> + Send + Sync,
{
    FnBatchFilter(f)
}

#[async_trait]
impl<F> BatchFilter for FnBatchFilter<F>
where
    F: Fn(Vec<NewEntry>) -> Result<Vec<NewEntry>, BoxError> + Send + Sync,
{
    async fn filter(&self, entries: Vec<NewEntry>) -> Result<Vec<NewEntry>, BoxError> {
        (self.0)(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{LogLevel, LogPayload, Payload};

    fn log(level: LogLevel) -> NewEntry {
        NewEntry::new(Payload::Log(LogPayload {
            level,
            message: "m".to_string(),
            ..Default::default()
        }))
    }

    #[tokio::test]
    async fn closure_ingest_filter() {
        let filter = ingest_filter_fn(|entry: &NewEntry| {
            Ok(matches!(&entry.payload, Payload::Log(p) if p.level.is_problem()))
        });
        assert!(filter.accept(&log(LogLevel::Error)).await.unwrap());
        assert!(!filter.accept(&log(LogLevel::Debug)).await.unwrap());
    }

    #[tokio::test]
    async fn closure_batch_filter() {
        let filter = batch_filter_fn(|mut entries: Vec<NewEntry>| {
            entries.truncate(1);
            Ok(entries)
        });
        let kept = filter
            .filter(vec![log(LogLevel::Info), log(LogLevel::Warn)])
            .await
            .unwrap();
        assert_eq!(kept.len(), 1);
    }
}
