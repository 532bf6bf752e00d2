//! Sidereal Watch - application telemetry capture and storage.
//!
//! Instrumentation hands entries (requests, queries, exceptions, logs, cache
//! operations and more) to a [`Collector`], which buffers them and saves them
//! in batches to an [`EntryStore`]. Saved entries are fingerprinted into
//! families and tagged automatically.
//!
//! ## Architecture
//!
//! ```text
//! instrumentation → Collector (buffer, filters, retry) → EntryStore
//!                                                          ├── memory
//!                                                          ├── SQLite
//!                                                          └── Valkey
//!                          post-save: Fingerprinter + TagClassifier
//! ```
//!
//! Backends are selected with cargo features (`memory`, `sqlite`, `valkey`)
//! and the `[storage]` section of `watch.toml`.

pub mod collector;
pub mod config;
pub mod entry;
pub mod error;
pub mod fingerprint;
pub mod query;
pub mod store;
pub mod tags;

#[cfg(all(test, feature = "memory"))]
pub mod test_fixtures;

pub use collector::{Collector, RecordingState};
pub use config::WatchConfig;
pub use entry::{Entry, EntryKind, NewEntry, Payload};
pub use error::{BoxError, WatchError, WatchResult};
pub use fingerprint::Fingerprinter;
pub use query::QueryParams;
pub use store::{open_store, CursorPage, CursorParams, EntryFilter, EntryQuery, EntryStore};
pub use tags::TagClassifier;
