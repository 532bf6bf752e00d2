//! Telemetry entries and their kind-specific payloads.

mod accessors;
mod payload;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use payload::{
    BatchPayload, CachePayload, CommandPayload, DumpPayload, EventPayload, ExceptionPayload,
    GatePayload, HttpClientPayload, JobPayload, LogLevel, LogPayload, MailPayload, ModelPayload,
    NotificationPayload, Payload, QueryPayload, RedisPayload, RequestPayload, SchedulePayload,
    UserRef, ViewPayload,
};

/// Discriminant selecting the payload shape of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryKind {
    Request,
    HttpClient,
    Query,
    Exception,
    Log,
    Job,
    Cache,
    Event,
    Schedule,
    Mail,
    Redis,
    Model,
    Notification,
    View,
    Command,
    Gate,
    Batch,
    Dump,
}

impl EntryKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 18] = [
        Self::Request,
        Self::HttpClient,
        Self::Query,
        Self::Exception,
        Self::Log,
        Self::Job,
        Self::Cache,
        Self::Event,
        Self::Schedule,
        Self::Mail,
        Self::Redis,
        Self::Model,
        Self::Notification,
        Self::View,
        Self::Command,
        Self::Gate,
        Self::Batch,
        Self::Dump,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::HttpClient => "http-client",
            Self::Query => "query",
            Self::Exception => "exception",
            Self::Log => "log",
            Self::Job => "job",
            Self::Cache => "cache",
            Self::Event => "event",
            Self::Schedule => "schedule",
            Self::Mail => "mail",
            Self::Redis => "redis",
            Self::Model => "model",
            Self::Notification => "notification",
            Self::View => "view",
            Self::Command => "command",
            Self::Gate => "gate",
            Self::Batch => "batch",
            Self::Dump => "dump",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| format!("unknown entry kind: {s}"))
    }
}

/// An entry as handed over by instrumentation, before it has been persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEntry {
    pub payload: Payload,
    /// Correlates entries produced while serving the same request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl NewEntry {
    #[must_use]
    pub const fn new(payload: Payload) -> Self {
        Self {
            payload,
            request_id: None,
        }
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    #[must_use]
    pub const fn kind(&self) -> EntryKind {
        self.payload.kind()
    }
}

impl From<Payload> for NewEntry {
    fn from(payload: Payload) -> Self {
        Self::new(payload)
    }
}

/// A persisted telemetry entry.
///
/// Only `resolved_at`, `family_hash` and tag membership change after the
/// entry has been saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: u64,
    pub kind: EntryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub payload: Payload,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    /// Upper-case, sorted, without duplicates.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Entry {
    /// Build the stored form of a new entry.
    #[must_use]
    pub fn from_new(id: u64, entry: NewEntry, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            kind: entry.payload.kind(),
            request_id: entry.request_id,
            payload: entry.payload,
            created_at,
            family_hash: None,
            resolved_at: None,
            tags: Vec::new(),
        }
    }

    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// A tag on the watch list, tracked regardless of how often it occurs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredTag {
    pub id: u64,
    pub tag: String,
    pub created_at: DateTime<Utc>,
}

/// Number of entries carrying a tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCount {
    pub tag: String,
    pub count: u64,
}

/// Entries sharing a fingerprint, computed on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilyGroup {
    pub family_hash: String,
    pub count: u64,
    pub latest_entry: Entry,
}

/// Current time truncated to microseconds.
///
/// Every backend stores timestamps at this precision, so truncating up front
/// keeps `created_at` identical no matter where the entry was saved.
#[must_use]
pub fn now_micros() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now)
}

/// Normalise a single tag, `None` when it is blank.
#[must_use]
pub fn normalise_tag(tag: &str) -> Option<String> {
    let tag = tag.trim();
    (!tag.is_empty()).then(|| tag.to_uppercase())
}

/// Normalise user-supplied tags: trimmed, upper-cased, non-empty, unique.
#[must_use]
pub fn normalise_tags<S: AsRef<str>>(tags: &[S]) -> Vec<String> {
    let mut normalised: Vec<String> = tags
        .iter()
        .filter_map(|t| normalise_tag(t.as_ref()))
        .collect();
    normalised.sort();
    normalised.dedup();
    normalised
}
