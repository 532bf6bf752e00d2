//! Kind-specific payload records.
//!
//! Each struct mirrors what instrumentation reports for one entry kind.
//! Optional fields are skipped when serialising so stored payloads stay small.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::EntryKind;

/// Authenticated user attached to a request or gate check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl UserRef {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

/// Incoming HTTP request handled by the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestPayload {
    pub method: String,
    pub path: String,
    /// Response status; absent when the request died before responding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Duration in milliseconds.
    #[serde(default)]
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_action: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Tags supplied by the application itself.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_tags: Vec<String>,
}

/// Outgoing HTTP call made by the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpClientPayload {
    pub method: String,
    pub url: String,
    /// Response status; absent when no response was received.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default)]
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_tags: Vec<String>,
}

/// Database query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryPayload {
    pub sql: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bindings: Vec<Value>,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub slow: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
    /// ORM or driver that issued the query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Reported exception.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExceptionPayload {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

/// Log severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Fatal => "fatal",
        }
    }

    /// Whether entries at this level are grouped into families.
    #[must_use]
    pub const fn is_problem(self) -> bool {
        matches!(self, Self::Warn | Self::Error | Self::Fatal)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "fatal" | "critical" => Ok(Self::Fatal),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

/// Application log line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogPayload {
    pub level: LogLevel,
    pub message: String,
    /// Logger name or component that emitted the line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Queued background job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    pub name: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Cache operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CachePayload {
    /// `get`, `set`, `delete`, `has`, `clear`, ...
    pub operation: String,
    pub key: String,
    /// Only meaningful for reads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hit: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<String>,
    /// Expiration in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// Dispatched application event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub listeners: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default)]
    pub broadcast: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Scheduled task run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulePayload {
    pub command: String,
    pub status: String,
    /// Cron expression for cron-driven tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    /// Interval in seconds for interval-driven tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

/// Outgoing mail.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MailPayload {
    pub subject: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mailable: Option<String>,
    #[serde(default)]
    pub queued: bool,
}

impl MailPayload {
    /// All recipients across to, cc and bcc.
    pub fn recipients(&self) -> impl Iterator<Item = &String> {
        self.to.iter().chain(&self.cc).chain(&self.bcc)
    }
}

/// Redis command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RedisPayload {
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
    #[serde(default)]
    pub duration: f64,
}

/// ORM model lifecycle action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelPayload {
    /// `created`, `updated`, `deleted`, `retrieved`, ...
    pub action: String,
    pub entity: String,
    /// Number of affected records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<Value>,
}

/// Sent notification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub notification: String,
    pub channel: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recipients: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Rendered view template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewPayload {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_keys: Vec<String>,
}

/// Console command run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandPayload {
    pub name: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

/// Authorization gate check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatePayload {
    pub gate: String,
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Batch of queued jobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchPayload {
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub total_jobs: u64,
    #[serde(default)]
    pub pending_jobs: u64,
    #[serde(default)]
    pub failed_jobs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

/// Data dump or export.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DumpPayload {
    pub status: String,
    /// `sql`, `json`, `csv`, ...
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub records: Option<u64>,
    #[serde(default)]
    pub compressed: bool,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

/// Kind-specific payload of an entry.
///
/// The variant determines the entry kind, so a stored payload can never
/// disagree with its kind column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "kebab-case")]
pub enum Payload {
    Request(RequestPayload),
    HttpClient(HttpClientPayload),
    Query(QueryPayload),
    Exception(ExceptionPayload),
    Log(LogPayload),
    Job(JobPayload),
    Cache(CachePayload),
    Event(EventPayload),
    Schedule(SchedulePayload),
    Mail(MailPayload),
    Redis(RedisPayload),
    Model(ModelPayload),
    Notification(NotificationPayload),
    View(ViewPayload),
    Command(CommandPayload),
    Gate(GatePayload),
    Batch(BatchPayload),
    Dump(DumpPayload),
}

impl Payload {
    #[must_use]
    pub const fn kind(&self) -> EntryKind {
        match self {
            Self::Request(_) => EntryKind::Request,
            Self::HttpClient(_) => EntryKind::HttpClient,
            Self::Query(_) => EntryKind::Query,
            Self::Exception(_) => EntryKind::Exception,
            Self::Log(_) => EntryKind::Log,
            Self::Job(_) => EntryKind::Job,
            Self::Cache(_) => EntryKind::Cache,
            Self::Event(_) => EntryKind::Event,
            Self::Schedule(_) => EntryKind::Schedule,
            Self::Mail(_) => EntryKind::Mail,
            Self::Redis(_) => EntryKind::Redis,
            Self::Model(_) => EntryKind::Model,
            Self::Notification(_) => EntryKind::Notification,
            Self::View(_) => EntryKind::View,
            Self::Command(_) => EntryKind::Command,
            Self::Gate(_) => EntryKind::Gate,
            Self::Batch(_) => EntryKind::Batch,
            Self::Dump(_) => EntryKind::Dump,
        }
    }

    /// Serialise only the inner record, without the kind tag.
    ///
    /// This is the text free-text search runs against.
    pub fn content_json(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Request(p) => serde_json::to_string(p),
            Self::HttpClient(p) => serde_json::to_string(p),
            Self::Query(p) => serde_json::to_string(p),
            Self::Exception(p) => serde_json::to_string(p),
            Self::Log(p) => serde_json::to_string(p),
            Self::Job(p) => serde_json::to_string(p),
            Self::Cache(p) => serde_json::to_string(p),
            Self::Event(p) => serde_json::to_string(p),
            Self::Schedule(p) => serde_json::to_string(p),
            Self::Mail(p) => serde_json::to_string(p),
            Self::Redis(p) => serde_json::to_string(p),
            Self::Model(p) => serde_json::to_string(p),
            Self::Notification(p) => serde_json::to_string(p),
            Self::View(p) => serde_json::to_string(p),
            Self::Command(p) => serde_json::to_string(p),
            Self::Gate(p) => serde_json::to_string(p),
            Self::Batch(p) => serde_json::to_string(p),
            Self::Dump(p) => serde_json::to_string(p),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_serialises_adjacently_tagged() {
        let payload = Payload::Cache(CachePayload {
            operation: "get".to_string(),
            key: "users:1".to_string(),
            hit: Some(true),
            ..Default::default()
        });

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "cache");
        assert_eq!(json["payload"]["key"], "users:1");
        assert_eq!(json["payload"]["hit"], true);
        assert!(json["payload"].get("store").is_none());
    }

    #[test]
    fn http_client_kind_is_kebab_case() {
        let payload = Payload::HttpClient(HttpClientPayload::default());
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "http-client");
        assert_eq!(payload.kind(), EntryKind::HttpClient);
    }

    #[test]
    fn content_json_omits_kind_tag() {
        let payload = Payload::Log(LogPayload {
            level: LogLevel::Error,
            message: "disk full".to_string(),
            ..Default::default()
        });
        let text = payload.content_json().unwrap();
        assert!(text.contains("disk full"));
        assert!(!text.contains("\"kind\""));
    }

    #[test]
    fn log_level_parsing() {
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("error".parse::<LogLevel>().unwrap(), LogLevel::Error);
        assert!("loud".parse::<LogLevel>().is_err());
        assert!(LogLevel::Warn.is_problem());
        assert!(!LogLevel::Info.is_problem());
    }
}
