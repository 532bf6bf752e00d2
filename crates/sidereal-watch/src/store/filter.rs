//! Kind-scoped entry filtering shared by every backend.

use std::fmt;
use std::str::FromStr;

use crate::entry::{Entry, EntryKind, LogLevel};

/// HTTP status criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusFilter {
    /// Exact status code.
    Code(u16),
    /// No status was recorded, written `ERR` in query strings.
    Missing,
}

impl StatusFilter {
    fn matches(self, status: Option<u16>) -> bool {
        match self {
            Self::Code(code) => status == Some(code),
            Self::Missing => status.is_none(),
        }
    }
}

impl FromStr for StatusFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("err") {
            return Ok(Self::Missing);
        }
        s.parse::<u16>()
            .map(Self::Code)
            .map_err(|_| format!("invalid status: {s}"))
    }
}

impl fmt::Display for StatusFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "{code}"),
            Self::Missing => f.write_str("ERR"),
        }
    }
}

/// Outcome of a gate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateOutcome {
    Allowed,
    Denied,
}

impl GateOutcome {
    const fn matches(self, allowed: bool) -> bool {
        match self {
            Self::Allowed => allowed,
            Self::Denied => !allowed,
        }
    }
}

impl FromStr for GateOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allowed" => Ok(Self::Allowed),
            "denied" => Ok(Self::Denied),
            other => Err(format!("invalid gate result: {other}")),
        }
    }
}

/// Filter criteria for listing entries.
///
/// Each field only constrains the kinds it applies to; entries of any other
/// kind pass it. Values within a field are alternatives, and every non-empty
/// field must match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryFilter {
    pub request_id: Option<String>,
    pub family_hash: Option<String>,
    /// Entry must carry at least one of these tags (case-insensitive).
    pub tags: Vec<String>,
    /// Case-insensitive substring of the serialised payload.
    pub search: Option<String>,

    // request / http-client
    pub methods: Vec<String>,
    pub statuses: Vec<StatusFilter>,
    pub paths: Vec<String>,
    pub hosts: Vec<String>,

    // query
    /// Statement type such as `SELECT`, matched against the start of the SQL.
    pub query_types: Vec<String>,
    pub connections: Vec<String>,
    pub sources: Vec<String>,
    pub slow: Option<bool>,

    // exception
    pub exception_names: Vec<String>,
    pub resolved: Option<bool>,

    // log
    pub levels: Vec<LogLevel>,
    pub contexts: Vec<String>,

    // job
    pub job_names: Vec<String>,
    pub job_statuses: Vec<String>,
    pub queues: Vec<String>,

    // cache
    pub cache_operations: Vec<String>,
    pub cache_keys: Vec<String>,

    pub event_names: Vec<String>,

    // schedule
    pub schedule_commands: Vec<String>,
    pub schedule_statuses: Vec<String>,

    // mail
    pub mail_statuses: Vec<String>,
    pub recipients: Vec<String>,

    pub redis_commands: Vec<String>,

    // model
    pub model_actions: Vec<String>,
    pub model_names: Vec<String>,

    // notification
    pub notification_channels: Vec<String>,
    pub notification_statuses: Vec<String>,

    pub view_names: Vec<String>,

    // command
    pub command_names: Vec<String>,
    pub exit_codes: Vec<i32>,

    // gate
    pub gate_names: Vec<String>,
    pub gate_results: Vec<GateOutcome>,

    // batch
    pub batch_names: Vec<String>,
    pub batch_statuses: Vec<String>,

    // dump
    pub dump_formats: Vec<String>,
    pub dump_statuses: Vec<String>,
}

impl EntryFilter {
    /// Create a new empty filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by request id.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Filter by family hash.
    #[must_use]
    pub fn with_family_hash(mut self, hash: impl Into<String>) -> Self {
        self.family_hash = Some(hash.into());
        self
    }

    /// Require any of the given tags.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Free-text search over the payload.
    #[must_use]
    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    /// Whether no criterion is set at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Whether any criterion needs the payload to decide.
    ///
    /// Request id, family hash and tags can be answered from indexes alone;
    /// everything else has to be checked by [`Self::matches`].
    #[must_use]
    pub fn has_payload_criteria(&self) -> bool {
        let rest = Self {
            request_id: None,
            family_hash: None,
            tags: Vec::new(),
            ..self.clone()
        };
        !rest.is_empty()
    }

    /// Tags upper-cased for comparison with stored tags.
    #[must_use]
    pub fn normalised_tags(&self) -> Vec<String> {
        crate::entry::normalise_tags(&self.tags)
    }

    /// Test an entry against every criterion.
    #[must_use]
    pub fn matches(&self, entry: &Entry) -> bool {
        self.matches_common(entry) && self.matches_payload(entry)
    }

    fn matches_common(&self, entry: &Entry) -> bool {
        if let Some(request_id) = &self.request_id {
            if entry.request_id.as_deref() != Some(request_id.as_str()) {
                return false;
            }
        }
        if let Some(hash) = &self.family_hash {
            if entry.family_hash.as_deref() != Some(hash.as_str()) {
                return false;
            }
        }
        if !self.tags.is_empty() {
            let wanted = self.normalised_tags();
            if !wanted.is_empty() && !entry.tags.iter().any(|t| wanted.contains(t)) {
                return false;
            }
        }
        if let Some(search) = self.search.as_deref().map(str::trim) {
            if !search.is_empty() {
                let needle = search.to_lowercase();
                let found = entry
                    .payload
                    .content_json()
                    .is_ok_and(|text| text.to_lowercase().contains(&needle));
                if !found {
                    return false;
                }
            }
        }
        true
    }

    fn matches_payload(&self, entry: &Entry) -> bool {
        let p = &entry.payload;
        let resolved = matches!(p.kind(), EntryKind::Exception)
            .then_some(entry.is_resolved());

        field(&self.methods, p.http_method(), |w, m| w.eq_ignore_ascii_case(m))
            && field(&self.statuses, p.http_status(), |w, s| w.matches(*s))
            && field(&self.paths, p.request_path(), |w, path| path.contains(w.as_str()))
            && (self.hosts.is_empty()
                || field(&self.hosts, p.http_host(), |w, host| host.contains(w.as_str())))
            && field(&self.query_types, p.sql(), |w, sql| {
                starts_with_ci(sql.trim_start(), w.trim())
            })
            && field(&self.connections, p.query_connection(), |w, c| *c == Some(w.as_str()))
            && field(&self.sources, p.query_source(), |w, s| {
                s.is_some_and(|s| s.eq_ignore_ascii_case(w))
            })
            && flag(self.slow, p.slow_flag())
            && field(&self.exception_names, p.exception_name(), |w, n| n.contains(w.as_str()))
            && flag(self.resolved, resolved)
            && field(&self.levels, p.log_level(), |w, l| w == l)
            && field(&self.contexts, p.log_context(), |w, c| *c == Some(w.as_str()))
            && field(&self.job_names, p.job_name(), |w, n| n.contains(w.as_str()))
            && field(&self.job_statuses, job_status(entry), |w, s| w == s)
            && field(&self.queues, p.job_queue(), |w, q| *q == Some(w.as_str()))
            && field(&self.cache_operations, p.cache_operation(), |w, o| w == o)
            && field(&self.cache_keys, p.cache_key(), |w, k| k.contains(w.as_str()))
            && field(&self.event_names, p.event_name(), |w, n| n.contains(w.as_str()))
            && field(&self.schedule_commands, p.schedule_command(), |w, c| {
                c.contains(w.as_str())
            })
            && field(
                &self.schedule_statuses,
                status_for(entry, EntryKind::Schedule),
                |w, s| w == s,
            )
            && field(&self.mail_statuses, status_for(entry, EntryKind::Mail), |w, s| w == s)
            && (self.recipients.is_empty()
                || field(&self.recipients, p.mail_recipients(), |w, all| {
                    all.iter().any(|r| r.contains(w.as_str()))
                }))
            && field(&self.redis_commands, p.redis_command(), |w, c| w.eq_ignore_ascii_case(c))
            && field(&self.model_actions, p.model_action(), |w, a| w == a)
            && field(&self.model_names, p.model_entity(), |w, e| e.contains(w.as_str()))
            && field(&self.notification_channels, p.notification_channel(), |w, c| w == c)
            && field(
                &self.notification_statuses,
                status_for(entry, EntryKind::Notification),
                |w, s| w == s,
            )
            && field(&self.view_names, p.view_name(), |w, n| n.contains(w.as_str()))
            && field(&self.command_names, p.command_name(), |w, n| n.contains(w.as_str()))
            && field(&self.exit_codes, p.exit_code(), |w, c| *c == Some(*w))
            && field(&self.gate_names, p.gate_name(), |w, g| g.contains(w.as_str()))
            && field(&self.gate_results, p.gate_allowed(), |w, allowed| w.matches(*allowed))
            && field(&self.batch_names, p.batch_name(), |w, n| n.contains(w.as_str()))
            && field(&self.batch_statuses, status_for(entry, EntryKind::Batch), |w, s| w == s)
            && field(&self.dump_formats, p.dump_format(), |w, f| *f == Some(w.as_str()))
            && field(&self.dump_statuses, status_for(entry, EntryKind::Dump), |w, s| w == s)
    }
}

/// Passes when nothing is wanted or the field does not apply; otherwise any
/// wanted value must satisfy `pred`.
fn field<W, A>(wanted: &[W], actual: Option<A>, pred: impl Fn(&W, &A) -> bool) -> bool {
    wanted.is_empty() || actual.map_or(true, |a| wanted.iter().any(|w| pred(w, &a)))
}

fn flag(wanted: Option<bool>, actual: Option<bool>) -> bool {
    match (wanted, actual) {
        (Some(w), Some(a)) => w == a,
        _ => true,
    }
}

fn status_for(entry: &Entry, kind: EntryKind) -> Option<&str> {
    if entry.kind == kind {
        entry.payload.status_text()
    } else {
        None
    }
}

fn job_status(entry: &Entry) -> Option<&str> {
    status_for(entry, EntryKind::Job)
}

fn starts_with_ci(haystack: &str, prefix: &str) -> bool {
    haystack
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::entry::{
        CachePayload, ExceptionPayload, GatePayload, HttpClientPayload, LogPayload, MailPayload,
        NewEntry, Payload, QueryPayload, RequestPayload,
    };

    fn entry(id: u64, payload: Payload) -> Entry {
        Entry::from_new(id, NewEntry::new(payload), Utc::now())
    }

    fn request(method: &str, path: &str, status: Option<u16>) -> Entry {
        entry(
            1,
            Payload::Request(RequestPayload {
                method: method.to_string(),
                path: path.to_string(),
                status,
                ..Default::default()
            }),
        )
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = EntryFilter::new();
        assert!(filter.is_empty());
        assert!(filter.matches(&request("GET", "/", Some(200))));
    }

    #[test]
    fn fields_of_other_kinds_pass_vacuously() {
        let filter = EntryFilter {
            job_names: vec!["Invoice".to_string()],
            ..Default::default()
        };
        assert!(filter.matches(&request("GET", "/", Some(200))));
    }

    #[test]
    fn methods_are_case_insensitive_and_ored() {
        let filter = EntryFilter {
            methods: vec!["post".to_string(), "get".to_string()],
            ..Default::default()
        };
        assert!(filter.matches(&request("GET", "/", None)));
        assert!(!filter.matches(&request("DELETE", "/", None)));
    }

    #[test]
    fn err_status_matches_missing_status() {
        let filter = EntryFilter {
            statuses: vec![StatusFilter::Missing],
            ..Default::default()
        };
        assert!(filter.matches(&request("GET", "/", None)));
        assert!(!filter.matches(&request("GET", "/", Some(500))));

        let call = entry(
            2,
            Payload::HttpClient(HttpClientPayload {
                method: "GET".to_string(),
                url: "https://example.com".to_string(),
                ..Default::default()
            }),
        );
        assert!(filter.matches(&call));
    }

    #[test]
    fn fields_are_anded() {
        let filter = EntryFilter {
            methods: vec!["GET".to_string()],
            paths: vec!["/users".to_string()],
            ..Default::default()
        };
        assert!(filter.matches(&request("GET", "/api/users/1", Some(200))));
        assert!(!filter.matches(&request("GET", "/api/orders", Some(200))));
    }

    #[test]
    fn hosts_match_url_host() {
        let filter = EntryFilter {
            hosts: vec!["stripe".to_string()],
            ..Default::default()
        };
        let call = entry(
            1,
            Payload::HttpClient(HttpClientPayload {
                url: "https://api.stripe.com/v1/charges".to_string(),
                ..Default::default()
            }),
        );
        assert!(filter.matches(&call));
    }

    #[test]
    fn query_type_is_a_prefix_match() {
        let filter = EntryFilter {
            query_types: vec!["select".to_string()],
            ..Default::default()
        };
        let select = entry(
            1,
            Payload::Query(QueryPayload {
                sql: "  SELECT * FROM users".to_string(),
                ..Default::default()
            }),
        );
        let update = entry(
            2,
            Payload::Query(QueryPayload {
                sql: "UPDATE users SET name = 'select'".to_string(),
                ..Default::default()
            }),
        );
        assert!(filter.matches(&select));
        assert!(!filter.matches(&update));
    }

    #[test]
    fn resolved_flag_applies_to_exceptions_only() {
        let filter = EntryFilter {
            resolved: Some(false),
            ..Default::default()
        };
        let mut exception = entry(1, Payload::Exception(ExceptionPayload::default()));
        assert!(filter.matches(&exception));
        exception.resolved_at = Some(Utc::now());
        assert!(!filter.matches(&exception));
        assert!(filter.matches(&request("GET", "/", Some(200))));
    }

    #[test]
    fn tags_are_case_insensitive() {
        let mut hit = entry(
            1,
            Payload::Cache(CachePayload {
                operation: "get".to_string(),
                key: "users:1".to_string(),
                hit: Some(true),
                ..Default::default()
            }),
        );
        hit.tags = vec!["GET".to_string(), "HIT".to_string()];
        let filter = EntryFilter::new().with_tags(["hit"]);
        assert!(filter.matches(&hit));
        let filter = EntryFilter::new().with_tags(["miss"]);
        assert!(!filter.matches(&hit));
    }

    #[test]
    fn search_looks_inside_payload() {
        let log = entry(
            1,
            Payload::Log(LogPayload {
                level: LogLevel::Error,
                message: "Disk Full on /var".to_string(),
                ..Default::default()
            }),
        );
        assert!(EntryFilter::new().with_search("disk full").matches(&log));
        assert!(!EntryFilter::new().with_search("memory").matches(&log));
    }

    #[test]
    fn recipients_match_any_address() {
        let filter = EntryFilter {
            recipients: vec!["bob@".to_string()],
            ..Default::default()
        };
        let mail = entry(
            1,
            Payload::Mail(MailPayload {
                subject: "Hi".to_string(),
                status: "sent".to_string(),
                to: vec!["alice@example.com".to_string()],
                cc: vec!["bob@example.com".to_string()],
                ..Default::default()
            }),
        );
        assert!(filter.matches(&mail));
    }

    #[test]
    fn gate_results_map_to_allowed_flag() {
        let denied = entry(
            1,
            Payload::Gate(GatePayload {
                gate: "edit-post".to_string(),
                allowed: false,
                ..Default::default()
            }),
        );
        let filter = EntryFilter {
            gate_results: vec!["denied".parse().unwrap()],
            ..Default::default()
        };
        assert!(filter.matches(&denied));
        let filter = EntryFilter {
            gate_results: vec![GateOutcome::Allowed],
            ..Default::default()
        };
        assert!(!filter.matches(&denied));
    }

    #[test]
    fn status_filter_parsing() {
        assert_eq!("404".parse::<StatusFilter>().unwrap(), StatusFilter::Code(404));
        assert_eq!("err".parse::<StatusFilter>().unwrap(), StatusFilter::Missing);
        assert!("abc".parse::<StatusFilter>().is_err());
    }
}
