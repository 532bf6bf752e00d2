//! Automatic tagging of entries from their content.

use serde::Deserialize;

use crate::entry::{normalise_tags, Entry, Payload, UserRef};

/// Default slow threshold for requests and outgoing calls in milliseconds.
pub const DEFAULT_SLOW_REQUEST_MS: f64 = 1_000.0;

/// Default slow threshold for queries in milliseconds.
pub const DEFAULT_SLOW_QUERY_MS: f64 = 1_000.0;

/// Default slow threshold for console commands in milliseconds.
pub const DEFAULT_SLOW_COMMAND_MS: f64 = 1_000.0;

/// Default slow threshold for event dispatch in milliseconds.
pub const DEFAULT_SLOW_EVENT_MS: f64 = 100.0;

/// Default slow threshold for model actions in milliseconds.
pub const DEFAULT_SLOW_MODEL_MS: f64 = 500.0;

/// Default slow threshold for view renders in milliseconds.
pub const DEFAULT_SLOW_VIEW_MS: f64 = 200.0;

/// Counts above this mark a batch or dump as `LARGE`.
const LARGE_THRESHOLD: u64 = 1_000;

/// Path segments that dispatch many operations through one endpoint.
const RPC_SEGMENTS: &[&str] = &["graphql", "trpc", "rpc"];

/// Framework exception names that map to HTTP responses.
const HTTP_EXCEPTIONS: &[&str] = &[
    "BadRequestException",
    "UnauthorizedException",
    "ForbiddenException",
    "NotFoundException",
    "MethodNotAllowedException",
    "NotAcceptableException",
    "RequestTimeoutException",
    "ConflictException",
    "GoneException",
    "PayloadTooLargeException",
    "UnsupportedMediaTypeException",
    "UnprocessableEntityException",
    "InternalServerErrorException",
    "NotImplementedException",
    "BadGatewayException",
    "ServiceUnavailableException",
    "GatewayTimeoutException",
];

/// Durations in milliseconds above which an entry is tagged `SLOW`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct SlowThresholds {
    pub request: f64,
    pub http_client: f64,
    pub query: f64,
    pub command: f64,
    pub event: f64,
    pub model: f64,
    pub view: f64,
}

impl Default for SlowThresholds {
    fn default() -> Self {
        Self {
            request: DEFAULT_SLOW_REQUEST_MS,
            http_client: DEFAULT_SLOW_REQUEST_MS,
            query: DEFAULT_SLOW_QUERY_MS,
            command: DEFAULT_SLOW_COMMAND_MS,
            event: DEFAULT_SLOW_EVENT_MS,
            model: DEFAULT_SLOW_MODEL_MS,
            view: DEFAULT_SLOW_VIEW_MS,
        }
    }
}

/// Derives upper-case labels from entry content.
#[derive(Debug, Clone, Default)]
pub struct TagClassifier {
    thresholds: SlowThresholds,
}

impl TagClassifier {
    /// Create a classifier with default thresholds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_thresholds(thresholds: SlowThresholds) -> Self {
        Self { thresholds }
    }

    #[must_use]
    pub const fn thresholds(&self) -> &SlowThresholds {
        &self.thresholds
    }

    /// Tags for an entry: sorted, without duplicates, upper-case.
    #[must_use]
    pub fn classify(&self, entry: &Entry) -> Vec<String> {
        let t = &self.thresholds;
        let mut tags: Vec<String> = Vec::new();
        let mut add = |tag: &str| tags.push(tag.to_owned());

        match &entry.payload {
            Payload::Request(p) => {
                status_tags(p.status, false, &mut add);
                if !is_rpc_path(&p.path) {
                    add(&p.method);
                }
                if let Some(user) = &p.user {
                    add(&user_tag(user));
                }
                slow(p.duration, t.request, &mut add);
                p.custom_tags.iter().for_each(|c| add(c.as_str()));
            }
            Payload::HttpClient(p) => {
                status_tags(p.status, true, &mut add);
                let url = url::Url::parse(&p.url).ok();
                let path = url.as_ref().map_or(p.url.as_str(), url::Url::path);
                if !is_rpc_path(path) {
                    add(&p.method);
                }
                if let Some(host) = url.as_ref().and_then(url::Url::host_str) {
                    add(host);
                }
                slow(p.duration, t.http_client, &mut add);
                p.custom_tags.iter().for_each(|c| add(c.as_str()));
            }
            Payload::Query(p) => {
                if p.slow {
                    add("SLOW");
                }
                slow(p.duration, t.query, &mut add);
                if let Some(source) = &p.source {
                    add(source);
                }
                let statement = p.sql.trim_start();
                for kind in ["SELECT", "INSERT", "UPDATE", "DELETE"] {
                    if statement
                        .get(..kind.len())
                        .is_some_and(|head| head.eq_ignore_ascii_case(kind))
                    {
                        add(kind);
                    }
                }
            }
            Payload::Exception(p) => {
                add("ERROR");
                if !matches!(p.name.as_str(), "Error" | "Exception") {
                    add(&p.name);
                }
                if is_http_exception(&p.name) {
                    add("HTTP-ERROR");
                }
                if mentions_validation(&p.name) || mentions_validation(&p.message) {
                    add("VALIDATION-ERROR");
                }
            }
            Payload::Log(p) => {
                add(p.level.as_str());
                if let Some(context) = &p.context {
                    add(context);
                }
            }
            Payload::Job(p) => {
                add(&p.status);
                if let Some(queue) = &p.queue {
                    add(queue);
                }
            }
            Payload::Cache(p) => {
                add(&p.operation);
                match p.hit {
                    Some(true) => add("HIT"),
                    Some(false) => add("MISS"),
                    None => {}
                }
                if let Some(store) = &p.store {
                    add(store);
                }
            }
            Payload::Event(p) => {
                add(&p.name);
                if p.broadcast {
                    add("BROADCAST");
                }
                if let Some(duration) = p.duration {
                    slow(duration, t.event, &mut add);
                }
            }
            Payload::Schedule(p) => {
                add(&p.status);
                if p.expression.is_some() {
                    add("CRON");
                }
                if p.interval.is_some() {
                    add("INTERVAL");
                }
            }
            Payload::Mail(p) => {
                add(&p.status);
                if p.recipients().count() > 1 {
                    add("BULK");
                }
                if p.queued {
                    add("QUEUED");
                }
            }
            Payload::Redis(p) => {
                add(&p.command);
                if let Some(status) = &p.status {
                    add(status);
                }
            }
            Payload::Model(p) => {
                add(&p.action);
                add(&p.entity);
                if p.count.is_some_and(|c| c > 1) {
                    add("BULK");
                }
                if let Some(duration) = p.duration {
                    slow(duration, t.model, &mut add);
                }
            }
            Payload::Notification(p) => {
                add(&p.status);
                add(&p.channel);
                if p.recipients.len() > 1 {
                    add("BULK");
                }
            }
            Payload::View(p) => {
                add(template_name(&p.name));
                slow(p.duration, t.view, &mut add);
            }
            Payload::Command(p) => {
                add(&p.status);
                slow(p.duration, t.command, &mut add);
            }
            Payload::Gate(p) => {
                add(if p.allowed { "ALLOWED" } else { "DENIED" });
                add(&p.gate);
                if let Some(user) = &p.user {
                    add(&user_tag(user));
                }
            }
            Payload::Batch(p) => {
                add(&p.status);
                add(&p.name);
                if p.total_jobs > LARGE_THRESHOLD {
                    add("LARGE");
                }
            }
            Payload::Dump(p) => {
                add(&p.status);
                if let Some(format) = &p.format {
                    add(format);
                }
                if p.compressed {
                    add("COMPRESSED");
                }
                if p.encrypted {
                    add("ENCRYPTED");
                }
                if p.records.is_some_and(|r| r > LARGE_THRESHOLD) {
                    add("LARGE");
                }
            }
        }

        normalise_tags(&tags)
    }
}

fn status_tags(status: Option<u16>, missing_is_error: bool, add: &mut impl FnMut(&str)) {
    match status {
        Some(200..=299) => add("SUCCESS"),
        Some(300..=399) => add("REDIRECT"),
        Some(400..=499) => {
            add("CLIENT-ERROR");
            add("4XX");
        }
        Some(500..=599) => {
            add("ERROR");
            add("5XX");
        }
        Some(_) => {}
        None if missing_is_error => add("ERROR"),
        None => {}
    }
}

fn slow(duration: f64, threshold: f64, add: &mut impl FnMut(&str)) {
    if duration > threshold {
        add("SLOW");
    }
}

fn user_tag(user: &UserRef) -> String {
    format!("USER:{}", user.id)
}

fn is_rpc_path(path: &str) -> bool {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    path.split('/')
        .any(|segment| RPC_SEGMENTS.iter().any(|rpc| segment.eq_ignore_ascii_case(rpc)))
}

fn is_http_exception(name: &str) -> bool {
    name.to_ascii_lowercase().contains("http") || HTTP_EXCEPTIONS.contains(&name)
}

fn mentions_validation(text: &str) -> bool {
    text.to_ascii_lowercase().contains("validation")
}

/// Template base name without directories or extensions.
fn template_name(name: &str) -> &str {
    let file = name.rsplit(['/', '\\']).next().unwrap_or(name);
    file.split('.').next().unwrap_or(file)
}
