//! Typed field access across payload kinds.
//!
//! Each accessor returns `None` when the field does not apply to the payload's
//! kind. Filters treat `None` as "not applicable" and let the entry through.

use super::payload::{LogLevel, Payload, UserRef};

impl Payload {
    /// HTTP method of requests and outgoing calls.
    #[must_use]
    pub fn http_method(&self) -> Option<&str> {
        match self {
            Self::Request(p) => Some(&p.method),
            Self::HttpClient(p) => Some(&p.method),
            _ => None,
        }
    }

    /// Status of requests and outgoing calls; the inner `None` means no
    /// response status was recorded.
    #[must_use]
    pub fn http_status(&self) -> Option<Option<u16>> {
        match self {
            Self::Request(p) => Some(p.status),
            Self::HttpClient(p) => Some(p.status),
            _ => None,
        }
    }

    #[must_use]
    pub fn request_path(&self) -> Option<&str> {
        match self {
            Self::Request(p) => Some(&p.path),
            _ => None,
        }
    }

    /// Host of an outgoing call; `Some("")` when the URL cannot be parsed.
    #[must_use]
    pub fn http_host(&self) -> Option<String> {
        match self {
            Self::HttpClient(p) => Some(
                url::Url::parse(&p.url)
                    .ok()
                    .and_then(|u| u.host_str().map(ToOwned::to_owned))
                    .unwrap_or_default(),
            ),
            _ => None,
        }
    }

    #[must_use]
    pub fn custom_tags(&self) -> Option<&[String]> {
        match self {
            Self::Request(p) => Some(&p.custom_tags),
            Self::HttpClient(p) => Some(&p.custom_tags),
            _ => None,
        }
    }

    #[must_use]
    pub fn user(&self) -> Option<&UserRef> {
        match self {
            Self::Request(p) => p.user.as_ref(),
            Self::Gate(p) => p.user.as_ref(),
            _ => None,
        }
    }

    #[must_use]
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::Query(p) => Some(&p.sql),
            _ => None,
        }
    }

    /// Whether a query was flagged slow by instrumentation.
    #[must_use]
    pub fn slow_flag(&self) -> Option<bool> {
        match self {
            Self::Query(p) => Some(p.slow),
            _ => None,
        }
    }

    #[must_use]
    pub fn query_connection(&self) -> Option<Option<&str>> {
        match self {
            Self::Query(p) => Some(p.connection.as_deref()),
            _ => None,
        }
    }

    #[must_use]
    pub fn query_source(&self) -> Option<Option<&str>> {
        match self {
            Self::Query(p) => Some(p.source.as_deref()),
            _ => None,
        }
    }

    #[must_use]
    pub fn exception_name(&self) -> Option<&str> {
        match self {
            Self::Exception(p) => Some(&p.name),
            _ => None,
        }
    }

    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        match self {
            Self::Log(p) => Some(p.level),
            _ => None,
        }
    }

    #[must_use]
    pub fn log_context(&self) -> Option<Option<&str>> {
        match self {
            Self::Log(p) => Some(p.context.as_deref()),
            _ => None,
        }
    }

    #[must_use]
    pub fn job_name(&self) -> Option<&str> {
        match self {
            Self::Job(p) => Some(&p.name),
            _ => None,
        }
    }

    #[must_use]
    pub fn job_queue(&self) -> Option<Option<&str>> {
        match self {
            Self::Job(p) => Some(p.queue.as_deref()),
            _ => None,
        }
    }

    #[must_use]
    pub fn cache_operation(&self) -> Option<&str> {
        match self {
            Self::Cache(p) => Some(&p.operation),
            _ => None,
        }
    }

    #[must_use]
    pub fn cache_key(&self) -> Option<&str> {
        match self {
            Self::Cache(p) => Some(&p.key),
            _ => None,
        }
    }

    #[must_use]
    pub fn event_name(&self) -> Option<&str> {
        match self {
            Self::Event(p) => Some(&p.name),
            _ => None,
        }
    }

    #[must_use]
    pub fn schedule_command(&self) -> Option<&str> {
        match self {
            Self::Schedule(p) => Some(&p.command),
            _ => None,
        }
    }

    /// Recipients of a mail.
    #[must_use]
    pub fn mail_recipients(&self) -> Option<Vec<&str>> {
        match self {
            Self::Mail(p) => Some(p.recipients().map(String::as_str).collect()),
            _ => None,
        }
    }

    #[must_use]
    pub fn redis_command(&self) -> Option<&str> {
        match self {
            Self::Redis(p) => Some(&p.command),
            _ => None,
        }
    }

    #[must_use]
    pub fn model_action(&self) -> Option<&str> {
        match self {
            Self::Model(p) => Some(&p.action),
            _ => None,
        }
    }

    #[must_use]
    pub fn model_entity(&self) -> Option<&str> {
        match self {
            Self::Model(p) => Some(&p.entity),
            _ => None,
        }
    }

    #[must_use]
    pub fn notification_channel(&self) -> Option<&str> {
        match self {
            Self::Notification(p) => Some(&p.channel),
            _ => None,
        }
    }

    #[must_use]
    pub fn view_name(&self) -> Option<&str> {
        match self {
            Self::View(p) => Some(&p.name),
            _ => None,
        }
    }

    #[must_use]
    pub fn command_name(&self) -> Option<&str> {
        match self {
            Self::Command(p) => Some(&p.name),
            _ => None,
        }
    }

    #[must_use]
    pub fn exit_code(&self) -> Option<Option<i32>> {
        match self {
            Self::Command(p) => Some(p.exit_code),
            _ => None,
        }
    }

    #[must_use]
    pub fn gate_name(&self) -> Option<&str> {
        match self {
            Self::Gate(p) => Some(&p.gate),
            _ => None,
        }
    }

    #[must_use]
    pub fn gate_allowed(&self) -> Option<bool> {
        match self {
            Self::Gate(p) => Some(p.allowed),
            _ => None,
        }
    }

    #[must_use]
    pub fn batch_name(&self) -> Option<&str> {
        match self {
            Self::Batch(p) => Some(&p.name),
            _ => None,
        }
    }

    #[must_use]
    pub fn dump_format(&self) -> Option<Option<&str>> {
        match self {
            Self::Dump(p) => Some(p.format.as_deref()),
            _ => None,
        }
    }

    /// The lifecycle status string of kinds that carry one.
    ///
    /// Redis commands carry an optional status, so it is flattened to `""`
    /// when missing.
    #[must_use]
    pub fn status_text(&self) -> Option<&str> {
        match self {
            Self::Job(p) => Some(&p.status),
            Self::Schedule(p) => Some(&p.status),
            Self::Mail(p) => Some(&p.status),
            Self::Redis(p) => Some(p.status.as_deref().unwrap_or_default()),
            Self::Notification(p) => Some(&p.status),
            Self::Command(p) => Some(&p.status),
            Self::Batch(p) => Some(&p.status),
            Self::Dump(p) => Some(&p.status),
            _ => None,
        }
    }

    /// Duration in milliseconds, where the kind records one.
    #[must_use]
    pub fn duration_ms(&self) -> Option<f64> {
        match self {
            Self::Request(p) => Some(p.duration),
            Self::HttpClient(p) => Some(p.duration),
            Self::Query(p) => Some(p.duration),
            Self::Redis(p) => Some(p.duration),
            Self::View(p) => Some(p.duration),
            Self::Command(p) => Some(p.duration),
            Self::Job(p) => p.duration,
            Self::Cache(p) => p.duration,
            Self::Event(p) => p.duration,
            Self::Schedule(p) => p.duration,
            Self::Model(p) => p.duration,
            Self::Notification(p) => p.duration,
            Self::Batch(p) => p.duration,
            Self::Dump(p) => p.duration,
            Self::Exception(_) | Self::Log(_) | Self::Mail(_) | Self::Gate(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::payload::{HttpClientPayload, JobPayload, RequestPayload};
    use super::*;

    #[test]
    fn accessors_are_scoped_to_kind() {
        let request = Payload::Request(RequestPayload {
            method: "GET".to_string(),
            path: "/users".to_string(),
            ..Default::default()
        });
        assert_eq!(request.http_method(), Some("GET"));
        assert_eq!(request.http_status(), Some(None));
        assert_eq!(request.job_name(), None);
        assert_eq!(request.status_text(), None);

        let job = Payload::Job(JobPayload {
            name: "SendInvoice".to_string(),
            status: "failed".to_string(),
            ..Default::default()
        });
        assert_eq!(job.http_method(), None);
        assert_eq!(job.status_text(), Some("failed"));
        assert_eq!(job.job_queue(), Some(None));
    }

    #[test]
    fn http_host_parses_url() {
        let call = Payload::HttpClient(HttpClientPayload {
            method: "POST".to_string(),
            url: "https://api.stripe.com/v1/charges".to_string(),
            ..Default::default()
        });
        assert_eq!(call.http_host().as_deref(), Some("api.stripe.com"));

        let broken = Payload::HttpClient(HttpClientPayload {
            url: "not a url".to_string(),
            ..Default::default()
        });
        assert_eq!(broken.http_host().as_deref(), Some(""));
    }
}
