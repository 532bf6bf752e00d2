//! Parsing of listing parameters from raw string pairs.
//!
//! Malformed values never produce errors: they are dropped or replaced by
//! defaults, so a bad query string still yields a usable listing.

use std::str::FromStr;

use crate::entry::EntryKind;
use crate::store::{CursorParams, EntryFilter, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};

/// Kind, cursor and filter parsed from a query string.
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    pub kind: Option<EntryKind>,
    /// Cursor bounds, page size and the entry filter.
    pub cursor: CursorParams,
}

impl QueryParams {
    /// Build parameters from key/value pairs.
    ///
    /// Keys are matched in `snake_case` or `camelCase`; unknown keys are
    /// ignored. List values are comma separated and repeated keys add to the
    /// same list.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut params = Self::default();
        for (key, value) in pairs {
            params.apply(&snake_case(key.as_ref()), value.as_ref().trim());
        }
        params
    }

    /// Build parameters from an URL-encoded query string such as
    /// `kind=request&statuses=500,ERR&limit=20`.
    #[must_use]
    pub fn from_query_string(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        Self::from_pairs(url::form_urlencoded::parse(query.as_bytes()))
    }

    #[must_use]
    pub const fn filter(&self) -> &EntryFilter {
        &self.cursor.filter
    }

    fn apply(&mut self, key: &str, value: &str) {
        let f = &mut self.cursor.filter;
        match key {
            "kind" | "type" => self.kind = value.parse().ok(),
            "before" => self.cursor.before = value.parse().ok(),
            "after" => self.cursor.after = value.parse().ok(),
            "limit" => {
                self.cursor.limit = value
                    .parse::<usize>()
                    .map_or(DEFAULT_PAGE_LIMIT, |l| l.clamp(1, MAX_PAGE_LIMIT));
            }
            "request_id" => f.request_id = non_empty(value),
            "family_hash" => f.family_hash = non_empty(value),
            "tags" | "tag" => f.tags.extend(list(value)),
            "search" | "q" => f.search = non_empty(value),

            "methods" | "method" => f.methods.extend(list(value)),
            "statuses" | "status" => extend_parsed(&mut f.statuses, value),
            "paths" | "path" => f.paths.extend(list(value)),
            "hosts" | "host" => f.hosts.extend(list(value)),

            "query_types" => f.query_types.extend(list(value)),
            "connections" => f.connections.extend(list(value)),
            "sources" => f.sources.extend(list(value)),
            "slow" => {
                if let Some(slow) = boolean(value) {
                    f.slow = Some(slow);
                }
            }

            "exception_names" => f.exception_names.extend(list(value)),
            "resolved" => {
                if let Some(resolved) = boolean(value) {
                    f.resolved = Some(resolved);
                }
            }

            "levels" | "level" => extend_parsed(&mut f.levels, value),
            "contexts" => f.contexts.extend(list(value)),

            "job_names" => f.job_names.extend(list(value)),
            "job_statuses" => f.job_statuses.extend(list(value)),
            "queues" => f.queues.extend(list(value)),

            "cache_operations" => f.cache_operations.extend(list(value)),
            "cache_keys" => f.cache_keys.extend(list(value)),

            "event_names" => f.event_names.extend(list(value)),

            "schedule_commands" => f.schedule_commands.extend(list(value)),
            "schedule_statuses" => f.schedule_statuses.extend(list(value)),

            "mail_statuses" => f.mail_statuses.extend(list(value)),
            "recipients" => f.recipients.extend(list(value)),

            "redis_commands" => f.redis_commands.extend(list(value)),

            "model_actions" => f.model_actions.extend(list(value)),
            "model_names" => f.model_names.extend(list(value)),

            "notification_channels" => f.notification_channels.extend(list(value)),
            "notification_statuses" => f.notification_statuses.extend(list(value)),

            "view_names" => f.view_names.extend(list(value)),

            "command_names" => f.command_names.extend(list(value)),
            "exit_codes" => extend_parsed(&mut f.exit_codes, value),

            "gate_names" => f.gate_names.extend(list(value)),
            "gate_results" => extend_parsed(&mut f.gate_results, value),

            "batch_names" => f.batch_names.extend(list(value)),
            "batch_statuses" => f.batch_statuses.extend(list(value)),

            "dump_formats" => f.dump_formats.extend(list(value)),
            "dump_statuses" => f.dump_statuses.extend(list(value)),

            _ => tracing::trace!(key, "ignoring unknown query parameter"),
        }
    }
}

fn list(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
}

/// Append comma-separated values parsed as `T`; tokens that fail to parse are
/// dropped.
fn extend_parsed<T: FromStr>(target: &mut Vec<T>, value: &str) {
    target.extend(list(value).filter_map(|item| item.parse::<T>().ok()));
}

fn boolean(value: &str) -> Option<bool> {
    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_owned())
}

fn snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for c in key.trim().chars() {
        if c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::entry::LogLevel;
    use crate::store::{GateOutcome, StatusFilter};

    #[test]
    fn defaults_without_parameters() {
        let params = QueryParams::from_pairs(Vec::<(String, String)>::new());
        assert_eq!(params.kind, None);
        assert_eq!(params.cursor.limit, DEFAULT_PAGE_LIMIT);
        assert!(params.filter().is_empty());
    }

    #[test]
    fn parses_kind_cursor_and_lists() {
        let params = QueryParams::from_pairs([
            ("kind", "http-client"),
            ("before", "120"),
            ("after", "nope"),
            ("methods", "GET, post ,,"),
            ("statuses", "500,ERR,abc"),
            ("requestId", "req-1"),
        ]);
        assert_eq!(params.kind, Some(EntryKind::HttpClient));
        assert_eq!(params.cursor.before, Some(120));
        assert_eq!(params.cursor.after, None);
        assert_eq!(params.filter().methods, vec!["GET", "post"]);
        assert_eq!(
            params.filter().statuses,
            vec![StatusFilter::Code(500), StatusFilter::Missing]
        );
        assert_eq!(params.filter().request_id.as_deref(), Some("req-1"));
    }

    #[test]
    fn limit_is_defaulted_and_clamped() {
        let limit = |raw: &str| QueryParams::from_pairs([("limit", raw)]).cursor.limit;
        assert_eq!(limit("20"), 20);
        assert_eq!(limit("0"), 1);
        assert_eq!(limit("5000"), MAX_PAGE_LIMIT);
        assert_eq!(limit("-3"), DEFAULT_PAGE_LIMIT);
        assert_eq!(limit("ten"), DEFAULT_PAGE_LIMIT);
    }

    #[test]
    fn booleans_only_accept_true_and_false() {
        let params = QueryParams::from_pairs([("slow", "TRUE"), ("resolved", "yes")]);
        assert_eq!(params.filter().slow, Some(true));
        assert_eq!(params.filter().resolved, None);

        let params = QueryParams::from_pairs([("resolved", "false")]);
        assert_eq!(params.filter().resolved, Some(false));
    }

    #[test]
    fn typed_lists_drop_invalid_tokens() {
        let params = QueryParams::from_pairs([
            ("levels", "error,loud,warning"),
            ("exit_codes", "0,1,x"),
            ("gate_results", "denied,maybe"),
        ]);
        assert_eq!(params.filter().levels, vec![LogLevel::Error, LogLevel::Warn]);
        assert_eq!(params.filter().exit_codes, vec![0, 1]);
        assert_eq!(params.filter().gate_results, vec![GateOutcome::Denied]);
    }

    #[test]
    fn repeated_keys_accumulate() {
        let params = QueryParams::from_pairs([("tags", "slow"), ("tags", "hit,miss")]);
        assert_eq!(params.filter().tags, vec!["slow", "hit", "miss"]);
    }

    #[test]
    fn parses_query_string() {
        let params =
            QueryParams::from_query_string("?kind=cache&cacheKeys=users%3A1&unknown=1&limit=2");
        assert_eq!(params.kind, Some(EntryKind::Cache));
        assert_eq!(params.filter().cache_keys, vec!["users:1"]);
        assert_eq!(params.cursor.limit, 2);
    }

    #[test]
    fn unknown_kind_is_ignored() {
        let params = QueryParams::from_pairs([("kind", "metric")]);
        assert_eq!(params.kind, None);
    }
}
