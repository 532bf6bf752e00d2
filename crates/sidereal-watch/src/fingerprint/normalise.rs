//! Normalisation functions for fingerprinting.
//!
//! These functions strip variable data (line numbers, addresses, literals,
//! identifiers) so that recurring problems produce the same text.

use regex::Regex;
use std::sync::LazyLock;

/// Compiled regex patterns for normalisation.
struct NormalisationPatterns {
    /// Lines opening with a frame marker: `at `, `File "`, `#3 `
    frame_marker: Regex,
    /// Lines ending in a source location with a path or inside parentheses
    frame_location: Regex,
    /// Line and column suffixes: `file.ts:12` or `file.ts:12:5`
    line_numbers: Regex,
    /// Memory addresses: `0x7fff5fbfe000`
    memory_addresses: Regex,
    /// Numbered placeholders: `$1`
    numbered_params: Regex,
    /// Named placeholders: `:user_id`, but not casts such as `::text`
    named_params: Regex,
    /// Integer and decimal literals standing on their own
    numeric_literals: Regex,
    uuids: Regex,
    emails: Regex,
    urls: Regex,
}

fn build_patterns() -> Option<NormalisationPatterns> {
    Some(NormalisationPatterns {
        frame_marker: Regex::new(r#"^\s*(at\s+\S|File\s+"|#\d+\s)"#).ok()?,
        frame_location: Regex::new(r"(\S*[/\\]\S*:\d+(:\d+)?\)?|\(\S+:\d+(:\d+)?\))\s*$").ok()?,
        line_numbers: Regex::new(r":\d+(:\d+)?").ok()?,
        memory_addresses: Regex::new(r"0x[0-9a-fA-F]+").ok()?,
        numbered_params: Regex::new(r"\$\d+").ok()?,
        named_params: Regex::new(r"(^|[^:\w]):[A-Za-z_]\w*").ok()?,
        numeric_literals: Regex::new(r"\b\d+(\.\d+)?\b").ok()?,
        uuids: Regex::new(
            r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
        )
        .ok()?,
        emails: Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)+").ok()?,
        urls: Regex::new(r#"[a-zA-Z][a-zA-Z0-9+.-]*://[^\s"'<>]+"#).ok()?,
    })
}

#[allow(clippy::incompatible_msrv)]
static PATTERNS: LazyLock<Option<NormalisationPatterns>> = LazyLock::new(build_patterns);

/// Pick the frame an exception originated from and strip volatile parts.
///
/// The first line of a stack usually repeats the message, so it only counts
/// when it opens with a frame marker. Frames from dependencies and
/// runtime internals are skipped when an application frame exists.
#[must_use]
pub fn originating_frame(stack: &str) -> Option<String> {
    let patterns = PATTERNS.as_ref()?;

    let frames: Vec<&str> = stack
        .lines()
        .enumerate()
        .filter(|(i, line)| {
            patterns.frame_marker.is_match(line)
                || (*i > 0 && patterns.frame_location.is_match(line))
        })
        .map(|(_, line)| line)
        .collect();
    let frame = frames
        .iter()
        .find(|f| !is_library_frame(f))
        .or_else(|| frames.first())?;

    let mut result = frame.trim().to_owned();
    if let Some(rest) = result.strip_prefix("at ") {
        result = rest.to_owned();
    }
    result = patterns.line_numbers.replace_all(&result, "").to_string();
    result = patterns.memory_addresses.replace_all(&result, "").to_string();
    result = normalise_whitespace(&result);

    (!result.is_empty()).then_some(result)
}

fn is_library_frame(frame: &str) -> bool {
    ["node_modules", "node:internal", "<anonymous>"]
        .iter()
        .any(|marker| frame.contains(*marker))
}

/// Normalise SQL so that the same statement with different values matches.
///
/// Placeholders (`$1`, `?`, `:name`) and numeric literals all become `?`.
#[must_use]
pub fn normalise_sql(sql: &str) -> String {
    let Some(patterns) = PATTERNS.as_ref() else {
        return normalise_whitespace(sql);
    };

    let mut result = patterns.numbered_params.replace_all(sql, "?").to_string();
    result = patterns
        .named_params
        .replace_all(&result, "${1}?")
        .to_string();
    result = patterns
        .numeric_literals
        .replace_all(&result, "?")
        .to_string();

    normalise_whitespace(&result)
}

/// Normalise a log message: UUIDs, email addresses and URLs are replaced with
/// placeholders.
#[must_use]
pub fn normalise_message(message: &str) -> String {
    let Some(patterns) = PATTERNS.as_ref() else {
        return normalise_whitespace(message);
    };

    let mut result = patterns.urls.replace_all(message, "<URL>").to_string();
    result = patterns.emails.replace_all(&result, "<EMAIL>").to_string();
    result = patterns.uuids.replace_all(&result, "<UUID>").to_string();

    normalise_whitespace(&result)
}

/// Normalise whitespace (collapse runs of spaces and newlines).
fn normalise_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_strips_at_and_positions() {
        let stack = "TypeError: x is undefined\n    at UserService.find (/app/src/users.ts:42:13)\n    at main (/app/src/index.ts:3:1)";
        assert_eq!(
            originating_frame(stack).as_deref(),
            Some("UserService.find (/app/src/users.ts)")
        );
    }

    #[test]
    fn frame_skips_dependencies() {
        let stack = "Error: boom\n    at Object.query (/app/node_modules/pg/lib/client.js:10:5)\n    at Repo.load (/app/src/repo.ts:7:9)";
        assert_eq!(
            originating_frame(stack).as_deref(),
            Some("Repo.load (/app/src/repo.ts)")
        );
    }

    #[test]
    fn frame_ignores_message_ending_in_host_port() {
        let stack = "Error: connect ECONNREFUSED 10.0.0.1:5432\n    at TCPConnectWrap.afterConnect (/app/src/db.ts:10:5)";
        assert_eq!(
            originating_frame(stack).as_deref(),
            Some("TCPConnectWrap.afterConnect (/app/src/db.ts)")
        );
    }

    #[test]
    fn frame_accepts_bare_path_locations() {
        let stack = "panicked at boom\n  src/main.rs:10:5\n  worker (job.rs:3)";
        assert_eq!(originating_frame(stack).as_deref(), Some("src/main.rs"));
        assert_eq!(originating_frame("oops 127.0.0.1:80\nretrying 10.0.0.2:80"), None);
    }

    #[test]
    fn frame_absent_without_frame_lines() {
        assert_eq!(originating_frame("just a message"), None);
        assert_eq!(originating_frame(""), None);
    }

    #[test]
    fn sql_placeholders_become_question_marks() {
        assert_eq!(
            normalise_sql("SELECT * FROM users WHERE id = $1 AND org = $2"),
            "SELECT * FROM users WHERE id = ? AND org = ?"
        );
        assert_eq!(
            normalise_sql("SELECT * FROM users WHERE id = :id"),
            "SELECT * FROM users WHERE id = ?"
        );
        assert_eq!(
            normalise_sql("SELECT  *\n FROM t  WHERE a = 42 LIMIT 10"),
            "SELECT * FROM t WHERE a = ? LIMIT ?"
        );
    }

    #[test]
    fn sql_casts_and_identifiers_survive() {
        assert_eq!(
            normalise_sql("SELECT name::text FROM table1 WHERE x = ?"),
            "SELECT name::text FROM table1 WHERE x = ?"
        );
    }

    #[test]
    fn message_placeholders() {
        let message = "User 550e8400-e29b-41d4-a716-446655440000 (bob@example.com) failed calling https://api.example.com/v1/users?id=3";
        assert_eq!(
            normalise_message(message),
            "User <UUID> (<EMAIL>) failed calling <URL>"
        );
    }
}
