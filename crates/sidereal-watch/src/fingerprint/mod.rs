//! Entry fingerprinting for grouping recurring problems into families.
//!
//! The fingerprint is a SHA-256 hash over normalised, NUL-delimited components,
//! truncated to 16 hex characters. Only exceptions, queries and problem logs
//! (warn and above) are fingerprinted.

mod normalise;

pub use normalise::{normalise_message, normalise_sql, originating_frame};

use sha2::{Digest, Sha256};

use crate::entry::{Entry, Payload};

/// Number of hex characters in a family hash.
pub const FINGERPRINT_LEN: usize = 16;

/// Computes family hashes for entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fingerprinter;

impl Fingerprinter {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Compute the family hash of an entry, if its kind is grouped.
    ///
    /// The fingerprint is computed from:
    /// 1. Entry kind
    /// 2. Kind-specific components:
    ///    - exception: name and originating frame (or file)
    ///    - query: normalised SQL
    ///    - log: context and normalised message
    #[must_use]
    pub fn compute(&self, entry: &Entry) -> Option<String> {
        match &entry.payload {
            Payload::Exception(p) => {
                let location = p
                    .stack
                    .as_deref()
                    .and_then(originating_frame)
                    .or_else(|| p.file.clone())
                    .unwrap_or_default();
                Some(digest(&[entry.kind.as_str(), &p.name, &location]))
            }
            Payload::Query(p) => Some(digest(&[entry.kind.as_str(), &normalise_sql(&p.sql)])),
            Payload::Log(p) if p.level.is_problem() => Some(digest(&[
                entry.kind.as_str(),
                p.context.as_deref().unwrap_or_default(),
                &normalise_message(&p.message),
            ])),
            _ => None,
        }
    }
}

/// Hash NUL-delimited components into a family hash.
fn digest(components: &[&str]) -> String {
    const DELIMITER: &[u8] = b"\x00";

    let mut hasher = Sha256::new();
    for component in components {
        hasher.update(component.as_bytes());
        hasher.update(DELIMITER);
    }
    let result = hasher.finalize();
    hex::encode(&result[..FINGERPRINT_LEN / 2])
}
