//! Content fingerprinting for cache and dedup keys.
//!
//! A fingerprint is a deterministic digest of `(endpoint, normalized
//! article text)`. Normalization runs before hashing on both the write
//! and read paths, so cosmetically different inputs (trailing spaces,
//! doubled spaces, extra blank lines) collide while any semantic
//! difference produces a distinct key.
//!
//! The hash is `DefaultHasher` (SipHash): deterministic within a process
//! lifetime, which is all the in-memory cache needs. A distributed
//! backend would swap in a stable cross-process hash (xxhash, SHA-256
//! prefix) without touching callers.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Normalize article text for fingerprinting.
///
/// - trims the whole text,
/// - collapses runs of spaces/tabs within a line to a single space,
/// - trims line edges,
/// - preserves paragraph structure: any run of blank lines becomes one.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_break = false;
    let mut wrote_line = false;

    for line in text.lines() {
        let mut compact = String::with_capacity(line.len());
        let mut last_space = true;
        for ch in line.trim().chars() {
            if ch == ' ' || ch == '\t' {
                if !last_space {
                    compact.push(' ');
                    last_space = true;
                }
            } else {
                compact.push(ch);
                last_space = false;
            }
        }

        if compact.is_empty() {
            if wrote_line {
                pending_break = true;
            }
            continue;
        }

        if wrote_line {
            out.push('\n');
            if pending_break {
                out.push('\n');
            }
        }
        out.push_str(&compact);
        wrote_line = true;
        pending_break = false;
    }

    out
}

/// Compute a fingerprint for an analysis request.
///
/// The endpoint participates in the hash so the same article analysed
/// by different endpoints gets distinct cache entries.
pub fn fingerprint(endpoint: &str, text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    endpoint.hash(&mut hasher);
    normalize(text).hash(&mut hasher);
    hasher.finish()
}

/// Fingerprint a payload scoped to a client, for request deduplication.
///
/// Mixing the client id into the hash keeps dedup per-client: two
/// different clients submitting the same article are not collapsed.
pub fn client_fingerprint(client_id: &str, endpoint: &str, text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    client_id.hash(&mut hasher);
    endpoint.hash(&mut hasher);
    normalize(text).hash(&mut hasher);
    hasher.finish()
}
