//! Deterministic record keys.
//!
//! A record key is derived purely from `(registry, repository, digest)` so
//! that any two observations of the same image resolve to the same record.

/// Maximum record key length, matching the DNS-subdomain limit of most
/// record stores.
pub const MAX_KEY_LEN: usize = 253;

const SHORT_DIGEST_LEN: usize = 8;

/// Build the record key for an image.
///
/// `registry.example/ns/app` with digest `sha256:0123abcd...` yields
/// `registry.example.ns.app.0123abcd`.
#[must_use]
pub fn record_key(registry: &str, repository: &str, digest: &str) -> String {
    let raw = format!("{registry}.{repository}.{}", short_digest(digest)).replace('/', ".");
    let mut key = sanitize(&raw.to_lowercase());
    if key.len() > MAX_KEY_LEN {
        // Sanitized keys are ASCII, so any byte offset is a char boundary.
        key.truncate(MAX_KEY_LEN);
        key = key.trim_end_matches(['.', '-']).to_owned();
    }
    key
}

/// First eight characters of a `sha256:` digest; other digests are returned
/// unchanged.
#[must_use]
pub fn short_digest(digest: &str) -> &str {
    match digest.strip_prefix("sha256:") {
        Some(hex) => hex.get(..SHORT_DIGEST_LEN).unwrap_or(hex),
        None => digest,
    }
}

/// Restrict a name to `[a-z0-9.-]`.
///
/// `_` and `/` become `.`; any other character becomes `-` when it sits
/// inside the name and is dropped at either end. Leading and trailing
/// separators are trimmed.
fn sanitize(name: &str) -> String {
    let last = name.len().saturating_sub(1);
    let mut out = String::with_capacity(name.len());
    for (i, c) in name.char_indices() {
        match c {
            'a'..='z' | '0'..='9' | '.' | '-' => out.push(c),
            '_' | '/' => out.push('.'),
            _ if i > 0 && i + c.len_utf8() - 1 < last => out.push('-'),
            _ => {}
        }
    }
    out.trim_matches(['.', '-']).to_owned()
}
