//! Hashing - SHA-256 for ETags and Source Fingerprints
//!
//! Rendered bodies and compiled units get stable digests so identical
//! output always yields identical cache validators.

use std::fmt::Write;

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `data`
pub fn sha256_hex(data: &[u8]) -> String {
    to_hex(&Sha256::digest(data))
}

/// Serialize with object keys sorted at every depth and no whitespace.
/// `marshal` output and fingerprints depend on this ordering.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    let tree = serde_json::to_value(value)?;
    serde_json::to_string(&canonicalize(tree))
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect::<Map<String, Value>>(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Strong entity tag for a response body
pub fn etag(body: &[u8]) -> String {
    format!("\"{}\"", sha256_hex(body))
}

/// Fingerprint of a compiled unit: every (name, markup) pair in parse order.
/// fingerprint = sha256(name_1 \0 markup_1 \0 name_2 \0 markup_2 ...)
pub fn fingerprint_sources<'a, I>(units: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut hasher = Sha256::new();
    for (name, markup) in units {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(markup.as_bytes());
        hasher.update([0u8]);
    }
    to_hex(&hasher.finalize())
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}
