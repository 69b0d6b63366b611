//! Channel naming.
//!
//! A channel name is `query_<name>_<sha256 hex>` where the digest covers the
//! canonical JSON form of the query's parameters:
//!
//! - object keys are emitted sorted (UTF-16 code unit order, as a JavaScript
//!   `sort()` would order them), so key insertion order never matters
//! - array elements keep their position, so reordering an array changes the name
//! - absent parameters (`null`) canonicalize to `{}`
//! - numbers print the way JavaScript's `Number.prototype.toString` prints
//!   them (`1.0` is `1`, `1e16` is `10000000000000000`, `1e-7` is `1e-7`)
//!
//! The function is pure. Server and clients must produce byte-identical output
//! or live updates silently stop arriving.

use std::fmt::Write as _;

use serde_json::{Number, Value};
use sha2::{Digest, Sha256};

/// Prefix shared by every channel name.
pub const CHANNEL_PREFIX: &str = "query_";

/// Largest integer magnitude a double represents exactly (2^53).
const MAX_SAFE_INTEGER: u64 = 9_007_199_254_740_992;

/// Channel a subscriber listens on for updates of `query` with `params`.
pub fn channel_name(query: &str, params: &Value) -> String {
    let digest = Sha256::digest(canonicalize(params).as_bytes());
    format!("{CHANNEL_PREFIX}{query}_{digest:x}")
}

/// Deterministic compact JSON with sorted object keys.
pub fn canonicalize(value: &Value) -> String {
    let mut out = String::new();
    if value.is_null() {
        out.push_str("{}");
    } else {
        write_value(&mut out, value);
    }
    out
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => write_number(out, n),
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.encode_utf16().cmp(b.encode_utf16()));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_value(out, item);
            }
            out.push('}');
        }
    }
}

fn write_number(out: &mut String, n: &Number) {
    // Integers a double holds exactly keep their own digits; anything else is
    // printed as the double a JavaScript client would have parsed.
    let exact = n
        .as_i64()
        .map(|i| i.unsigned_abs() <= MAX_SAFE_INTEGER)
        .or_else(|| n.as_u64().map(|u| u <= MAX_SAFE_INTEGER));
    if exact == Some(true) {
        let _ = write!(out, "{n}");
        return;
    }
    match n.as_f64() {
        // -0 prints as 0
        Some(f) if f == 0.0 => out.push('0'),
        Some(f) => out.push_str(ryu_js::Buffer::new().format(f)),
        None => {
            let _ = write!(out, "{n}");
        }
    }
}

fn write_string(out: &mut String, s: &str) {
    out.push_str(&serde_json::to_string(s).unwrap_or_default());
}
