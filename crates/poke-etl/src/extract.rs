//! Media URL extraction from untyped JSON documents
//!
//! Walks a decoded document depth-first and yields one [`MediaRef`] per
//! string leaf that is an HTTP(S) URL.
//!
//! Labels are built as follows:
//!
//! - object keys are joined with `_` (`other` → `official-artwork` →
//!   `front_default` becomes `other_official-artwork_front_default`)
//! - array elements append their index (`frames_0`, `frames_1`, ...)
//! - a URL reached without any key is labelled `sprite`
//!
//! Ordering is deterministic: `serde_json::Map` iterates keys in a stable
//! order (sorted, or document order if `preserve_order` is enabled) and
//! arrays in index order, so equal input always yields equal output.

use poke_common::types::{is_http_url, MediaRef};
use serde_json::Value;

/// Label used when a URL is reached without traversing any key.
pub const ROOT_LABEL: &str = "sprite";

const SEPARATOR: char = '_';

/// Extract every media URL below `node`
pub fn extract(node: &Value) -> Vec<MediaRef> {
    extract_with_prefix(node, "")
}

/// Extract every media URL below `node`, prefixing labels with `prefix`
pub fn extract_with_prefix(node: &Value, prefix: &str) -> Vec<MediaRef> {
    let mut found = Vec::new();
    walk(node, prefix, &mut found);
    found
}

fn walk(node: &Value, prefix: &str, found: &mut Vec<MediaRef>) {
    match node {
        Value::Object(map) => {
            for (key, child) in map {
                walk(child, &join(prefix, key), found);
            }
        },
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                walk(child, &join(prefix, &index.to_string()), found);
            }
        },
        Value::String(s) if is_http_url(s) => {
            let label = if prefix.is_empty() { ROOT_LABEL } else { prefix };
            found.push(MediaRef::new(label, s.as_str()));
        },
        _ => {},
    }
}

fn join(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        let mut joined = String::with_capacity(prefix.len() + 1 + segment.len());
        joined.push_str(prefix);
        joined.push(SEPARATOR);
        joined.push_str(segment);
        joined
    }
}
