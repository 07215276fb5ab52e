//! Header and JSON-body redaction.
//!
//! Both functions are pure: they return scrubbed copies and never touch
//! the originals, so the bytes forwarded to the real caller/callee are
//! always the ones that were captured.

use crate::REDACTED;
use bytes::Bytes;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Return a copy of `headers` with the value list of every name in
/// `names` (matched case-insensitively, `names` itself lowercased)
/// replaced by the placeholder. All other entries are copied untouched.
pub fn redact_headers(
    headers: &HashMap<String, Vec<String>>,
    names: &HashSet<String>,
) -> HashMap<String, Vec<String>> {
    headers
        .iter()
        .map(|(name, values)| {
            if names.contains(&name.to_lowercase()) {
                (name.clone(), vec![REDACTED.to_string()])
            } else {
                (name.clone(), values.clone())
            }
        })
        .collect()
}

/// Redact JSON field paths from `body`, returning a scrubbed copy.
///
/// Paths use dotted/bracketed syntax: `password`, `card.number`,
/// `items[0].secret`, `items[*].secret`. A leading `$.` is tolerated.
/// Paths that do not resolve are ignored. A body that does not parse as
/// JSON is returned unchanged; malformed input is not an error here.
pub fn redact_json(body: &[u8], paths: &[String]) -> Bytes {
    if body.is_empty() || paths.is_empty() {
        return Bytes::copy_from_slice(body);
    }

    let Ok(mut value) = serde_json::from_slice::<Value>(body) else {
        return Bytes::copy_from_slice(body);
    };

    for path in paths {
        let segments = parse_path(path);
        if segments.is_empty() {
            continue;
        }
        apply(&mut value, &segments);
    }

    match serde_json::to_vec(&value) {
        Ok(out) => Bytes::from(out),
        Err(_) => Bytes::copy_from_slice(body),
    }
}

/// One step of a field path.
#[derive(Debug, PartialEq, Eq)]
enum Segment {
    /// Object key, e.g. `card` in `card.number`.
    Key(String),
    /// Fixed array index, e.g. `[0]`.
    Index(usize),
    /// Every element of an array (or every value of an object), `[*]`.
    Wildcard,
}

fn parse_path(path: &str) -> Vec<Segment> {
    let path = path.strip_prefix("$.").unwrap_or(path);
    let mut segments = Vec::new();

    for part in path.split('.') {
        let mut rest = part;
        // `name[0][*]` style: the leading name, then bracket suffixes.
        while !rest.is_empty() {
            if let Some(open) = rest.find('[') {
                if open > 0 {
                    segments.push(Segment::Key(rest[..open].to_string()));
                }
                let Some(close) = rest[open..].find(']') else {
                    // Unbalanced bracket: treat the remainder as a literal key.
                    segments.push(Segment::Key(rest.to_string()));
                    break;
                };
                let close = open + close;
                let index = &rest[open + 1..close];
                if index == "*" {
                    segments.push(Segment::Wildcard);
                } else if let Ok(n) = index.parse::<usize>() {
                    segments.push(Segment::Index(n));
                } else {
                    // Bracketed key, e.g. `["weird.key"]` without quotes support.
                    segments.push(Segment::Key(index.trim_matches('"').to_string()));
                }
                rest = &rest[close + 1..];
            } else {
                segments.push(Segment::Key(rest.to_string()));
                break;
            }
        }
    }

    segments
}

fn apply(value: &mut Value, segments: &[Segment]) {
    let Some((first, rest)) = segments.split_first() else {
        *value = Value::String(REDACTED.to_string());
        return;
    };

    match (first, value) {
        (Segment::Key(key), Value::Object(map)) => {
            if let Some(child) = map.get_mut(key) {
                apply(child, rest);
            }
        }
        (Segment::Index(index), Value::Array(items)) => {
            if let Some(child) = items.get_mut(*index) {
                apply(child, rest);
            }
        }
        (Segment::Wildcard, Value::Array(items)) => {
            for child in items {
                apply(child, rest);
            }
        }
        (Segment::Wildcard, Value::Object(map)) => {
            for child in map.values_mut() {
                apply(child, rest);
            }
        }
        // Path does not resolve in this structure: leave it alone.
        _ => {}
    }
}
