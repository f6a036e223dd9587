//! Bearer token extraction from auth responses of unknown shape.
//!
//! The upstream auth endpoint has returned the token under several keys,
//! sometimes nested in an `items` array, and occasionally wrapped in text
//! that is not valid JSON as a whole. Each heuristic is a pure strategy;
//! they run in order and the first non-empty result wins.

use serde_json::Value;

/// Keys searched, in order, on every candidate object.
pub const CANDIDATE_KEYS: [&str; 4] = ["Token", "token", "access_token", "bearer"];

type Strategy = fn(Option<&Value>, &str) -> Option<String>;

const STRATEGIES: &[Strategy] = &[by_candidate_key, nested_items, reparse_raw_text];

/// Run every strategy against the parsed body (if it parsed) and the raw text.
pub fn extract_token(payload: Option<&Value>, raw: &str) -> Option<String> {
    STRATEGIES.iter().find_map(|strategy| strategy(payload, raw))
}

/// Object-level search without the raw-text fallback; used when recursing.
fn from_value(value: &Value) -> Option<String> {
    by_candidate_key(Some(value), "").or_else(|| nested_items(Some(value), ""))
}

/// A usable token is a non-empty string that is not an unresolved template.
fn accept(value: &Value) -> Option<String> {
    let s = value.as_str()?.trim();
    if s.is_empty() || s.contains('<') || s.contains('>') {
        return None;
    }
    Some(s.to_string())
}

fn by_candidate_key(payload: Option<&Value>, _raw: &str) -> Option<String> {
    let obj = payload?.as_object()?;
    CANDIDATE_KEYS
        .iter()
        .find_map(|key| obj.get(*key).and_then(accept))
}

fn nested_items(payload: Option<&Value>, _raw: &str) -> Option<String> {
    payload?
        .get("items")?
        .as_array()?
        .iter()
        .find_map(from_value)
}

/// Second parse pass over the body text, limited to the outermost `{...}`.
fn reparse_raw_text(_payload: Option<&Value>, raw: &str) -> Option<String> {
    if !raw.contains("Token") {
        return None;
    }
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    let value: Value = serde_json::from_str(&raw[start..=end]).ok()?;
    from_value(&value)
}
