//! Locating, repairing, and redacting the `<obs>` block in generated text.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

/// Opening delimiter of the embedded observation block.
pub const OPEN_TAG: &str = "<obs>";
/// Closing delimiter of the embedded observation block.
pub const CLOSE_TAG: &str = "</obs>";

static CLOSED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<obs>\s*(.*?)\s*</obs>").expect("closed block regex"));

// Generators sometimes stop before the closing tag; take everything after the
// opening tag in that case.
static OPEN_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<obs>\s*(.*)\z").expect("open block regex"));

static ANY_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<obs>.*?(?:</obs>|\z)").expect("strip regex"));

static TRAILING_COMMA_OBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",\s*\}").expect("object comma regex"));

static TRAILING_COMMA_ARRAY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",\s*\]").expect("array comma regex"));

/// Return the trimmed payload of the first observation block, if any.
///
/// A properly closed block takes precedence. An empty payload counts as no
/// block at all.
pub fn extract_block(response: &str) -> Option<&str> {
    let payload = CLOSED_BLOCK
        .captures(response)
        .or_else(|| OPEN_BLOCK.captures(response))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())?;

    if payload.is_empty() {
        None
    } else {
        Some(payload)
    }
}

/// Remove the first observation block (closed or truncated) and any trailing
/// whitespace, so the end user never sees the payload.
///
/// Text without an opening delimiter is returned unchanged.
pub fn strip_observation_block(response: &str) -> String {
    if !response.contains(OPEN_TAG) {
        return response.to_string();
    }
    ANY_BLOCK.replace(response, "").trim_end().to_string()
}

/// Drop commas that directly precede a closing brace or bracket.
pub fn strip_trailing_commas(raw: &str) -> String {
    let fixed = TRAILING_COMMA_OBJECT.replace_all(raw, "}");
    TRAILING_COMMA_ARRAY.replace_all(&fixed, "]").into_owned()
}

/// Decode a payload into a JSON object, trying progressively looser readings:
/// strict, trailing commas removed, then wrapped in braces.
///
/// Returns `None` when every attempt fails or the payload is not an object.
pub fn decode_payload(raw: &str) -> Option<Map<String, Value>> {
    let value = serde_json::from_str::<Value>(raw)
        .or_else(|_| {
            let repaired = strip_trailing_commas(raw);
            serde_json::from_str::<Value>(&repaired)
                .or_else(|_| serde_json::from_str::<Value>(&format!("{{{repaired}}}")))
        })
        .ok()?;

    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}
