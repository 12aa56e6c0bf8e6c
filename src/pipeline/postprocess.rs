//! Post-processing: turn raw model text into JSON values.
//!
//! Models are asked for bare JSON but regularly wrap it in ```json fences,
//! prefix a sentence ("Here is the data:"), or leave a BOM in front. These
//! rules recover the JSON payload without touching its content. Anything
//! that is still not JSON after them is reported as unparseable by the
//! caller; no attempt is made to repair broken JSON.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

// ── Rule 1: Strip invisible characters ──────────────────────────────────────

static RE_INVISIBLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\u{FEFF}\u{200B}\u{200C}\u{200D}\u{2060}]").unwrap());

fn remove_invisible_chars(input: &str) -> String {
    RE_INVISIBLE.replace_all(input, "").to_string()
}

// ── Rule 2: Strip code fences ───────────────────────────────────────────────

static RE_FENCED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)\r?\n?```").unwrap());

/// Return the body of the first fenced block, or the trimmed input.
pub fn strip_code_fences(input: &str) -> String {
    match RE_FENCED.captures(input) {
        Some(caps) => caps[1].trim().to_string(),
        None => input.trim().to_string(),
    }
}

// ── Rule 3: Locate the JSON payload ─────────────────────────────────────────

/// Parse the JSON value carried by a model answer.
///
/// Tries the cleaned text as a whole first, then the span from the first
/// `{` or `[` to the last matching closer.
pub fn extract_json(input: &str) -> Option<Value> {
    let cleaned = strip_code_fences(&remove_invisible_chars(input));
    if let Ok(v) = serde_json::from_str::<Value>(&cleaned) {
        return Some(v);
    }

    let start = cleaned.find(['{', '['])?;
    let closer = if cleaned[start..].starts_with('{') { '}' } else { ']' };
    let end = cleaned.rfind(closer)?;
    if end <= start {
        return None;
    }
    let candidate = &cleaned[start..=end];
    match serde_json::from_str::<Value>(candidate) {
        Ok(v) => {
            debug!("Recovered JSON from surrounding prose ({} bytes)", candidate.len());
            Some(v)
        }
        Err(_) => None,
    }
}

// ── Identification answers ──────────────────────────────────────────────────

/// Page numbers from an identification answer.
///
/// Accepts `{"found": .., "page_numbers": [..]}` or a bare array. Elements
/// may be integers or numeric strings. `found: false` yields an empty list
/// whatever `page_numbers` holds. Returns `None` for any other shape.
///
/// Numbers are returned as-is (unsorted, possibly out of range); range
/// clipping belongs to the caller, which knows the page count.
pub fn parse_page_numbers(input: &str) -> Option<Vec<usize>> {
    match extract_json(input)? {
        Value::Array(items) => numbers(&items),
        Value::Object(obj) => {
            if obj.get("found").and_then(Value::as_bool) == Some(false) {
                return Some(Vec::new());
            }
            match obj.get("page_numbers")? {
                Value::Array(items) => numbers(items),
                Value::Null => Some(Vec::new()),
                _ => None,
            }
        }
        _ => None,
    }
}

fn numbers(items: &[Value]) -> Option<Vec<usize>> {
    items.iter().map(page_number).collect()
}

/// Negative values map to 0 so range clipping discards them.
fn page_number(v: &Value) -> Option<usize> {
    match v {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Some(u as usize)
            } else if n.as_i64().is_some() {
                Some(0)
            } else {
                let f = n.as_f64()?;
                (f.fract() == 0.0).then_some(f.max(0.0) as usize)
            }
        }
        Value::String(s) => s.trim().parse::<usize>().ok(),
        _ => None,
    }
}

// ── Extraction answers ──────────────────────────────────────────────────────

/// The JSON object of an extraction answer, or `None` if the answer is not
/// a JSON object.
pub fn parse_record(input: &str) -> Option<Value> {
    extract_json(input).filter(Value::is_object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_json_fence() {
        let raw = "```json\n{\"a\": 1}\n```";
        assert_eq!(strip_code_fences(raw), "{\"a\": 1}");
    }

    #[test]
    fn strips_bare_fence_with_prose_around() {
        let raw = "Here you go:\n```\n[1, 2]\n```\nHope that helps.";
        assert_eq!(strip_code_fences(raw), "[1, 2]");
    }

    #[test]
    fn unfenced_text_passes_through() {
        assert_eq!(strip_code_fences("  {\"a\":1}\n"), "{\"a\":1}");
    }

    #[test]
    fn recovers_json_from_prose() {
        let v = extract_json("Sure! The result is {\"found\": true, \"page_numbers\": [4]} as requested.");
        assert_eq!(v, Some(json!({"found": true, "page_numbers": [4]})));
    }

    #[test]
    fn bom_is_ignored() {
        assert_eq!(extract_json("\u{FEFF}[3]"), Some(json!([3])));
    }

    #[test]
    fn page_numbers_object_form() {
        let raw = r#"```json
{"found": true, "page_numbers": [7, 3, 3], "description": "CMS tables"}
```"#;
        assert_eq!(parse_page_numbers(raw), Some(vec![7, 3, 3]));
    }

    #[test]
    fn page_numbers_not_found() {
        let raw = r#"{"found": false, "page_numbers": [2], "description": "none"}"#;
        assert_eq!(parse_page_numbers(raw), Some(vec![]));
        let raw = r#"{"found": false}"#;
        assert_eq!(parse_page_numbers(raw), Some(vec![]));
    }

    #[test]
    fn page_numbers_bare_array_and_strings() {
        assert_eq!(parse_page_numbers("[5, \"6\", 7.0]"), Some(vec![5, 6, 7]));
    }

    #[test]
    fn negative_page_becomes_zero() {
        assert_eq!(parse_page_numbers("[-2, 1]"), Some(vec![0, 1]));
    }

    #[test]
    fn page_numbers_garbage_is_none() {
        assert_eq!(parse_page_numbers("I could not find the section."), None);
        assert_eq!(parse_page_numbers(r#"{"found": true}"#), None);
        assert_eq!(parse_page_numbers(r#"["three"]"#), None);
        assert_eq!(parse_page_numbers(r#"{"page_numbers": "3"}"#), None);
        assert_eq!(parse_page_numbers("42"), None);
    }

    #[test]
    fn record_must_be_object() {
        assert_eq!(
            parse_record("```json\n{\"machinery_systems\": []}\n```"),
            Some(json!({"machinery_systems": []}))
        );
        assert_eq!(parse_record("[1, 2]"), None);
        assert_eq!(parse_record("{\"machinery_systems\": [}"), None);
    }
}
