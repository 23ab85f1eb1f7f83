//! JSON extraction utilities for the flowbuild orchestrator.
//!
//! The execution service reports per-output build logs as loosely shaped JSON:
//! a log message may be a bare string, an object carrying one of several
//! error-text keys, or an array of either. These helpers pull human-readable
//! text out of those payloads without committing the wire DTOs to a rigid
//! schema.

use serde_json::Value;

/// Keys that carry error text in a log message object, in preference order.
const ERROR_TEXT_KEYS: &[&str] = &["errorMessage", "error", "message", "text", "detail"];

/// First string found under any of `keys` in a JSON object.
#[must_use]
pub fn string_at<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    let object = value.as_object()?;
    keys.iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
}

/// Collect every piece of human-readable error text from a log payload.
///
/// Strings are taken verbatim; objects contribute their first recognized
/// error-text key; arrays recurse. Anything else falls back to compact JSON
/// so an unrecognized payload still surfaces rather than vanishing.
///
/// # Examples
///
/// ```rust
/// use flowbuild::utils::json_ext::collect_error_text;
/// use serde_json::json;
///
/// let mut out = Vec::new();
/// collect_error_text(
///     &json!([{"errorMessage": "boom", "stackTrace": "..."}, "also bad"]),
///     &mut out,
/// );
/// assert_eq!(out, vec!["boom".to_string(), "also bad".to_string()]);
/// ```
pub fn collect_error_text(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(text) => out.push(text.clone()),
        Value::Array(items) => {
            for item in items {
                collect_error_text(item, out);
            }
        }
        Value::Object(_) => {
            if let Some(text) = string_at(value, ERROR_TEXT_KEYS) {
                out.push(text.to_string());
            } else {
                out.push(value.to_string());
            }
        }
        Value::Null => {}
        other => out.push(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prefers_error_message_key() {
        let payload = json!({"message": "secondary", "errorMessage": "primary"});
        let mut out = Vec::new();
        collect_error_text(&payload, &mut out);
        assert_eq!(out, vec!["primary".to_string()]);
    }

    #[test]
    fn unknown_objects_fall_back_to_compact_json() {
        let payload = json!({"code": 7});
        let mut out = Vec::new();
        collect_error_text(&payload, &mut out);
        assert_eq!(out, vec![r#"{"code":7}"#.to_string()]);
    }

    #[test]
    fn null_contributes_nothing() {
        let mut out = Vec::new();
        collect_error_text(&Value::Null, &mut out);
        assert!(out.is_empty());
    }
}
