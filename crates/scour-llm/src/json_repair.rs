//! Repair cascade for model-emitted JSON: strip markdown fences, slice to
//! the outermost object or array, drop trailing commas, then parse. Models
//! love to wrap JSON in prose and fences; rejecting that outright would
//! waste an otherwise good completion.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*\}|\[.*\])\s*```").unwrap());
static TRAILING_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r",\s*([}\]])").unwrap());

/// Run the repair cascade. Errors carry a short description for the retry
/// log; the result is always an object or array, never a bare scalar.
pub fn repair_and_parse(raw: &str) -> Result<Value, String> {
    let mut candidate = raw;

    if let Some(caps) = FENCE.captures(candidate) {
        candidate = caps.get(1).map(|m| m.as_str()).unwrap_or(candidate);
    }

    let sliced = slice_to_outer_json(candidate).ok_or("no JSON object found")?;
    let cleaned = TRAILING_COMMA.replace_all(sliced, "$1");

    let parsed: Value =
        serde_json::from_str(&cleaned).map_err(|e| format!("invalid JSON after repair: {e}"))?;
    if !parsed.is_object() && !parsed.is_array() {
        return Err("parsed JSON is not an object or array".into());
    }
    Ok(parsed)
}

/// Find the first `{` or `[` and slice to the last matching close bracket.
fn slice_to_outer_json(text: &str) -> Option<&str> {
    let first_brace = text.find('{');
    let first_bracket = text.find('[');

    let (start, close) = match (first_brace, first_bracket) {
        (Some(b), Some(k)) if b < k => (b, '}'),
        (Some(b), None) => (b, '}'),
        (_, Some(k)) => (k, ']'),
        (None, None) => return None,
    };

    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clean_json_passes_through() {
        assert_eq!(repair_and_parse(r#"{"a": 1}"#).unwrap(), json!({"a": 1}));
        assert_eq!(repair_and_parse(r#"[1, 2]"#).unwrap(), json!([1, 2]));
    }

    #[test]
    fn fenced_json_with_prose_and_trailing_comma() {
        let raw = "prefix ```json\n[\"a\", \"b\",]\n``` suffix";
        assert_eq!(repair_and_parse(raw).unwrap(), json!(["a", "b"]));
    }

    #[test]
    fn prose_wrapped_object() {
        let raw = "Sure! Here is the result: {\"queries\": [\"x\", \"y\"]} hope that helps";
        assert_eq!(
            repair_and_parse(raw).unwrap(),
            json!({"queries": ["x", "y"]})
        );
    }

    #[test]
    fn trailing_commas_inside_nested_structures() {
        let raw = r#"{"a": [1, 2,], "b": {"c": 3,},}"#;
        assert_eq!(
            repair_and_parse(raw).unwrap(),
            json!({"a": [1, 2], "b": {"c": 3}})
        );
    }

    #[test]
    fn scalars_and_garbage_are_rejected() {
        assert!(repair_and_parse("42").is_err());
        assert!(repair_and_parse("\"just a string\"").is_err());
        assert!(repair_and_parse("no json here at all").is_err());
        assert!(repair_and_parse("{unbalanced").is_err());
    }

    #[test]
    fn object_before_array_wins() {
        let raw = "{\"k\": [1, 2]} trailing [3]";
        // First '{' precedes first '['; the slice runs to the LAST '}'.
        assert_eq!(repair_and_parse(raw).unwrap(), json!({"k": [1, 2]}));
    }
}
