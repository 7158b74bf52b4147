//! Helpers for pulling JSON out of free-form model output.

use serde_json::Value;

/// Strip a surrounding markdown code fence (```` ``` ```` or ```` ```json ````).
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json", "JSON", ...) on the opening fence line.
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

/// The first-`[` to last-`]` slice of `text`, if any.
pub fn extract_json_array(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse a list of strings from model output.
///
/// Accepts a bare array, a fenced array, or an array embedded in prose.
/// Object items contribute their `url` field. Returns `None` when no array
/// can be parsed.
pub fn parse_string_array(text: &str) -> Option<Vec<String>> {
    let stripped = strip_code_fences(text);
    let value: Value = serde_json::from_str(stripped)
        .ok()
        .filter(Value::is_array)
        .or_else(|| {
            extract_json_array(stripped).and_then(|slice| serde_json::from_str(slice).ok())
        })?;

    let items = value.as_array()?;
    Some(
        items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Object(map) => map
                    .get("url")
                    .and_then(Value::as_str)
                    .map(|s| s.trim().to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n[1, 2]\n```"), "[1, 2]");
        assert_eq!(strip_code_fences("```\n[\"a\"]\n```"), "[\"a\"]");
        assert_eq!(strip_code_fences("  [\"a\"]  "), "[\"a\"]");
    }

    #[test]
    fn test_extract_json_array() {
        assert_eq!(
            extract_json_array("Here you go: [\"a\", \"b\"] hope it helps"),
            Some("[\"a\", \"b\"]")
        );
        assert_eq!(extract_json_array("no array"), None);
        assert_eq!(extract_json_array("] backwards ["), None);
    }

    #[test]
    fn test_parse_string_array_variants() {
        let expected = vec!["https://a.org/1".to_string(), "https://b.org/2".to_string()];
        assert_eq!(
            parse_string_array(r#"["https://a.org/1", "https://b.org/2"]"#),
            Some(expected.clone())
        );
        assert_eq!(
            parse_string_array("```json\n[\"https://a.org/1\", \"https://b.org/2\"]\n```"),
            Some(expected.clone())
        );
        assert_eq!(
            parse_string_array(
                r#"Relevant: [{"url": "https://a.org/1"}, {"url": "https://b.org/2"}]."#
            ),
            Some(expected)
        );
    }

    #[test]
    fn test_parse_string_array_empty_and_invalid() {
        assert_eq!(parse_string_array("[]"), Some(vec![]));
        assert_eq!(parse_string_array("I could not decide."), None);
        assert_eq!(parse_string_array("{\"urls\": 3}"), None);
    }
}
