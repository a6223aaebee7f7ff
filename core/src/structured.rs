//! Structured-output extraction and validation.
//!
//! Models are asked for JSON but frequently wrap it in code fences or prose.
//! Chat answers are normalised leniently; session summaries are validated
//! strictly and never fall back to a best-effort value.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::pii::PiiMasker;
use crate::types::{ChatResult, Expression, MotionId};
use crate::{ParleyError, Result};

pub const TITLE_MAX_CHARS: usize = 60;
pub const SUMMARY_MAX_CHARS: usize = 400;
pub const TOPIC_MAX_CHARS: usize = 40;
pub const STAFF_NOTE_MAX_CHARS: usize = 80;
pub const MAX_LIST_ITEMS: usize = 5;

/// Return the text of the first balanced top-level `{...}` object.
///
/// A single outer Markdown fence (```` ```json ```` or bare ```` ``` ````) is
/// stripped first. Braces inside string literals, including escaped quotes,
/// do not affect the depth count.
pub fn extract_first_json_object_text(text: &str) -> Option<String> {
    let body = strip_code_fence(text);
    let start = body.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in body[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + ch.len_utf8();
                    return Some(body[start..end].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json", "JSON", or nothing) up to the first newline
    let rest = match rest.find('\n') {
        Some(nl) => &rest[nl + 1..],
        None => rest,
    };
    rest.trim_end()
        .strip_suffix("```")
        .unwrap_or(rest)
        .trim()
}

/// Keep at most `max` characters (not bytes).
pub fn clamp_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Parse the model's final JSON answer into a [`ChatResult`] without tool calls.
///
/// `assistant_text` is required; unknown expressions become `neutral` and
/// unknown motions become `None`. A `max_output_chars` of 0 disables clamping.
pub fn parse_chat_result(text: &str, max_output_chars: usize) -> Result<ChatResult> {
    let json_text = extract_first_json_object_text(text)
        .ok_or_else(|| ParleyError::Protocol("no JSON object in model output".into()))?;
    let value: Value = serde_json::from_str(&json_text)
        .map_err(|e| ParleyError::Protocol(format!("invalid JSON in model output: {e}")))?;

    let assistant_text = value
        .get("assistant_text")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ParleyError::Protocol("missing assistant_text".into()))?;
    let assistant_text = if max_output_chars > 0 {
        clamp_chars(assistant_text, max_output_chars)
    } else {
        assistant_text.to_string()
    };

    let expression = value
        .get("expression")
        .and_then(Value::as_str)
        .map(Expression::from_label)
        .unwrap_or_default();
    let motion_id = value
        .get("motion_id")
        .and_then(Value::as_str)
        .and_then(MotionId::from_label);

    Ok(ChatResult {
        assistant_text,
        expression,
        motion_id,
        tool_calls: Vec::new(),
    })
}

/// Validated `session_summary` inner-task result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSummary {
    pub task: String,
    pub title: String,
    pub summary_json: SummaryBody,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummaryBody {
    pub summary: String,
    pub topics: Vec<String>,
    pub staff_notes: Vec<String>,
}

/// Strictly parse, mask, trim and clamp a session summary.
///
/// Exact key sets are required at both levels. Any violation, including a
/// field that is empty after normalisation, is a `Validation` error.
pub fn parse_and_normalize_session_summary(
    text: &str,
    masker: &dyn PiiMasker,
) -> Result<SessionSummary> {
    let json_text = extract_first_json_object_text(text)
        .ok_or_else(|| invalid("no JSON object found"))?;
    let value: Value =
        serde_json::from_str(&json_text).map_err(|e| invalid(&format!("unparsable JSON: {e}")))?;

    let root = value.as_object().ok_or_else(|| invalid("root is not an object"))?;
    require_exact_keys(root, &["task", "title", "summary_json"], "root")?;
    if root.get("task").and_then(Value::as_str) != Some("session_summary") {
        return Err(invalid("task must be \"session_summary\""));
    }
    let title = root
        .get("title")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("title must be a string"))?;

    let body = root
        .get("summary_json")
        .and_then(Value::as_object)
        .ok_or_else(|| invalid("summary_json must be an object"))?;
    require_exact_keys(body, &["summary", "topics", "staff_notes"], "summary_json")?;
    let summary = body
        .get("summary")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("summary must be a string"))?;
    let topics = string_array(body.get("topics"), "topics")?;
    let staff_notes = string_array(body.get("staff_notes"), "staff_notes")?;

    let title = normalize_field(title, TITLE_MAX_CHARS, masker);
    if title.is_empty() {
        return Err(invalid("title is empty"));
    }
    let summary = normalize_field(summary, SUMMARY_MAX_CHARS, masker);
    if summary.is_empty() {
        return Err(invalid("summary is empty"));
    }
    let topics = normalize_list(topics, TOPIC_MAX_CHARS, masker, "topics")?;
    let staff_notes = normalize_list(staff_notes, STAFF_NOTE_MAX_CHARS, masker, "staff_notes")?;

    Ok(SessionSummary {
        task: "session_summary".to_string(),
        title,
        summary_json: SummaryBody {
            summary,
            topics,
            staff_notes,
        },
    })
}

fn invalid(msg: &str) -> ParleyError {
    ParleyError::Validation(format!("session_summary: {msg}"))
}

fn require_exact_keys(obj: &Map<String, Value>, keys: &[&str], what: &str) -> Result<()> {
    let exact = obj.len() == keys.len() && keys.iter().all(|k| obj.contains_key(*k));
    if exact {
        Ok(())
    } else {
        let mut found: Vec<&str> = obj.keys().map(String::as_str).collect();
        found.sort_unstable();
        Err(invalid(&format!(
            "{what} keys must be exactly {keys:?}, got {found:?}"
        )))
    }
}

fn string_array<'a>(value: Option<&'a Value>, what: &str) -> Result<Vec<&'a str>> {
    let items = value
        .and_then(Value::as_array)
        .ok_or_else(|| invalid(&format!("{what} must be an array")))?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .ok_or_else(|| invalid(&format!("{what} must contain only strings")))
        })
        .collect()
}

fn normalize_field(text: &str, max: usize, masker: &dyn PiiMasker) -> String {
    let masked = masker.mask(text);
    clamp_chars(masked.trim(), max).trim_end().to_string()
}

fn normalize_list(
    items: Vec<&str>,
    max: usize,
    masker: &dyn PiiMasker,
    what: &str,
) -> Result<Vec<String>> {
    items
        .into_iter()
        .take(MAX_LIST_ITEMS)
        .map(|item| {
            let normalized = normalize_field(item, max, masker);
            if normalized.is_empty() {
                Err(invalid(&format!("{what} contains an empty entry")))
            } else {
                Ok(normalized)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fence_stripping() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n{\"a\":1}```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  {\"a\":1}  "), "{\"a\":1}");
    }

    #[test]
    fn braces_in_strings_are_ignored() {
        let text = r#"prefix {"a":"}{\"}","b":{"c":2}} trailing {"x":1}"#;
        assert_eq!(
            extract_first_json_object_text(text).as_deref(),
            Some(r#"{"a":"}{\"}","b":{"c":2}}"#)
        );
    }

    #[test]
    fn unbalanced_object_yields_none() {
        assert_eq!(extract_first_json_object_text("{\"a\": 1"), None);
        assert_eq!(extract_first_json_object_text("no json here"), None);
    }

    #[test]
    fn clamp_counts_characters() {
        assert_eq!(clamp_chars("こんにちは", 3), "こんに");
    }
}
