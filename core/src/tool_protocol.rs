//! Tool-call normalisation and follow-up message assembly.
//!
//! Backend payloads are loosely typed: arrays may not be arrays and parts may
//! be bare strings. Every reader here returns an empty or ignorable result for
//! unexpected shapes instead of failing the turn.

use std::collections::HashMap;

use serde_json::{json, Value};

use crate::tools::ToolMessage;
use crate::types::ToolCall;

/// Serialise tool arguments to JSON text; anything unusable degrades to `"{}"`.
pub fn serialize_args(args: Option<&Value>) -> String {
    match args {
        None | Some(Value::Null) => "{}".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(v) => serde_json::to_string(v).unwrap_or_else(|_| "{}".to_string()),
    }
}

/// Serialise Gemini `args` to JSON text. Gemini has no pre-encoded argument
/// strings, so a string value is encoded like any other JSON value.
pub fn serialize_gemini_args(args: Option<&Value>) -> String {
    match args {
        None | Some(Value::Null) => "{}".to_string(),
        Some(v) => serde_json::to_string(v).unwrap_or_else(|_| "{}".to_string()),
    }
}

fn clean_name(name: Option<&Value>) -> Option<String> {
    name.and_then(Value::as_str)
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}

/// Filter an OpenAI `message.tool_calls` array into canonical calls.
///
/// Entries without a non-blank `function.name` are dropped. Missing ids are
/// synthesised as `call_<n>` in encounter order.
pub fn coerce_openai_tool_calls(raw: Option<&Value>) -> Vec<ToolCall> {
    let Some(entries) = raw.and_then(Value::as_array) else {
        return Vec::new();
    };
    entries
        .iter()
        .enumerate()
        .filter_map(|(idx, entry)| {
            let function = entry.get("function")?;
            let name = clean_name(function.get("name"))?;
            let id = entry
                .get("id")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("call_{}", idx + 1));
            Some(ToolCall::function(
                id,
                name,
                serialize_args(function.get("arguments")),
            ))
        })
        .collect()
}

/// Collect Gemini function calls from a `generateContent` response.
///
/// Reads the top-level `functionCalls` array when present, otherwise
/// `candidates[0].content.parts[].functionCall`. Ids are `call_<n>`, counted
/// per response starting at 1.
pub fn coerce_gemini_tool_calls(response: &Value) -> Vec<ToolCall> {
    let raw: Vec<&Value> = match response.get("functionCalls").and_then(Value::as_array) {
        Some(calls) => calls.iter().collect(),
        None => gemini_parts(response)
            .iter()
            .filter_map(|part| part.get("functionCall"))
            .collect(),
    };
    raw.into_iter()
        .filter(|call| call.is_object())
        .filter_map(|call| {
            let name = clean_name(call.get("name"))?;
            Some((name, serialize_gemini_args(call.get("args"))))
        })
        .enumerate()
        .map(|(idx, (name, args))| ToolCall::function(format!("call_{}", idx + 1), name, args))
        .collect()
}

/// `candidates[0].content`, if it exists.
pub fn gemini_model_turn(response: &Value) -> Option<&Value> {
    response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .and_then(|c| c.get("content"))
        .filter(|c| !c.is_null())
}

/// `candidates[0].content.parts`, or empty for any other shape.
pub fn gemini_parts(response: &Value) -> &[Value] {
    gemini_model_turn(response)
        .and_then(|c| c.get("parts"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Concatenated `text` of the first candidate's parts.
pub fn gemini_text(response: &Value) -> Option<String> {
    let text: String = gemini_parts(response)
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

pub fn is_allowed(name: &str, allowlist: &[String]) -> bool {
    allowlist.iter().any(|a| a == name)
}

/// Split calls into (allowed, blocked) by tool name, keeping order.
pub fn partition_by_allowlist(
    calls: &[ToolCall],
    allowlist: &[String],
) -> (Vec<ToolCall>, Vec<ToolCall>) {
    calls
        .iter()
        .cloned()
        .partition(|c| is_allowed(c.name(), allowlist))
}

/// Assistant message echoing the calls, as OpenAI expects before tool results.
pub fn openai_assistant_tool_message(calls: &[ToolCall]) -> Value {
    json!({
        "role": "assistant",
        "content": null,
        "tool_calls": calls,
    })
}

/// Parse a tool message body; missing or unparsable content reads as `{ok:false}`.
pub fn parse_tool_result(message: Option<&ToolMessage>) -> Value {
    message
        .and_then(|m| serde_json::from_str::<Value>(&m.content).ok())
        .unwrap_or_else(|| json!({"ok": false}))
}

/// Exactly one tool message per call, in call order.
///
/// Results are matched by call id; a missing or unparsable result becomes
/// `{ok:false}` so the follow-up turn always answers every call.
pub fn complete_tool_messages(calls: &[ToolCall], messages: &[ToolMessage]) -> Vec<ToolMessage> {
    let by_id: HashMap<&str, &ToolMessage> = messages
        .iter()
        .map(|m| (m.tool_call_id.as_str(), m))
        .collect();
    calls
        .iter()
        .map(|call| {
            let result = parse_tool_result(by_id.get(call.id.as_str()).copied());
            ToolMessage::new(call.id.clone(), result.to_string())
        })
        .collect()
}

pub fn tool_not_allowed_response() -> Value {
    json!({"ok": false, "error": {"code": "tool_not_allowed"}})
}

/// One `functionResponse` part per proposed call, in proposal order.
///
/// Allowed calls carry the executor's result (matched by call id); blocked
/// calls get a synthetic `tool_not_allowed` response so the model sees a
/// coherent exchange.
pub fn gemini_function_response_parts(
    calls: &[ToolCall],
    allowlist: &[String],
    messages: &[ToolMessage],
) -> Vec<Value> {
    let by_id: HashMap<&str, &ToolMessage> = messages
        .iter()
        .map(|m| (m.tool_call_id.as_str(), m))
        .collect();
    calls
        .iter()
        .map(|call| {
            let response = if is_allowed(call.name(), allowlist) {
                parse_tool_result(by_id.get(call.id.as_str()).copied())
            } else {
                tool_not_allowed_response()
            };
            json!({
                "functionResponse": {
                    "name": call.name(),
                    "response": response,
                }
            })
        })
        .collect()
}

/// Drop `functionCall` parts whose name is not allowlisted from an echoed model turn.
///
/// A non-object turn, or one whose `parts` is missing or not an array, is
/// returned unchanged.
pub fn sanitize_model_turn(content: &Value, allowlist: &[String]) -> Value {
    let Some(obj) = content.as_object() else {
        return content.clone();
    };
    let Some(parts) = obj.get("parts").and_then(Value::as_array) else {
        return content.clone();
    };
    let kept: Vec<Value> = parts
        .iter()
        .filter(|part| match part.get("functionCall") {
            Some(call) => call
                .get("name")
                .and_then(Value::as_str)
                .map(|n| is_allowed(n.trim(), allowlist))
                .unwrap_or(false),
            None => true,
        })
        .cloned()
        .collect();
    let mut sanitized = obj.clone();
    sanitized.insert("parts".to_string(), Value::Array(kept));
    Value::Object(sanitized)
}
