//! System instructions, tool catalog and response schemas.

use serde_json::{json, Value};

use crate::tools::weather::WEATHER_TOOL_NAME;
use crate::types::{ChatInput, Expression, InnerTaskInput, MotionId};

/// Returned when the model keeps asking for tools after the follow-up round
pub const TOOL_FALLBACK_TEXT: &str = "ちょっと調べてみるね";

const SAFETY_RULES: &str = "\
Safety rules:
- Never ask for or repeat phone numbers, email addresses or other personal data.
- Do not give medical, legal or financial advice; suggest asking staff instead.
- If the request is inappropriate, politely decline.";

const MOTION_RULES: &str = "\
motion_id decision rule:
- greeting or farewell → \"greeting\"
- celebration, or the user asks you to dance → \"cheer\"
- you need to think or deliberate → \"thinking\"
- otherwise → \"idle\" or null";

/// System message for `chat_call`: JSON-only output plus motion rules.
pub fn chat_system_prompt(persona: &str) -> String {
    format!(
        "{persona}\n\n\
Output format:\n\
Reply with a single JSON object and nothing else:\n\
{{\"assistant_text\": string, \"expression\": one of {expressions:?}, \"motion_id\": one of {motions:?} or null}}\n\
Use the get_weather tool when the user asks about the weather.\n\n\
{MOTION_RULES}\n\n{SAFETY_RULES}",
        expressions = Expression::ALL,
        motions = MotionId::ALL,
    )
}

/// System message for `chat_stream`: plain natural language, no JSON or tools.
pub fn stream_system_prompt(persona: &str) -> String {
    format!(
        "{persona}\n\n\
Output format:\n\
Reply in plain natural language only. Do not output JSON, markup or tool calls.\n\n\
{SAFETY_RULES}"
    )
}

/// User turn carrying `{mode, personal_name, text}` as JSON text
pub fn user_payload(input: &ChatInput) -> String {
    json!({
        "mode": input.mode,
        "personal_name": input.personal_name,
        "text": input.text,
    })
    .to_string()
}

fn weather_parameters() -> Value {
    json!({
        "type": "object",
        "properties": {
            "location": {
                "type": "string",
                "description": "City name or location (e.g. '東京', 'Osaka')"
            }
        },
        "required": ["location"]
    })
}

const WEATHER_DESCRIPTION: &str = "Get current weather information for a location";

/// Tool catalog in chat-completions form
pub fn openai_tools() -> Vec<Value> {
    vec![json!({
        "type": "function",
        "function": {
            "name": WEATHER_TOOL_NAME,
            "description": WEATHER_DESCRIPTION,
            "parameters": weather_parameters(),
        }
    })]
}

/// Tool catalog in Gemini `functionDeclarations` form
pub fn gemini_tools() -> Vec<Value> {
    vec![json!({
        "functionDeclarations": [{
            "name": WEATHER_TOOL_NAME,
            "description": WEATHER_DESCRIPTION,
            "parameters": weather_parameters(),
        }]
    })]
}

/// Response schema for Gemini chat answers
pub fn chat_response_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "assistant_text": {"type": "string"},
            "expression": {"type": "string", "enum": Expression::ALL},
            "motion_id": {"type": "string", "enum": MotionId::ALL, "nullable": true}
        },
        "required": ["assistant_text", "expression"]
    })
}

/// System instruction for an inner task
pub fn inner_task_instruction(input: &InnerTaskInput) -> String {
    let body = match input {
        InnerTaskInput::ConsentDecision { .. } => {
            "Decide whether the user's utterance grants consent.\n\
Return exactly {\"task\":\"consent_decision\",\"decision\":\"yes\"|\"no\"|\"unknown\"}."
        }
        InnerTaskInput::MemoryExtract { .. } => {
            "Extract facts worth remembering about the user (preferences, plans). \
Never extract phone numbers, email addresses or other personal identifiers.\n\
Return exactly {\"task\":\"memory_extract\",\"candidates\":[{\"key\":string,\"value\":string}]}."
        }
        InnerTaskInput::SessionSummary { .. } => {
            "Summarise the conversation for staff. Do not include personal data.\n\
Return exactly {\"task\":\"session_summary\",\"title\":string,\
\"summary_json\":{\"summary\":string,\"topics\":[string],\"staff_notes\":[string]}}.\n\
title ≤ 60 chars, summary ≤ 400 chars, at most 5 topics (≤ 40 chars each), \
at most 5 staff_notes (≤ 80 chars each). No other keys."
        }
    };
    format!("You are a JSON extraction engine. Output JSON only, no prose.\n{body}")
}

/// Gemini response schema for an inner task
pub fn inner_task_schema(input: &InnerTaskInput) -> Value {
    match input {
        InnerTaskInput::ConsentDecision { .. } => json!({
            "type": "object",
            "properties": {
                "task": {"type": "string", "enum": ["consent_decision"]},
                "decision": {"type": "string", "enum": ["yes", "no", "unknown"]}
            },
            "required": ["task", "decision"]
        }),
        InnerTaskInput::MemoryExtract { .. } => json!({
            "type": "object",
            "properties": {
                "task": {"type": "string", "enum": ["memory_extract"]},
                "candidates": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "key": {"type": "string"},
                            "value": {"type": "string"}
                        },
                        "required": ["key", "value"]
                    }
                }
            },
            "required": ["task", "candidates"]
        }),
        InnerTaskInput::SessionSummary { .. } => json!({
            "type": "object",
            "properties": {
                "task": {"type": "string", "enum": ["session_summary"]},
                "title": {"type": "string"},
                "summary_json": {
                    "type": "object",
                    "properties": {
                        "summary": {"type": "string"},
                        "topics": {"type": "array", "items": {"type": "string"}},
                        "staff_notes": {"type": "array", "items": {"type": "string"}}
                    },
                    "required": ["summary", "topics", "staff_notes"]
                }
            },
            "required": ["task", "title", "summary_json"]
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_prompt_carries_persona_and_rules() {
        let p = chat_system_prompt("PERSONA");
        assert!(p.starts_with("PERSONA"));
        assert!(p.contains("assistant_text"));
        assert!(p.contains("\"cheer\""));
        assert!(!stream_system_prompt("PERSONA").contains("motion_id"));
    }

    #[test]
    fn user_payload_is_json() {
        let input = ChatInput::new("reception", "こんにちは").with_personal_name("佐藤");
        let v: Value = serde_json::from_str(&user_payload(&input)).unwrap();
        assert_eq!(v["mode"], "reception");
        assert_eq!(v["personal_name"], "佐藤");
    }
}
