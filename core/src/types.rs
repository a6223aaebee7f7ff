//! Request/response value objects shared by every provider.

use serde::{Deserialize, Serialize};

/// One user turn handed to `chat_call` / `chat_stream`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatInput {
    pub mode: String,
    pub personal_name: Option<String>,
    pub text: String,
}

impl ChatInput {
    pub fn new(mode: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            mode: mode.into(),
            personal_name: None,
            text: text.into(),
        }
    }

    pub fn with_personal_name(mut self, name: impl Into<String>) -> Self {
        self.personal_name = Some(name.into());
        self
    }
}

/// Facial expression the avatar should show
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Expression {
    #[default]
    Neutral,
    Happy,
    Sad,
    Surprised,
}

impl Expression {
    pub const ALL: [&'static str; 4] = ["neutral", "happy", "sad", "surprised"];

    /// Unknown labels fall back to `Neutral`.
    pub fn from_label(label: &str) -> Self {
        match label.trim() {
            "happy" => Expression::Happy,
            "sad" => Expression::Sad,
            "surprised" => Expression::Surprised,
            _ => Expression::Neutral,
        }
    }
}

/// Body motion the avatar should play
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MotionId {
    Idle,
    Greeting,
    Cheer,
    Thinking,
}

impl MotionId {
    pub const ALL: [&'static str; 4] = ["idle", "greeting", "cheer", "thinking"];

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim() {
            "idle" => Some(MotionId::Idle),
            "greeting" => Some(MotionId::Greeting),
            "cheer" => Some(MotionId::Cheer),
            "thinking" => Some(MotionId::Thinking),
            _ => None,
        }
    }
}

/// Canonical cross-backend tool call: `{id, type:"function", function:{name, arguments}}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: ToolCallFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCallFunction {
    pub name: String,
    /// Arguments as JSON text, exactly as sent back to the backend
    pub arguments: String,
}

impl ToolCall {
    pub fn function(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: "function".to_string(),
            function: ToolCallFunction {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }
}

/// Final structured answer for one chat turn.
///
/// `tool_calls` always lists every call the model proposed during the turn,
/// including ones that were blocked or never executed, so callers can audit them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatResult {
    pub assistant_text: String,
    pub expression: Expression,
    pub motion_id: Option<MotionId>,
    pub tool_calls: Vec<ToolCall>,
}

impl ChatResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            assistant_text: text.into(),
            expression: Expression::Neutral,
            motion_id: None,
            tool_calls: Vec::new(),
        }
    }
}

/// One line of the conversation handed to the session summary task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptLine {
    pub role: String,
    pub text: String,
}

/// Narrow, non-conversational extraction request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum InnerTaskInput {
    ConsentDecision { text: String },
    MemoryExtract { text: String },
    SessionSummary { transcript: Vec<TranscriptLine> },
}

impl InnerTaskInput {
    pub fn task_name(&self) -> &'static str {
        match self {
            InnerTaskInput::ConsentDecision { .. } => "consent_decision",
            InnerTaskInput::MemoryExtract { .. } => "memory_extract",
            InnerTaskInput::SessionSummary { .. } => "session_summary",
        }
    }

    /// JSON text sent to the model as the user turn
    pub fn payload_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Single JSON text blob; validated before return for `session_summary`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InnerTaskResult {
    pub task: String,
    pub json_text: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    Unavailable,
}

/// Outcome of a health probe, serialised as `{"status":"ok"}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthReport {
    pub status: HealthStatus,
}

impl HealthReport {
    pub fn ok() -> Self {
        Self {
            status: HealthStatus::Ok,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            status: HealthStatus::Unavailable,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == HealthStatus::Ok
    }
}
