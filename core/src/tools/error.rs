use serde_json::{json, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timeout")]
    Timeout,
}

impl ToolError {
    /// Stable code placed in `{ok:false,error:{code}}` tool results
    pub fn code(&self) -> &'static str {
        match self {
            ToolError::UnknownTool(_) => "unknown_tool",
            ToolError::InvalidArguments(_) => "invalid_arguments",
            ToolError::Upstream(_) => "upstream_error",
            ToolError::NotFound(_) => "not_found",
            ToolError::Timeout => "timeout",
        }
    }

    pub fn to_result_json(&self) -> Value {
        json!({
            "ok": false,
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        })
    }
}

pub type ToolResult<T> = Result<T, ToolError>;
