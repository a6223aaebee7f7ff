use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::ToolResult;
use crate::transport::HttpTransport;
use crate::types::ToolCall;

/// Result of one executed call, shaped as an OpenAI `role:"tool"` message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolMessage {
    pub role: String,
    pub tool_call_id: String,
    /// JSON text
    pub content: String,
}

impl ToolMessage {
    pub fn new(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            tool_call_id: tool_call_id.into(),
            content: content.into(),
        }
    }
}

/// Batch of calls to run, with the transport and time budget to use
#[derive(Clone)]
pub struct ToolExecutionRequest {
    pub tool_calls: Vec<ToolCall>,
    pub transport: Arc<dyn HttpTransport>,
    pub timeout: Duration,
}

/// Runs model-proposed tool calls.
///
/// Implementations must return one message per submitted call. Callers treat
/// a missing or unparsable message as `{ok:false}`.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, request: ToolExecutionRequest) -> ToolResult<Vec<ToolMessage>>;
}
