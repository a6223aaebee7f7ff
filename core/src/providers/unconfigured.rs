use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{ChatStream, LlmProvider};
use crate::types::{ChatInput, ChatResult, HealthReport, InnerTaskInput, InnerTaskResult};
use crate::{ParleyError, Result};

/// Stand-in for a backend whose required settings are missing.
///
/// Construction never fails; every operation rejects with `NotConfigured`
/// and health reports `unavailable`.
#[derive(Debug, Clone)]
pub struct UnconfiguredProvider {
    kind: &'static str,
    reason: String,
}

impl UnconfiguredProvider {
    pub fn new(kind: &'static str, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    fn reject(&self) -> ParleyError {
        ParleyError::NotConfigured(format!("{}: {}", self.kind, self.reason))
    }
}

#[async_trait]
impl LlmProvider for UnconfiguredProvider {
    fn name(&self) -> &'static str {
        self.kind
    }

    async fn chat_call(&self, _input: ChatInput) -> Result<ChatResult> {
        Err(self.reject())
    }

    async fn chat_stream(
        &self,
        _input: ChatInput,
        _cancel: Option<CancellationToken>,
    ) -> Result<ChatStream> {
        Err(self.reject())
    }

    async fn inner_task_call(&self, _input: InnerTaskInput) -> Result<InnerTaskResult> {
        Err(self.reject())
    }

    async fn health(&self) -> HealthReport {
        HealthReport::unavailable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_operation_rejects() {
        let p = UnconfiguredProvider::new("gemini_native", "missing GEMINI_API_KEY");
        let err = p.chat_call(ChatInput::new("m", "hi")).await.unwrap_err();
        assert!(err.to_string().starts_with("not configured"));
        assert!(err.to_string().contains("GEMINI_API_KEY"));
        assert!(p
            .inner_task_call(InnerTaskInput::ConsentDecision { text: "はい".into() })
            .await
            .is_err());
        assert!(p.chat_stream(ChatInput::new("m", "hi"), None).await.is_err());
        assert!(!p.supports_streaming());
        assert!(!p.health().await.is_ok());
    }
}
