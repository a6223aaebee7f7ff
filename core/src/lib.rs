// Parley Core Library
// Structured chat over interchangeable LLM backends

pub mod cancel;
pub mod config;
pub mod factory;
pub mod pii;
pub mod prompt;
pub mod providers;
pub mod retry;
pub mod runtime_config;
pub mod sse;
pub mod structured;
pub mod tool_protocol;
pub mod tools;
pub mod transport;
pub mod types;

// Export core types
pub use config::{ProviderKind, ProviderSettings};
pub use factory::ProviderFactory;
pub use providers::{ChatStream, LlmProvider};
pub use runtime_config::{ChatRuntimeConfig, RuntimeConfigSource};
pub use types::{
    ChatInput, ChatResult, Expression, HealthReport, HealthStatus, InnerTaskInput,
    InnerTaskResult, MotionId, ToolCall,
};

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParleyError {
    #[error("config error: {0}")]
    Config(String),

    #[error("not configured: {0}")]
    NotConfigured(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("aborted: {0}")]
    Cancelled(String),

    #[error("timed out after {0}ms")]
    TimedOut(u64),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("retry_exhausted: {0}")]
    RetryExhausted(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ParleyError {
    /// Whether this failure was caused by cancellation (caller abort or deadline).
    ///
    /// Transports surface cancellation in different ways, so besides the
    /// dedicated variants any error whose message mentions "aborted" counts.
    /// Abort-like errors are never retried.
    pub fn is_abort_like(&self) -> bool {
        match self {
            ParleyError::Cancelled(_) | ParleyError::TimedOut(_) => true,
            ParleyError::Transport(msg) | ParleyError::Protocol(msg) => message_is_abort_like(msg),
            _ => false,
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            ParleyError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub(crate) fn message_is_abort_like(msg: &str) -> bool {
    // Covers "aborted", "The operation was aborted." and transport-specific wordings.
    msg.to_ascii_lowercase().contains("aborted")
}

pub type Result<T> = std::result::Result<T, ParleyError>;
