pub mod error;
pub mod traits;
pub mod weather;

// Re-export common types
pub use error::{ToolError, ToolResult};
pub use traits::{ToolExecutionRequest, ToolExecutor, ToolMessage};
pub use weather::{WeatherConfig, WeatherToolExecutor};
