use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[non_exhaustive]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    NotFound(String),
    #[error("missing required argument `{param}` for tool `{tool}`")]
    MissingArgument { tool: String, param: String },
    #[error("unexpected argument `{param}` for tool `{tool}`")]
    UnexpectedArgument { tool: String, param: String },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("timeout after {0}ms")]
    Timeout(u64),
    #[error("execution failed: {0}")]
    Execution(String),
}
