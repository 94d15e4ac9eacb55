//! Tool execution and MCP integration.

mod empty;
pub mod errors;
mod mcp_provider;
mod provider;

pub use empty::EmptyToolProvider;
pub use errors::ToolError;
pub use mcp_provider::McpToolProvider;
pub use provider::{ToolProvider, validate_call};
