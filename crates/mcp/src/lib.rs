//! MCP (Model Context Protocol) plumbing over stdio.
//!
//! This crate covers both ends of the stdio transport:
//!
//! - [`Server`] spawns an MCP server process and talks to it as a client.
//! - [`serve`] runs the server side for any [`ToolHandler`].
//!
//! # Example
//!
//! ```no_run
//! use mcp::{Server, ServerConfig};
//! use std::collections::HashMap;
//!
//! # async fn example() -> mcp::Result<()> {
//! let config = ServerConfig {
//!     name: "papers".to_string(),
//!     command: "tether-openapi".to_string(),
//!     args: vec!["--config".to_string(), "routes.toml".to_string()],
//!     env: HashMap::new(),
//! };
//!
//! let server = Server::spawn(config).await?;
//! server.initialize().await?;
//!
//! for tool in server.tools().await {
//!     println!("Tool: {}", tool.name);
//! }
//!
//! let result = server.call_tool("search_papers", Some(serde_json::json!({
//!     "query": "quantum computing"
//! }))).await?;
//! println!("{}", result.joined_text());
//!
//! server.shutdown().await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod protocol;
pub mod serve;
mod server;

pub use error::{Error, Result};
pub use protocol::{
    CallToolParams, CallToolResult, Implementation, InitializeParams, InitializeResult,
    JsonRpcError, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, ListToolsResult,
    PROTOCOL_VERSION, RequestId, ServerCapabilities, Tool, ToolContent, ToolsCapability, codes,
};
pub use serve::{ToolHandler, serve, serve_stdio};
pub use server::{DEFAULT_TIMEOUT, MAX_OUTPUT_SIZE, Server, ServerConfig};
