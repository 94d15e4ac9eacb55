//! MCP tool server that wraps a REST API.
//!
//! Each tool in the route table maps to one HTTP endpoint. The bridge is a
//! [`mcp::ToolHandler`], so it can be served over stdio with
//! [`mcp::serve_stdio`].

pub mod bridge;
pub mod config;

pub use bridge::{Bridge, CallError, Prepared};
pub use config::{AuthConfig, ConfigError, HttpMethod, Route, RouteConfig};
