//! MCP-backed tool provider.

use std::collections::HashSet;
use std::time::Duration;

use mcp::{Server, ServerConfig, ToolContent};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{ToolError, ToolProvider};
use crate::model::ToolSpec;

/// Tool provider backed by an MCP server process.
pub struct McpToolProvider {
    server: Server,
    specs: Vec<ToolSpec>,
    timeout: Duration,
}

impl McpToolProvider {
    /// Spawn the server, complete the handshake and cache its tool specs.
    pub async fn spawn(config: ServerConfig) -> Result<Self, mcp::Error> {
        Self::spawn_with_timeout(config, mcp::DEFAULT_TIMEOUT).await
    }

    pub async fn spawn_with_timeout(
        config: ServerConfig,
        timeout: Duration,
    ) -> Result<Self, mcp::Error> {
        let server = Server::spawn(config).await?.with_timeout(timeout);
        server.initialize().await?;
        let specs = unique_specs(server.tools().await.into_iter().map(ToolSpec::from));
        debug!(server = server.name(), tools = specs.len(), "MCP tool provider ready");
        Ok(Self {
            server,
            specs,
            timeout,
        })
    }

    /// Shut the server process down.
    pub async fn shutdown(self) -> Result<(), mcp::Error> {
        self.server.shutdown().await
    }
}

impl ToolProvider for McpToolProvider {
    fn list_tools(&self) -> &[ToolSpec] {
        &self.specs
    }

    async fn invoke(&self, name: &str, args: Map<String, Value>) -> Result<Value, ToolError> {
        let result = self
            .server
            .call_tool(name, Some(Value::Object(args)))
            .await
            .map_err(|e| match e {
                mcp::Error::Timeout { .. } => ToolError::Timeout(self.timeout.as_millis() as u64),
                other => ToolError::Execution(other.to_string()),
            })?;

        content_to_value(result.content)
    }
}

/// Plain text stays a string; anything richer is passed through as JSON.
fn content_to_value(content: Vec<ToolContent>) -> Result<Value, ToolError> {
    if content.iter().all(|c| c.as_text().is_some()) {
        let text = content
            .iter()
            .filter_map(ToolContent::as_text)
            .collect::<Vec<_>>()
            .join("\n");
        return Ok(Value::String(text));
    }
    serde_json::to_value(&content)
        .map_err(|e| ToolError::Execution(format!("serialize result: {e}")))
}

/// Tool names must be unique within a session; first one wins.
fn unique_specs(specs: impl IntoIterator<Item = ToolSpec>) -> Vec<ToolSpec> {
    let mut seen = HashSet::new();
    specs
        .into_iter()
        .filter(|spec| {
            let fresh = seen.insert(spec.name.clone());
            if !fresh {
                warn!(tool = %spec.name, "duplicate tool name, keeping the first");
            }
            fresh
        })
        .collect()
}
