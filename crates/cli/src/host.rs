//! Wiring: concrete backend and tool provider chosen at startup.

use std::path::Path;

use runtime::{
    AnthropicBackend, Backend, EmptyToolProvider, McpToolProvider, Message, ModelError,
    ModelRequest, ModelResponse, OpenAiBackend, ScriptedBackend, ToolError, ToolProvider,
    ToolSpec,
};
use serde_json::{Map, Value};
use tracing::info;

use crate::config::{BackendChoice, ServerSection};
use crate::error::{Error, Result};

/// Reply of the mock backend once its script runs out.
pub(crate) const MOCK_FALLBACK: &str = "Final Answer: This is a mock response.";

/// One of the supported model backends.
pub enum HostBackend {
    Anthropic(AnthropicBackend),
    OpenAi(OpenAiBackend),
    Scripted(ScriptedBackend),
}

impl HostBackend {
    pub fn build(choice: BackendChoice) -> Result<Self> {
        Ok(match choice {
            BackendChoice::Anthropic {
                auth,
                model,
                base_url,
                max_tokens,
            } => {
                let mut builder = AnthropicBackend::builder(auth, model);
                if let Some(url) = base_url {
                    builder = builder.base_url(url);
                }
                if let Some(max_tokens) = max_tokens {
                    builder = builder.max_tokens(max_tokens);
                }
                Self::Anthropic(builder.build())
            }
            BackendChoice::OpenAi {
                endpoint,
                api_key,
                max_tokens,
            } => {
                let backend = OpenAiBackend::new(endpoint, api_key);
                Self::OpenAi(match max_tokens {
                    Some(max_tokens) => backend.with_max_tokens(max_tokens),
                    None => backend,
                })
            }
            BackendChoice::Mock { script } => Self::Scripted(mock_backend(script.as_deref())?),
        })
    }
}

fn mock_backend(script: Option<&Path>) -> Result<ScriptedBackend> {
    let backend = match script {
        Some(path) => {
            let content = std::fs::read_to_string(path)?;
            ScriptedBackend::from_json(&content).map_err(|e| {
                Error::Config(format!("mock script {}: {e}", path.display()))
            })?
        }
        None => ScriptedBackend::default(),
    };
    Ok(backend.with_fallback(Message::assistant(MOCK_FALLBACK)))
}

impl std::fmt::Display for HostBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anthropic(b) => std::fmt::Display::fmt(b, f),
            Self::OpenAi(b) => std::fmt::Display::fmt(b, f),
            Self::Scripted(_) => f.write_str("mock"),
        }
    }
}

impl Backend for HostBackend {
    async fn call(&self, request: ModelRequest<'_>) -> std::result::Result<ModelResponse, ModelError> {
        match self {
            Self::Anthropic(b) => b.call(request).await,
            Self::OpenAi(b) => b.call(request).await,
            Self::Scripted(b) => b.call(request).await,
        }
    }
}

/// Tools from an MCP server, or none.
pub enum HostTools {
    None(EmptyToolProvider),
    Mcp(McpToolProvider),
}

impl HostTools {
    pub async fn connect(server: Option<&ServerSection>) -> Result<Self> {
        let Some(server) = server else {
            info!("no tool server configured; running without tools");
            return Ok(Self::None(EmptyToolProvider));
        };
        info!(server = %server.name, command = %server.command, "starting tool server");
        let provider =
            McpToolProvider::spawn_with_timeout(server.server_config(), server.timeout())
                .await
                .map_err(runtime::Error::from)?;
        Ok(Self::Mcp(provider))
    }

    pub async fn shutdown(self) -> Result<()> {
        if let Self::Mcp(provider) = self {
            provider.shutdown().await.map_err(runtime::Error::from)?;
        }
        Ok(())
    }
}

impl ToolProvider for HostTools {
    fn list_tools(&self) -> &[ToolSpec] {
        match self {
            Self::None(p) => p.list_tools(),
            Self::Mcp(p) => p.list_tools(),
        }
    }

    async fn invoke(
        &self,
        name: &str,
        args: Map<String, Value>,
    ) -> std::result::Result<Value, ToolError> {
        match self {
            Self::None(p) => p.invoke(name, args).await,
            Self::Mcp(p) => p.invoke(name, args).await,
        }
    }

    fn supports_parallel(&self) -> bool {
        match self {
            Self::None(p) => p.supports_parallel(),
            Self::Mcp(p) => p.supports_parallel(),
        }
    }
}
