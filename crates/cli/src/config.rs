//! Configuration loading from tether.toml and the environment.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mcp::ServerConfig;
use runtime::{AnthropicAuth, LoopConfig, OpenAiEndpoint};
use serde::Deserialize;

pub const CONFIG_FILE: &str = "tether.toml";

/// Prefix the default system prompt asks the model to put before its
/// answer.
pub const ANSWER_MARKER: &str = "Final Answer:";

/// Default system instruction: reason step by step, use tools, and mark
/// the final answer.
pub const REACT_PROMPT: &str = "You are a capable AI assistant that solves problems with the ReAct \
(Reasoning and Acting) framework. For every query:

1. Thought: consider the state of the problem, what is known, and what to do next.
2. Action: pick a suitable tool to act, if one is needed.
3. Observation: analyse what the tool returned.
4. Reflection: assess progress and decide whether more exploration is needed.
5. Plan: plan the next step.

In every iteration, state clearly:
- whether your current understanding is complete
- whether you need more information
- whether you are ready to give the final answer

Only when you are confident you have the most complete and accurate answer, finish with \
\"Final Answer:\" followed by the answer.";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default, rename = "loop")]
    pub agent: AgentConfig,

    #[serde(default)]
    pub backend: BackendConfig,

    /// MCP tool server to spawn. Without one the loop runs without tools.
    pub server: Option<ServerSection>,
}

/// Loop settings.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    pub max_iterations: u32,
    pub temperature: f32,
    /// Set to an empty string to send no system prompt.
    pub system_prompt: String,
    pub final_marker: Option<String>,
    pub history_window: Option<usize>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let defaults = LoopConfig::default();
        Self {
            max_iterations: defaults.max_iterations,
            temperature: defaults.temperature,
            system_prompt: REACT_PROMPT.to_string(),
            final_marker: None,
            history_window: None,
        }
    }
}

/// Model endpoint settings.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackendConfig {
    /// `anthropic`, `openai`, `azure` or `mock`. Inferred from the
    /// credentials present when unset.
    pub provider: Option<Provider>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,

    /// OpenAI-compatible base URL or Anthropic messages URL.
    pub base_url: Option<String>,

    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,

    pub azure_api_key: Option<String>,
    pub azure_endpoint: Option<String>,
    pub azure_deployment: Option<String>,
    pub azure_api_version: Option<String>,

    /// Script for the mock backend.
    pub script: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Anthropic,
    OpenAi,
    Azure,
    Mock,
}

impl std::str::FromStr for Provider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "anthropic" => Ok(Self::Anthropic),
            "openai" => Ok(Self::OpenAi),
            "azure" => Ok(Self::Azure),
            "mock" => Ok(Self::Mock),
            other => Err(ConfigError::Invalid(format!("unknown provider `{other}`"))),
        }
    }
}

/// MCP server process.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    #[serde(default = "default_server_name")]
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ServerSection {
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            name: self.name.clone(),
            command: self.command.clone(),
            args: self.args.clone(),
            env: self.env.clone(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_server_name() -> String {
    "tools".to_string()
}

fn default_timeout_secs() -> u64 {
    mcp::DEFAULT_TIMEOUT.as_secs()
}

const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";

/// A fully resolved backend choice.
#[derive(Debug, Clone)]
pub enum BackendChoice {
    Anthropic {
        auth: AnthropicAuth,
        model: String,
        base_url: Option<String>,
        max_tokens: Option<u32>,
    },
    OpenAi {
        endpoint: OpenAiEndpoint,
        api_key: String,
        max_tokens: Option<u32>,
    },
    Mock {
        script: Option<PathBuf>,
    },
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Overlay environment variables, looked up through `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(value) = var("MAX_ITERATIONS") {
            self.agent.max_iterations = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("MAX_ITERATIONS: `{value}`")))?;
        }
        if let Some(value) = var("TEMPERATURE") {
            self.agent.temperature = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("TEMPERATURE: `{value}`")))?;
        }
        if var("MOCK").is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1") {
            self.backend.provider = Some(Provider::Mock);
        }

        let backend = &mut self.backend;
        overlay(&mut backend.openai_api_key, var("OPENAI_API_KEY"));
        overlay(&mut backend.anthropic_api_key, var("ANTHROPIC_API_KEY"));
        overlay(&mut backend.azure_api_key, var("AZURE_OPENAI_API_KEY"));
        overlay(&mut backend.azure_endpoint, var("AZURE_OPENAI_ENDPOINT"));
        overlay(&mut backend.azure_deployment, var("AZURE_OPENAI_DEPLOYMENT"));
        overlay(&mut backend.azure_api_version, var("AZURE_OPENAI_API_VERSION"));
        Ok(())
    }

    /// Loop settings, validated.
    pub fn loop_config(&self) -> Result<LoopConfig, ConfigError> {
        let agent = &self.agent;
        let config = LoopConfig {
            max_iterations: agent.max_iterations,
            temperature: agent.temperature,
            system_prompt: (!agent.system_prompt.trim().is_empty())
                .then(|| agent.system_prompt.clone()),
            final_marker: agent.final_marker.clone(),
            history_window: agent.history_window,
        };
        config
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(config)
    }

    /// Resolve which backend to use.
    ///
    /// Without an explicit provider exactly one credential must be present.
    pub fn backend(&self) -> Result<BackendChoice, ConfigError> {
        let b = &self.backend;
        let provider = match b.provider {
            Some(provider) => provider,
            None => {
                let present: Vec<Provider> = [
                    (Provider::Anthropic, b.anthropic_api_key.is_some()),
                    (Provider::OpenAi, b.openai_api_key.is_some()),
                    (Provider::Azure, b.azure_api_key.is_some()),
                ]
                .into_iter()
                .filter_map(|(p, set)| set.then_some(p))
                .collect();
                match present.as_slice() {
                    [one] => *one,
                    [] => return Err(ConfigError::MissingAuth),
                    _ => return Err(ConfigError::AmbiguousAuth),
                }
            }
        };

        let required = |value: &Option<String>, name: &str| {
            value
                .clone()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::Missing(name.to_string()))
        };

        Ok(match provider {
            Provider::Anthropic => BackendChoice::Anthropic {
                auth: AnthropicAuth::ApiKey(required(&b.anthropic_api_key, "ANTHROPIC_API_KEY")?),
                model: b
                    .model
                    .clone()
                    .unwrap_or_else(|| DEFAULT_ANTHROPIC_MODEL.to_string()),
                base_url: b.base_url.clone(),
                max_tokens: b.max_tokens,
            },
            Provider::OpenAi => BackendChoice::OpenAi {
                endpoint: OpenAiEndpoint::OpenAi {
                    base_url: b
                        .base_url
                        .clone()
                        .unwrap_or_else(|| runtime::providers::OPENAI_BASE_URL.to_string()),
                    model: b
                        .model
                        .clone()
                        .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
                },
                api_key: required(&b.openai_api_key, "OPENAI_API_KEY")?,
                max_tokens: b.max_tokens,
            },
            Provider::Azure => BackendChoice::OpenAi {
                endpoint: OpenAiEndpoint::Azure {
                    endpoint: required(&b.azure_endpoint, "AZURE_OPENAI_ENDPOINT")?,
                    deployment: required(&b.azure_deployment, "AZURE_OPENAI_DEPLOYMENT")?,
                    api_version: b
                        .azure_api_version
                        .clone()
                        .unwrap_or_else(|| runtime::providers::AZURE_API_VERSION.to_string()),
                },
                api_key: required(&b.azure_api_key, "AZURE_OPENAI_API_KEY")?,
                max_tokens: b.max_tokens,
            },
            Provider::Mock => BackendChoice::Mock {
                script: b.script.clone(),
            },
        })
    }
}

fn overlay(slot: &mut Option<String>, value: Option<String>) {
    if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
        *slot = Some(value);
    }
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("missing setting: {0}")]
    Missing(String),

    #[error(
        "no model credentials: set one of ANTHROPIC_API_KEY, OPENAI_API_KEY or AZURE_OPENAI_API_KEY, or use --mock"
    )]
    MissingAuth,

    #[error("ambiguous credentials: several providers are configured; set backend.provider")]
    AmbiguousAuth,
}
