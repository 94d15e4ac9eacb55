//! Route table loaded from TOML.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::Deserialize;
use serde_json::{Value, json};

/// Top-level route configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
    /// Prefix for every route path.
    pub base_url: String,

    #[serde(default)]
    pub auth: AuthConfig,

    /// Extra headers sent with every request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Name announced in the MCP handshake.
    #[serde(default = "default_server_name")]
    pub server_name: String,

    #[serde(default)]
    pub tools: Vec<Route>,
}

/// How the REST API is authenticated.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// Environment variable holding the API token.
    pub bearer_env: Option<String>,

    /// When set, the token is sent as this query parameter instead of an
    /// `Authorization` header.
    pub query_key: Option<String>,
}

/// One tool backed by one HTTP endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Route {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub method: HttpMethod,

    /// Path relative to `base_url`; `{param}` segments are filled from the
    /// call arguments.
    pub path: String,

    #[serde(default = "empty_schema")]
    pub input_schema: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Whether arguments travel in the query string rather than a body.
    pub fn uses_query(self) -> bool {
        matches!(self, Self::Get | Self::Delete)
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

impl Route {
    /// Placeholder names in `path`, in order.
    pub fn placeholders(&self) -> Vec<&str> {
        self.path
            .split('/')
            .filter_map(|segment| segment.strip_prefix('{')?.strip_suffix('}'))
            .collect()
    }

    fn required(&self) -> Vec<&str> {
        self.input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    pub fn to_tool(&self) -> mcp::Tool {
        mcp::Tool {
            name: self.name.clone(),
            description: (!self.description.is_empty()).then(|| self.description.clone()),
            input_schema: self.input_schema.clone(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_server_name() -> String {
    "tether-openapi".to_string()
}

fn empty_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

impl RouteConfig {
    /// Load and validate a route table.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse and validate a route table from a TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        reqwest::Url::parse(&self.base_url)
            .map_err(|e| ConfigError::Invalid(format!("base_url `{}`: {e}", self.base_url)))?;

        let mut seen = HashSet::new();
        for route in &self.tools {
            if route.name.trim().is_empty() {
                return Err(ConfigError::Invalid("tool with empty name".into()));
            }
            if !seen.insert(route.name.as_str()) {
                return Err(ConfigError::DuplicateTool(route.name.clone()));
            }
            if !route.path.starts_with('/') {
                return Err(ConfigError::Invalid(format!(
                    "tool `{}`: path must start with '/'",
                    route.name
                )));
            }
            if !route.input_schema.is_object() {
                return Err(ConfigError::Invalid(format!(
                    "tool `{}`: input_schema must be a table",
                    route.name
                )));
            }
            let required = route.required();
            if let Some(missing) = route
                .placeholders()
                .into_iter()
                .find(|p| !required.contains(p))
            {
                return Err(ConfigError::Invalid(format!(
                    "tool `{}`: path parameter `{missing}` must be listed in input_schema.required",
                    route.name
                )));
            }
        }
        Ok(())
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

    #[error("duplicate tool name `{0}`")]
    DuplicateTool(String),

    #[error("environment variable {0} is not set")]
    MissingEnv(String),
}
