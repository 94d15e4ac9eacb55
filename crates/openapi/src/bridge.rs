//! REST bridge: turns MCP tool calls into HTTP requests.

use std::time::Duration;

use mcp::{CallToolResult, Implementation, Tool, ToolHandler};
use reqwest::Url;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::config::{ConfigError, Route, RouteConfig};

/// Failure of a single tool call. Reported to the client as a tool error.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CallError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("missing path parameter `{0}`")]
    MissingPathParam(String),

    #[error("arguments must be an object")]
    InvalidArguments,

    #[error("cannot build request url from {0}")]
    InvalidUrl(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

/// A request ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct Prepared {
    pub method: reqwest::Method,
    pub url: Url,
    pub body: Option<Value>,
}

/// Tool handler that forwards each call to its configured endpoint.
pub struct Bridge {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
    query_key: Option<String>,
    headers: Vec<(String, String)>,
    server_name: String,
    routes: Vec<Route>,
}

impl Bridge {
    /// Build a bridge, reading the API token from the configured variable.
    pub fn new(config: RouteConfig) -> Result<Self, ConfigError> {
        let token = match &config.auth.bearer_env {
            Some(var) => Some(std::env::var(var).map_err(|_| ConfigError::MissingEnv(var.clone()))?),
            None => None,
        };
        Self::with_token(config, token)
    }

    pub fn with_token(config: RouteConfig, token: Option<String>) -> Result<Self, ConfigError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| ConfigError::Invalid(format!("base_url: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConfigError::Invalid(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url,
            token,
            query_key: config.auth.query_key,
            headers: config.headers.into_iter().collect(),
            server_name: config.server_name,
            routes: config.tools,
        })
    }

    fn route(&self, name: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.name == name)
    }

    /// Map a call onto a concrete request without sending it.
    pub fn prepare(&self, name: &str, arguments: Option<Value>) -> Result<Prepared, CallError> {
        let route = self
            .route(name)
            .ok_or_else(|| CallError::UnknownTool(name.to_string()))?;
        let mut args = match arguments {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => return Err(CallError::InvalidArguments),
        };

        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| CallError::InvalidUrl(self.base_url.to_string()))?;
            segments.pop_if_empty();
            for segment in route.path.split('/').filter(|s| !s.is_empty()) {
                match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                    Some(param) => {
                        let value = args
                            .remove(param)
                            .ok_or_else(|| CallError::MissingPathParam(param.to_string()))?;
                        segments.push(&scalar_text(&value));
                    }
                    None => {
                        segments.push(segment);
                    }
                }
            }
        }

        let uses_query = route.method.uses_query();
        {
            let mut query = url.query_pairs_mut();
            if let (Some(key), Some(token)) = (&self.query_key, &self.token) {
                query.append_pair(key, token);
            }
            if uses_query {
                for (key, value) in &args {
                    match value {
                        Value::Null => {}
                        Value::Array(items) => {
                            for item in items {
                                query.append_pair(key, &scalar_text(item));
                            }
                        }
                        other => {
                            query.append_pair(key, &scalar_text(other));
                        }
                    }
                }
            }
        }
        // Drop a dangling `?` when nothing was appended.
        if url.query() == Some("") {
            url.set_query(None);
        }

        Ok(Prepared {
            method: route.method.into(),
            url,
            body: (!uses_query).then_some(Value::Object(args)),
        })
    }

    async fn send(&self, prepared: Prepared) -> Result<String, CallError> {
        info!(method = %prepared.method, url = %redact(&prepared.url, self.query_key.as_deref()), "forwarding call");
        let mut req = self
            .client
            .request(prepared.method, prepared.url)
            .header("accept", "application/json");
        for (name, value) in &self.headers {
            req = req.header(name, value);
        }
        if let (None, Some(token)) = (&self.query_key, &self.token) {
            req = req.bearer_auth(token);
        }
        if let Some(body) = &prepared.body {
            req = req.json(body);
        }

        let response = req.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            warn!(%status, "upstream returned an error");
            return Err(CallError::Status {
                status: status.as_u16(),
                body,
            });
        }
        debug!(bytes = body.len(), "upstream response");
        Ok(pretty_json(body))
    }
}

/// Path and query text for a JSON value; strings are used unquoted.
fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Pretty-print JSON bodies; anything else is returned unchanged.
fn pretty_json(body: String) -> String {
    serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| serde_json::to_string_pretty(&v).ok())
        .unwrap_or(body)
}

/// The URL with the token query parameter masked, for logs.
fn redact(url: &Url, query_key: Option<&str>) -> String {
    let Some(key) = query_key else {
        return url.to_string();
    };
    let mut masked = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == key { "***".to_string() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    masked.query_pairs_mut().clear().extend_pairs(pairs);
    masked.to_string()
}

impl ToolHandler for Bridge {
    type Error = CallError;

    fn server_info(&self) -> Implementation {
        Implementation {
            name: self.server_name.clone(),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }
    }

    fn tools(&self) -> Vec<Tool> {
        self.routes.iter().map(Route::to_tool).collect()
    }

    async fn call(&self, name: &str, arguments: Option<Value>) -> Result<CallToolResult, CallError> {
        let prepared = self.prepare(name, arguments)?;
        let body = self.send(prepared).await?;
        Ok(CallToolResult::text(body))
    }
}
