//! OpenAI-compatible chat completions backend, including Azure deployments.

use crate::model::{
    Backend, Message, ModelError, ModelRequest, ModelResponse, Part, Role, ToolCall, ToolSpec,
    Usage,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const AZURE_API_VERSION: &str = "2024-02-15-preview";

/// Where chat completions are sent.
#[derive(Debug, Clone)]
pub enum OpenAiEndpoint {
    /// OpenAI or any compatible server; `model` is sent in the body.
    OpenAi { base_url: String, model: String },
    /// Azure OpenAI; the deployment selects the model.
    Azure {
        endpoint: String,
        deployment: String,
        api_version: String,
    },
}

impl OpenAiEndpoint {
    pub fn openai(model: impl Into<String>) -> Self {
        Self::OpenAi {
            base_url: OPENAI_BASE_URL.to_string(),
            model: model.into(),
        }
    }

    pub fn azure(endpoint: impl Into<String>, deployment: impl Into<String>) -> Self {
        Self::Azure {
            endpoint: endpoint.into(),
            deployment: deployment.into(),
            api_version: AZURE_API_VERSION.to_string(),
        }
    }

    fn url(&self) -> String {
        match self {
            Self::OpenAi { base_url, .. } => {
                format!("{}/chat/completions", base_url.trim_end_matches('/'))
            }
            Self::Azure {
                endpoint,
                deployment,
                api_version,
            } => format!(
                "{}/openai/deployments/{deployment}/chat/completions?api-version={api_version}",
                endpoint.trim_end_matches('/')
            ),
        }
    }

    fn model(&self) -> Option<&str> {
        match self {
            Self::OpenAi { model, .. } => Some(model),
            Self::Azure { .. } => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// API Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolDef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    /// JSON-encoded argument object.
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ToolDef {
    #[serde(rename = "type")]
    kind: &'static str,
    function: ToolFunctionDef,
}

#[derive(Debug, Serialize)]
struct ToolFunctionDef {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

fn function_kind() -> String {
    "function".to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend Implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Chat completions backend.
pub struct OpenAiBackend {
    client: reqwest::Client,
    endpoint: OpenAiEndpoint,
    api_key: String,
    max_tokens: Option<u32>,
}

impl OpenAiBackend {
    pub fn new(endpoint: OpenAiEndpoint, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key: api_key.into(),
            max_tokens: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    fn messages_to_api(system: Option<&str>, messages: &[Message]) -> Vec<ChatMessage> {
        let mut out = Vec::with_capacity(messages.len() + 1);
        if let Some(system) = system {
            out.push(ChatMessage {
                role: "system".to_string(),
                content: Some(system.to_string()),
                tool_calls: Vec::new(),
                tool_call_id: None,
            });
        }
        for msg in messages {
            match msg.role {
                // One `tool` message per result.
                Role::Tool => out.extend(msg.tool_results().map(|result| ChatMessage {
                    role: "tool".to_string(),
                    content: Some(match &result.outcome {
                        outcome if outcome.is_failure() => format!("Error: {}", outcome.to_text()),
                        outcome => outcome.to_text(),
                    }),
                    tool_calls: Vec::new(),
                    tool_call_id: Some(result.tool_call_id.clone()),
                })),
                role => {
                    let text = msg.text();
                    let tool_calls: Vec<WireToolCall> = msg
                        .tool_calls()
                        .into_iter()
                        .map(|call| WireToolCall {
                            id: Some(call.id),
                            kind: function_kind(),
                            function: WireFunction {
                                name: call.name,
                                arguments: call.input.to_string(),
                            },
                        })
                        .collect();
                    out.push(ChatMessage {
                        role: role.to_string(),
                        content: (!text.is_empty() || tool_calls.is_empty()).then_some(text),
                        tool_calls,
                        tool_call_id: None,
                    });
                }
            }
        }
        out
    }

    fn tool_to_api(spec: &ToolSpec) -> ToolDef {
        ToolDef {
            kind: "function",
            function: ToolFunctionDef {
                name: spec.name.clone(),
                description: spec.description.clone(),
                parameters: normalize_parameters(&spec.schema),
            },
        }
    }

    fn response_to_message(message: ChatMessage) -> Message {
        let mut parts = Vec::new();
        if let Some(text) = message.content.filter(|t| !t.is_empty()) {
            parts.push(Part::Text { text });
        }
        for (index, call) in message.tool_calls.into_iter().enumerate() {
            // Unparseable arguments are kept as a string; validation then
            // reports them back to the model as a failed call.
            let input = serde_json::from_str(&call.function.arguments).unwrap_or_else(|e| {
                warn!(tool = %call.function.name, "tool arguments are not JSON: {e}");
                Value::String(call.function.arguments.clone())
            });
            parts.push(Part::ToolCall(ToolCall {
                id: call.id.unwrap_or_else(|| format!("call_{index}")),
                name: call.function.name,
                input,
            }));
        }
        Message {
            role: Role::Assistant,
            parts,
        }
    }
}

/// Function parameters must be an object schema with `properties`.
fn normalize_parameters(schema: &Value) -> Value {
    let properties = schema
        .get("properties")
        .cloned()
        .unwrap_or_else(|| json!({}));
    let required = schema.get("required").cloned().unwrap_or_else(|| json!([]));
    let mut normalized = match schema {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    normalized.insert("type".into(), json!("object"));
    normalized.insert("properties".into(), properties);
    normalized.insert("required".into(), required);
    Value::Object(normalized)
}

impl std::fmt::Display for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.endpoint {
            OpenAiEndpoint::OpenAi { model, .. } => write!(f, "openai({model})"),
            OpenAiEndpoint::Azure { deployment, .. } => write!(f, "azure({deployment})"),
        }
    }
}

impl Backend for OpenAiBackend {
    async fn call(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        let tools: Vec<ToolDef> = request.tools.iter().map(Self::tool_to_api).collect();
        let api_request = ChatRequest {
            model: self.endpoint.model(),
            messages: Self::messages_to_api(request.system, request.messages),
            temperature: request.temperature,
            tool_choice: (!tools.is_empty()).then_some("auto"),
            tools,
            max_tokens: self.max_tokens,
        };

        let req = self
            .client
            .post(self.endpoint.url())
            .header("content-type", "application/json");
        let req = match &self.endpoint {
            OpenAiEndpoint::OpenAi { .. } => req.bearer_auth(&self.api_key),
            OpenAiEndpoint::Azure { .. } => req.header("api-key", &self.api_key),
        };

        let response = req
            .json(&api_request)
            .send()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Api(format!("{status}: {body}")));
        }

        let api_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::InvalidResponse("no choices in response".into()))?;

        let usage = api_response
            .usage
            .map(|u| Usage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(ModelResponse {
            message: Self::response_to_message(choice.message),
            usage,
        })
    }
}
