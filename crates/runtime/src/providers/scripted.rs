//! Scripted backend that replays canned replies.
//!
//! Used for offline runs (`--mock`) and tests. Every request is recorded so
//! callers can inspect what the loop sent.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use serde::Deserialize;
use serde_json::Value;

use crate::model::{
    Backend, Message, ModelError, ModelRequest, ModelResponse, Part, Role, ToolCall, Usage,
};

/// One scripted reply as it appears in a script file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScriptStep {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub tool_calls: Vec<ScriptCall>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptCall {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// A request as the backend saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<String>,
    pub temperature: f32,
}

/// Backend that answers from a fixed queue of replies.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<Result<Message, String>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    fallback: Option<Message>,
}

impl ScriptedBackend {
    pub fn new(replies: impl IntoIterator<Item = Message>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(Ok).collect()),
            ..Self::default()
        }
    }

    /// Parse a JSON array of [`ScriptStep`]s.
    ///
    /// Calls without an `id` get `call-<step>-<index>`.
    pub fn from_json(script: &str) -> Result<Self, serde_json::Error> {
        let steps: Vec<ScriptStep> = serde_json::from_str(script)?;
        Ok(Self::new(steps.into_iter().enumerate().map(|(n, step)| {
            let mut parts = Vec::new();
            if !step.text.is_empty() {
                parts.push(Part::text(step.text));
            }
            parts.extend(step.tool_calls.into_iter().enumerate().map(|(i, call)| {
                Part::ToolCall(ToolCall {
                    id: call.id.unwrap_or_else(|| format!("call-{n}-{i}")),
                    name: call.name,
                    input: call.arguments,
                })
            }));
            Message {
                role: Role::Assistant,
                parts,
            }
        })))
    }

    /// Queue an endpoint failure as the next reply.
    pub fn push_failure(&self, message: impl Into<String>) {
        lock(&self.replies).push_back(Err(message.into()));
    }

    pub fn push_reply(&self, reply: Message) {
        lock(&self.replies).push_back(Ok(reply));
    }

    /// Reply used once the script runs out. Without one, an exhausted script
    /// is an endpoint error.
    pub fn with_fallback(mut self, reply: Message) -> Self {
        self.fallback = Some(reply);
        self
    }

    /// Number of calls made so far.
    pub fn calls(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.requests).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Backend for ScriptedBackend {
    async fn call(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        lock(&self.requests).push(RecordedRequest {
            system: request.system.map(str::to_string),
            messages: request.messages.to_vec(),
            tools: request.tools.iter().map(|t| t.name.clone()).collect(),
            temperature: request.temperature,
        });

        let next = lock(&self.replies).pop_front();
        let message = match next {
            Some(Ok(message)) => message,
            Some(Err(failure)) => return Err(ModelError::Api(failure)),
            None => self
                .fallback
                .clone()
                .ok_or_else(|| ModelError::Api("script exhausted".into()))?,
        };

        Ok(ModelResponse {
            message,
            usage: Usage::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(messages: &[Message]) -> ModelRequest<'_> {
        ModelRequest {
            system: None,
            messages,
            tools: &[],
            temperature: 0.0,
        }
    }

    #[tokio::test]
    async fn script_replays_in_order() {
        let backend = ScriptedBackend::from_json(
            r#"[
                {"tool_calls": [{"name": "search_papers", "arguments": {"query": "X"}}]},
                {"text": "Final Answer: done"}
            ]"#,
        )
        .unwrap();
        let history = [Message::user("q")];

        let first = backend.call(request(&history)).await.unwrap();
        let calls = first.message.tool_calls();
        assert_eq!(calls[0].id, "call-0-0");
        assert_eq!(calls[0].input, json!({"query": "X"}));

        let second = backend.call(request(&history)).await.unwrap();
        assert_eq!(second.message.text(), "Final Answer: done");

        let err = backend.call(request(&history)).await.unwrap_err();
        assert!(matches!(err, ModelError::Api(_)));
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn fallback_and_failures() {
        let backend = ScriptedBackend::default().with_fallback(Message::assistant("mock"));
        backend.push_failure("503");
        let history = [Message::user("q")];

        assert!(backend.call(request(&history)).await.is_err());
        let reply = backend.call(request(&history)).await.unwrap();
        assert_eq!(reply.message.text(), "mock");
        assert_eq!(backend.requests()[0].messages, history.to_vec());
    }
}
