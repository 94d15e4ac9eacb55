//! Interactive sessions.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::agent::{Agent, Answer};
use crate::conversation::Conversation;
use crate::model::{Backend, Message};
use crate::tools::ToolProvider;
use crate::{Error, Result};

/// Prefix of the assistant turn recorded when a query fails.
pub const ERROR_TURN_PREFIX: &str = "[error] ";

/// Unique session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A conversation that persists across queries.
pub struct Session<B, T> {
    pub id: SessionId,
    agent: Agent<B, T>,
    conversation: Conversation,
    last_query_start: usize,
}

impl<B: Backend, T: ToolProvider> Session<B, T> {
    pub fn new(agent: Agent<B, T>) -> Self {
        Self {
            id: SessionId::new(),
            agent,
            conversation: Conversation::new(),
            last_query_start: 0,
        }
    }

    /// Answer `input` in the context of earlier queries.
    ///
    /// On a model endpoint failure an assistant turn describing the error is
    /// appended, so the next query sees what happened, and the error is
    /// returned.
    pub async fn chat(&mut self, input: &str) -> Result<Answer> {
        self.last_query_start = self.conversation.len();
        let result = self.agent.run(&mut self.conversation, input).await;
        self.record_failure(result)
    }

    /// [`Self::chat`], abandoned when `cancel` fires.
    pub async fn chat_until_cancelled(
        &mut self,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<Answer> {
        self.last_query_start = self.conversation.len();
        let result = self
            .agent
            .run_until_cancelled(&mut self.conversation, input, cancel)
            .await;
        self.record_failure(result)
    }

    fn record_failure(&mut self, result: Result<Answer>) -> Result<Answer> {
        if let Err(e @ Error::Model(_)) = &result {
            warn!(session = %self.id, "query failed: {e}");
            self.conversation
                .push(Message::assistant(format!("{ERROR_TURN_PREFIX}{e}")));
        }
        result
    }

    /// Turns appended by the most recent query.
    pub fn last_exchange(&self) -> &[Message] {
        self.conversation
            .turns()
            .get(self.last_query_start..)
            .unwrap_or_default()
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn agent(&self) -> &Agent<B, T> {
        &self.agent
    }

    pub fn into_agent(self) -> Agent<B, T> {
        self.agent
    }

    /// Forget the conversation and start over under a new id.
    pub fn reset(&mut self) {
        self.conversation.clear();
        self.last_query_start = 0;
        self.id = SessionId::new();
    }
}
