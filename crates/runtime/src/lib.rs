//! Tether runtime: the bounded tool-calling loop and its collaborators.
//!
//! # Overview
//!
//! - [`Agent`] drives one query: model call, tool dispatch, repeat, until a
//!   final answer or the iteration budget runs out.
//! - [`Backend`] abstracts the model endpoint (Anthropic, OpenAI/Azure, or a
//!   [`ScriptedBackend`] for offline runs).
//! - [`ToolProvider`] abstracts tool execution; [`McpToolProvider`] talks to
//!   an MCP server over stdio.
//! - [`Session`] keeps a [`Conversation`] across queries.
//!
//! # Example
//!
//! ```no_run
//! use runtime::{Agent, EmptyToolProvider, LoopConfig, OpenAiBackend, OpenAiEndpoint};
//!
//! # async fn example() -> runtime::Result<()> {
//! let backend = OpenAiBackend::new(OpenAiEndpoint::openai("gpt-4o"), "sk-...");
//! let agent = Agent::new(backend, EmptyToolProvider, LoopConfig::default())?;
//! let answer = agent.ask("What is 2+2?").await?;
//! println!("{}", answer.text);
//! # Ok(())
//! # }
//! ```

pub mod agent;
mod conversation;
mod error;
pub mod model;
pub mod providers;
mod session;
pub mod tools;
mod transcript;

pub use agent::{Agent, Answer, AnswerStatus, LoopConfig, LoopState, Step};
pub use conversation::Conversation;
pub use error::{Error, Result};
pub use model::{
    Backend, Message, ModelError, ModelReply, ModelRequest, ModelResponse, Part, Role, ToolCall,
    ToolOutcome, ToolResult, ToolSpec, Usage,
};
pub use providers::{
    AnthropicAuth, AnthropicBackend, OpenAiBackend, OpenAiEndpoint, ScriptedBackend,
};
pub use session::{ERROR_TURN_PREFIX, Session, SessionId};
pub use tools::{EmptyToolProvider, McpToolProvider, ToolError, ToolProvider};
pub use transcript::Transcript;
