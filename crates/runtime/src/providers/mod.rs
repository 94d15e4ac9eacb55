//! LLM provider adapters.
//!
//! Each provider implements [`Backend`](crate::model::Backend) for its API.

mod anthropic;
mod openai;
mod scripted;

pub use anthropic::{AnthropicAuth, AnthropicBackend, AnthropicBackendBuilder};
pub use openai::{AZURE_API_VERSION, OPENAI_BASE_URL, OpenAiBackend, OpenAiEndpoint};
pub use scripted::{RecordedRequest, ScriptCall, ScriptStep, ScriptedBackend};
