//! Bounded tool-calling loop.
//!
//! One query is answered by alternating model calls and tool dispatch until
//! the model gives a final answer or the iteration budget runs out. Each
//! iteration appends its turns atomically: if the model call fails or the
//! query is cancelled mid-iteration, nothing from that iteration remains in
//! the conversation.

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::conversation::{Conversation, Staged};
use crate::model::{
    Backend, Message, ModelReply, ModelRequest, ToolCall, ToolOutcome, ToolResult, Usage,
};
use crate::tools::{ToolProvider, validate_call};
use crate::{Error, Result};

pub const DEFAULT_MAX_ITERATIONS: u32 = 10;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// User turn sent when a final-answer marker is configured but the model
/// replied without it.
pub fn continue_prompt(marker: &str) -> String {
    format!(
        "Please continue. Call a tool if you need more information, \
         or reply with \"{marker}\" followed by your answer."
    )
}

/// User turn appended after a round of tool results when a final-answer
/// marker is configured.
pub fn reflection_prompt(results: &[ToolResult], marker: &str) -> String {
    let mut prompt = String::from("Based on the tool results:\n");
    for result in results {
        let observation = match &result.outcome {
            ToolOutcome::Success { output } => format!("returned: {output}"),
            ToolOutcome::Failure { message } => format!("failed: {message}"),
        };
        prompt.push_str(&format!("Tool '{}' {observation}\n", result.name));
    }
    prompt.push_str(&format!(
        "\nPlease analyze these results and decide:\n\
         1. What have we learned?\n\
         2. Do we need more information?\n\
         3. Are we ready for a \"{marker}\"?\n"
    ));
    prompt
}

/// Loop settings. Fixed for the lifetime of an [`Agent`].
#[derive(Debug, Clone, PartialEq)]
pub struct LoopConfig {
    /// Upper bound on model calls per query. At least 1.
    pub max_iterations: u32,
    pub temperature: f32,
    pub system_prompt: Option<String>,
    /// When set, a reply only counts as final if it contains this marker;
    /// the answer is the text after it.
    pub final_marker: Option<String>,
    /// Send at most this many recent turns to the model.
    pub history_window: Option<usize>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            temperature: DEFAULT_TEMPERATURE,
            system_prompt: None,
            final_marker: None,
            history_window: None,
        }
    }
}

impl LoopConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(Error::Config("max_iterations must be at least 1".into()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(Error::Config(format!(
                "temperature must be within 0..=2, got {}",
                self.temperature
            )));
        }
        if self.final_marker.as_deref().is_some_and(|m| m.trim().is_empty()) {
            return Err(Error::Config("final_marker must not be blank".into()));
        }
        if self.history_window == Some(0) {
            return Err(Error::Config("history_window must be at least 1".into()));
        }
        Ok(())
    }
}

/// Progress of one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopState {
    iteration: u32,
    max_iterations: u32,
    done: bool,
}

impl LoopState {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            iteration: 0,
            max_iterations,
            done: false,
        }
    }

    /// Model calls made so far.
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// A final answer has been produced.
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn is_exhausted(&self) -> bool {
        self.iteration >= self.max_iterations
    }
}

/// What one iteration did.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// The model answered.
    Final { answer: String, usage: Usage },
    /// Tool results (or a nudge) were appended; another iteration is needed.
    Continue { usage: Usage },
    /// No iterations left, or the query already finished. Nothing was sent.
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerStatus {
    /// The model produced a final answer.
    Final,
    /// Budget ran out; the text is the model's last words.
    BestEffort,
    /// Budget ran out and the model never said anything usable.
    Incomplete,
}

/// The outcome of one query.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub status: AnswerStatus,
    pub iterations: u32,
    pub usage: Usage,
}

impl Answer {
    pub fn is_final(&self) -> bool {
        self.status == AnswerStatus::Final
    }
}

/// Loop controller over a model backend and a tool provider.
pub struct Agent<B, T> {
    backend: B,
    tools: T,
    config: LoopConfig,
}

impl<B: Backend, T: ToolProvider> Agent<B, T> {
    pub fn new(backend: B, tools: T, config: LoopConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            backend,
            tools,
            config,
        })
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn tools(&self) -> &T {
        &self.tools
    }

    pub fn into_parts(self) -> (B, T) {
        (self.backend, self.tools)
    }

    /// Answer a one-off query in a fresh conversation.
    pub async fn ask(&self, query: &str) -> Result<Answer> {
        let mut conversation = Conversation::new();
        self.run(&mut conversation, query).await
    }

    /// Append `query` as a user turn and loop until answered or out of
    /// iterations.
    ///
    /// Running out of iterations is not an error: the answer carries
    /// [`AnswerStatus::BestEffort`] or [`AnswerStatus::Incomplete`]. A model
    /// endpoint failure aborts the query; turns from completed iterations
    /// stay in the conversation.
    #[tracing::instrument(skip_all, fields(max_iterations = self.config.max_iterations))]
    pub async fn run(&self, conversation: &mut Conversation, query: &str) -> Result<Answer> {
        if query.trim().is_empty() {
            return Err(Error::EmptyQuery);
        }
        let start = conversation.len();
        conversation.push(Message::user(query));

        let mut state = LoopState::new(self.config.max_iterations);
        let mut usage = Usage::default();
        loop {
            match self.step(conversation, &mut state).await? {
                Step::Final { answer, usage: u } => {
                    usage += u;
                    info!(iterations = state.iteration(), "query answered");
                    return Ok(Answer {
                        text: answer,
                        status: AnswerStatus::Final,
                        iterations: state.iteration(),
                        usage,
                    });
                }
                Step::Continue { usage: u } => usage += u,
                Step::Exhausted => {
                    warn!(
                        iterations = state.iteration(),
                        "iteration budget exhausted without a final answer"
                    );
                    let (text, status) = match conversation.last_assistant_text_since(start) {
                        Some(text) => (text, AnswerStatus::BestEffort),
                        None => (
                            format!(
                                "Unable to complete the request within {} iterations.",
                                state.max_iterations()
                            ),
                            AnswerStatus::Incomplete,
                        ),
                    };
                    return Ok(Answer {
                        text,
                        status,
                        iterations: state.iteration(),
                        usage,
                    });
                }
            }
        }
    }

    /// [`Self::run`], abandoned as soon as `cancel` fires.
    ///
    /// The iteration in flight is rolled back; completed iterations and the
    /// user turn remain.
    pub async fn run_until_cancelled(
        &self,
        conversation: &mut Conversation,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Answer> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("query cancelled");
                Err(Error::Cancelled)
            }
            result = self.run(conversation, query) => result,
        }
    }

    /// Run a single iteration: one model call, then dispatch of whatever
    /// tools it asked for.
    pub async fn step(&self, conversation: &mut Conversation, state: &mut LoopState) -> Result<Step> {
        if state.is_done() || state.is_exhausted() {
            return Ok(Step::Exhausted);
        }
        state.iteration += 1;
        debug!(iteration = state.iteration, "model call");

        let mut staged = Staged::new(conversation);
        let specs = self.tools.list_tools();
        let messages = match self.config.history_window {
            Some(window) => staged.recent(window),
            None => staged.turns(),
        };
        let response = self
            .backend
            .call(ModelRequest {
                system: self.config.system_prompt.as_deref(),
                messages,
                tools: specs,
                temperature: self.config.temperature,
            })
            .await
            .inspect_err(|e| warn!(iteration = state.iteration, "model call failed: {e}"))?;

        let usage = response.usage;
        // Without tools the loop is plain conversation: any tool-call parts
        // are dropped and the reply is always final.
        let (message, reply) = if specs.is_empty() {
            let message = response.message.without_tool_calls();
            let reply = ModelReply::FinalAnswer(message.text());
            (message, reply)
        } else {
            let reply = response.message.reply();
            (response.message, reply)
        };
        staged.push(message);

        match reply {
            ModelReply::FinalAnswer(text) => match self.extract_answer(&text) {
                Some(answer) => {
                    staged.commit();
                    state.done = true;
                    Ok(Step::Final { answer, usage })
                }
                None => {
                    debug!("reply lacks the final-answer marker, nudging");
                    let marker = self.config.final_marker.as_deref().unwrap_or_default();
                    staged.push(Message::user(continue_prompt(marker)));
                    staged.commit();
                    Ok(Step::Continue { usage })
                }
            },
            ModelReply::ToolCalls(calls) => {
                let results = self.dispatch(&calls).await;
                let reflection = self
                    .config
                    .final_marker
                    .as_deref()
                    .map(|marker| reflection_prompt(&results, marker));
                for result in results {
                    staged.push(Message::tool_result(result));
                }
                if let Some(prompt) = reflection {
                    staged.push(Message::user(prompt));
                }
                staged.commit();
                Ok(Step::Continue { usage })
            }
        }
    }

    fn extract_answer(&self, text: &str) -> Option<String> {
        match &self.config.final_marker {
            None => Some(text.to_string()),
            Some(marker) => text
                .find(marker.as_str())
                .map(|at| text[at + marker.len()..].trim().to_string()),
        }
    }

    /// One result per call, in request order.
    async fn dispatch(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        if self.tools.supports_parallel() && calls.len() > 1 {
            join_all(calls.iter().map(|call| self.run_tool(call))).await
        } else {
            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                results.push(self.run_tool(call).await);
            }
            results
        }
    }

    async fn run_tool(&self, call: &ToolCall) -> ToolResult {
        let args = match validate_call(self.tools.list_tools(), call) {
            Ok(args) => args,
            Err(e) => {
                warn!(tool = %call.name, id = %call.id, "rejected tool call: {e}");
                return ToolResult::failure(call, e.to_string());
            }
        };
        debug!(tool = %call.name, id = %call.id, "invoking tool");
        match self.tools.invoke(&call.name, args).await {
            Ok(output) => ToolResult::success(call, output),
            Err(e) => {
                warn!(tool = %call.name, id = %call.id, "tool failed: {e}");
                ToolResult::failure(call, e.to_string())
            }
        }
    }
}
