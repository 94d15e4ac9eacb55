//! Plain-text report of one query.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tokio::io::AsyncWriteExt;

use crate::agent::{Answer, AnswerStatus};
use crate::model::{Message, Role, ToolCall, ToolOutcome};
use crate::session::ERROR_TURN_PREFIX;

const RULE: &str = "================================================================================";

#[derive(Debug, Clone)]
struct Iteration {
    text: String,
    calls: Vec<(ToolCall, Option<ToolOutcome>)>,
}

#[derive(Debug, Clone)]
enum Outcome {
    Answer { text: String, status: AnswerStatus },
    Error(String),
}

/// Iteration-by-iteration record of a query, built from the turns the
/// query appended.
#[derive(Debug, Clone)]
pub struct Transcript {
    query: String,
    iterations: Vec<Iteration>,
    outcome: Option<Outcome>,
    created: DateTime<Local>,
}

impl Transcript {
    /// Build from a query's turns. The first turn is expected to be the
    /// user's query; later user turns are loop prompts and are skipped.
    pub fn from_exchange(turns: &[Message]) -> Self {
        let mut query = String::new();
        let mut iterations: Vec<Iteration> = Vec::new();

        for (index, turn) in turns.iter().enumerate() {
            match turn.role {
                Role::User if index == 0 => query = turn.text(),
                Role::Assistant if turn.text().starts_with(ERROR_TURN_PREFIX) => {}
                Role::Assistant => iterations.push(Iteration {
                    text: turn.text(),
                    calls: turn.tool_calls().into_iter().map(|c| (c, None)).collect(),
                }),
                Role::Tool => {
                    let Some(current) = iterations.last_mut() else {
                        continue;
                    };
                    for result in turn.tool_results() {
                        if let Some(slot) = current
                            .calls
                            .iter_mut()
                            .find(|(call, _)| call.id == result.tool_call_id)
                        {
                            slot.1 = Some(result.outcome.clone());
                        }
                    }
                }
                Role::User | Role::System => {}
            }
        }

        Self {
            query,
            iterations,
            outcome: None,
            created: Local::now(),
        }
    }

    pub fn with_answer(mut self, answer: &Answer) -> Self {
        self.outcome = Some(Outcome::Answer {
            text: answer.text.clone(),
            status: answer.status,
        });
        self
    }

    pub fn with_error(mut self, error: &impl std::fmt::Display) -> Self {
        self.outcome = Some(Outcome::Error(error.to_string()));
        self
    }

    pub fn iterations(&self) -> usize {
        self.iterations.len()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Query: {}", self.query);
        let _ = writeln!(out, "{RULE}\n");

        for (n, iteration) in self.iterations.iter().enumerate() {
            let _ = writeln!(out, "--- Iteration {} ---", n + 1);
            if !iteration.text.is_empty() {
                let _ = writeln!(out, "Assistant: {}", iteration.text);
            }
            if !iteration.calls.is_empty() {
                let _ = writeln!(out, "\nTool Calls:");
                for (call, outcome) in &iteration.calls {
                    let args = serde_json::to_string_pretty(&call.input)
                        .unwrap_or_else(|_| call.input.to_string());
                    let _ = writeln!(out, "\nTool: {}", call.name);
                    let _ = writeln!(out, "Arguments: {args}");
                    match outcome {
                        Some(ToolOutcome::Success { output }) => {
                            let output = serde_json::to_string_pretty(output)
                                .unwrap_or_else(|_| output.to_string());
                            let _ = writeln!(out, "Result: {output}");
                        }
                        Some(ToolOutcome::Failure { message }) => {
                            let _ = writeln!(out, "Error: {message}");
                        }
                        None => {
                            let _ = writeln!(out, "Result: (none)");
                        }
                    }
                }
            }
            let _ = writeln!(out, "\n{RULE}\n");
        }

        match &self.outcome {
            Some(Outcome::Answer { text, status }) => {
                let label = match status {
                    AnswerStatus::Final => "final",
                    AnswerStatus::BestEffort => "best effort",
                    AnswerStatus::Incomplete => "incomplete",
                };
                let _ = writeln!(out, "Answer ({label}): {text}");
            }
            Some(Outcome::Error(e)) => {
                let _ = writeln!(out, "ERROR: {e}");
            }
            None => {}
        }
        let _ = writeln!(out, "\nTotal iterations: {}", self.iterations.len());
        let _ = writeln!(out, "Timestamp: {}", self.created.format("%Y-%m-%d %H:%M:%S %Z"));
        out
    }

    /// File name derived from the creation time.
    pub fn file_name(&self) -> String {
        self.numbered_file_name(0)
    }

    fn numbered_file_name(&self, n: u32) -> String {
        let stamp = self.created.format("%Y_%m_%d_%H_%M_%S");
        match n {
            0 => format!("{stamp}_transcript.txt"),
            n => format!("{stamp}_{n}_transcript.txt"),
        }
    }

    /// Write the rendered transcript into `dir`, creating it if needed.
    ///
    /// Existing files are never overwritten: when [`Self::file_name`] is
    /// taken, a counter is added to the name.
    pub async fn write_to(&self, dir: &Path) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let rendered = self.render();
        let mut n = 0;
        loop {
            let path = dir.join(self.numbered_file_name(n));
            let opened = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            match opened {
                Ok(mut file) => {
                    file.write_all(rendered.as_bytes()).await?;
                    file.flush().await?;
                    return Ok(path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => n += 1,
                Err(e) => return Err(e),
            }
        }
    }
}
