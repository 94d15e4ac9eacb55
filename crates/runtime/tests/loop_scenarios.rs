use std::sync::Mutex;
use std::time::Duration;

use runtime::{
    Agent, AnswerStatus, Conversation, EmptyToolProvider, Error, LoopConfig, Message, Part, Role,
    ScriptedBackend, Session, ToolCall, ToolError, ToolOutcome, ToolProvider, ToolSpec,
};
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

/// Tool provider exposing `search_papers` and recording every invocation.
struct PaperTools {
    specs: Vec<ToolSpec>,
    invocations: Mutex<Vec<(String, Map<String, Value>)>>,
    delay: Duration,
    parallel: bool,
}

impl PaperTools {
    fn new() -> Self {
        Self {
            specs: vec![ToolSpec {
                name: "search_papers".into(),
                description: "Search papers".into(),
                schema: json!({
                    "type": "object",
                    "properties": {"query": {"type": "string"}},
                    "required": ["query"]
                }),
            }],
            invocations: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            parallel: false,
        }
    }

    fn invocations(&self) -> Vec<(String, Map<String, Value>)> {
        self.invocations.lock().unwrap().clone()
    }
}

impl ToolProvider for PaperTools {
    fn list_tools(&self) -> &[ToolSpec] {
        &self.specs
    }

    async fn invoke(&self, name: &str, args: Map<String, Value>) -> Result<Value, ToolError> {
        self.invocations
            .lock()
            .unwrap()
            .push((name.to_string(), args.clone()));
        // Queries named "slow" take longer, so parallel completion order
        // differs from request order.
        let delay = match args.get("query").and_then(Value::as_str) {
            Some("slow") => self.delay * 4,
            _ => self.delay,
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match args.get("query").and_then(Value::as_str) {
            Some("fail") => Err(ToolError::Execution("upstream 500".into())),
            Some(query) => Ok(json!([format!("{query}-1"), format!("{query}-2")])),
            None => Ok(Value::Null),
        }
    }

    fn supports_parallel(&self) -> bool {
        self.parallel
    }
}

fn tool_call(id: &str, name: &str, input: Value) -> Message {
    Message {
        role: Role::Assistant,
        parts: vec![Part::ToolCall(ToolCall {
            id: id.into(),
            name: name.into(),
            input,
        })],
    }
}

fn config(max_iterations: u32) -> LoopConfig {
    LoopConfig {
        max_iterations,
        ..LoopConfig::default()
    }
}

#[tokio::test]
async fn direct_answer_without_tools() {
    let agent = Agent::new(
        ScriptedBackend::new([Message::assistant("4")]),
        EmptyToolProvider,
        config(10),
    )
    .unwrap();
    let mut conversation = Conversation::new();

    let answer = agent.run(&mut conversation, "What is 2+2?").await.unwrap();

    assert_eq!(answer.text, "4");
    assert_eq!(answer.status, AnswerStatus::Final);
    assert_eq!(answer.iterations, 1);
    assert_eq!(agent.backend().calls(), 1);
    assert_eq!(conversation.len(), 2);
    assert!(agent.backend().requests()[0].tools.is_empty());
}

#[tokio::test]
async fn single_tool_round_trip() {
    let backend = ScriptedBackend::new([
        tool_call("c1", "search_papers", json!({"query": "X"})),
        Message::assistant("Found X-1 and X-2."),
    ]);
    let agent = Agent::new(backend, PaperTools::new(), config(10)).unwrap();
    let mut conversation = Conversation::new();

    let answer = agent.run(&mut conversation, "Find papers on X").await.unwrap();

    assert_eq!(answer.text, "Found X-1 and X-2.");
    assert_eq!(answer.iterations, 2);

    let invocations = agent.tools().invocations();
    assert_eq!(invocations.len(), 1);
    assert_eq!(invocations[0].0, "search_papers");
    assert_eq!(Value::Object(invocations[0].1.clone()), json!({"query": "X"}));

    let roles: Vec<Role> = conversation.turns().iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        [Role::User, Role::Assistant, Role::Tool, Role::Assistant]
    );
    let result = conversation.turns()[2].tool_results().next().unwrap();
    assert_eq!(result.tool_call_id, "c1");
    assert_eq!(
        result.outcome,
        ToolOutcome::Success {
            output: json!(["X-1", "X-2"])
        }
    );

    // The second model call saw the tool result.
    let second = &agent.backend().requests()[1];
    assert_eq!(second.messages.len(), 3);
    assert_eq!(second.tools, ["search_papers"]);
}

#[tokio::test]
async fn iteration_budget_bounds_model_calls() {
    let replies =
        (0..10).map(|i| tool_call(&format!("c{i}"), "search_papers", json!({"query": "again"})));
    let agent = Agent::new(ScriptedBackend::new(replies), PaperTools::new(), config(3)).unwrap();
    let mut conversation = Conversation::new();

    let answer = agent.run(&mut conversation, "loop forever").await.unwrap();

    assert_eq!(agent.backend().calls(), 3);
    assert_eq!(answer.iterations, 3);
    assert_eq!(answer.status, AnswerStatus::Incomplete);
    assert!(answer.text.contains("3 iterations"));
    assert_eq!(agent.tools().invocations().len(), 3);
}

#[tokio::test]
async fn exhausted_budget_returns_last_assistant_text() {
    let mut thinking = tool_call("c1", "search_papers", json!({"query": "X"}));
    thinking.parts.insert(0, Part::text("Partial: X-1 looks relevant."));
    let agent = Agent::new(
        ScriptedBackend::new([thinking]),
        PaperTools::new(),
        config(1),
    )
    .unwrap();

    let answer = agent.ask("Find papers on X").await.unwrap();

    assert_eq!(answer.status, AnswerStatus::BestEffort);
    assert_eq!(answer.text, "Partial: X-1 looks relevant.");
    assert!(!answer.is_final());
}

#[tokio::test]
async fn unknown_tool_is_reported_not_invoked() {
    let backend = ScriptedBackend::new([
        tool_call("c1", "delete_everything", json!({})),
        Message::assistant("Sorry, I cannot do that."),
    ]);
    let agent = Agent::new(backend, PaperTools::new(), config(10)).unwrap();
    let mut conversation = Conversation::new();

    let answer = agent.run(&mut conversation, "wipe it").await.unwrap();

    assert_eq!(answer.text, "Sorry, I cannot do that.");
    assert!(agent.tools().invocations().is_empty());
    let result = conversation.turns()[2].tool_results().next().unwrap();
    match &result.outcome {
        ToolOutcome::Failure { message } => assert!(message.contains("delete_everything")),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn invalid_arguments_and_tool_errors_become_failure_turns() {
    let backend = ScriptedBackend::new([
        Message {
            role: Role::Assistant,
            parts: vec![
                Part::ToolCall(ToolCall {
                    id: "a".into(),
                    name: "search_papers".into(),
                    input: json!({}),
                }),
                Part::ToolCall(ToolCall {
                    id: "b".into(),
                    name: "search_papers".into(),
                    input: json!({"query": "fail"}),
                }),
            ],
        },
        Message::assistant("done"),
    ]);
    let agent = Agent::new(backend, PaperTools::new(), config(10)).unwrap();
    let mut conversation = Conversation::new();

    agent.run(&mut conversation, "q").await.unwrap();

    // Only the well-formed call reached the provider.
    assert_eq!(agent.tools().invocations().len(), 1);
    let results: Vec<_> = conversation.turns()[2..4]
        .iter()
        .flat_map(|m| m.tool_results().cloned().collect::<Vec<_>>())
        .collect();
    assert_eq!(results[0].tool_call_id, "a");
    assert!(results[0].outcome.to_text().contains("query"));
    assert_eq!(results[1].tool_call_id, "b");
    assert!(results[1].outcome.to_text().contains("upstream 500"));
}

#[tokio::test]
async fn endpoint_failure_rolls_back_iteration() {
    let backend = ScriptedBackend::new([tool_call("c1", "search_papers", json!({"query": "X"}))]);
    backend.push_failure("503 service unavailable");
    let agent = Agent::new(backend, PaperTools::new(), config(10)).unwrap();
    let mut conversation = Conversation::new();

    let err = agent.run(&mut conversation, "q").await.unwrap_err();

    assert!(matches!(err, Error::Model(_)));
    // First iteration completed, second was rolled back.
    assert_eq!(conversation.len(), 3);
    assert_eq!(conversation.turns()[2].role, Role::Tool);
}

#[tokio::test]
async fn session_records_error_turn_and_continues() {
    let backend = ScriptedBackend::default();
    backend.push_failure("503");
    backend.push_reply(Message::assistant("back online"));
    let agent = Agent::new(backend, EmptyToolProvider, config(10)).unwrap();
    let mut session = Session::new(agent);

    let err = session.chat("hello").await.unwrap_err();
    assert!(matches!(err, Error::Model(_)));
    let last = session.conversation().turns().last().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert!(last.text().starts_with(runtime::ERROR_TURN_PREFIX));

    let answer = session.chat("again?").await.unwrap();
    assert_eq!(answer.text, "back online");
    assert_eq!(session.conversation().len(), 4);
    assert_eq!(session.last_exchange().len(), 2);

    session.reset();
    assert!(session.conversation().is_empty());
}

#[tokio::test]
async fn empty_query_is_rejected() {
    let agent = Agent::new(ScriptedBackend::default(), EmptyToolProvider, config(10)).unwrap();
    let mut conversation = Conversation::new();

    let err = agent.run(&mut conversation, "   ").await.unwrap_err();

    assert!(matches!(err, Error::EmptyQuery));
    assert!(conversation.is_empty());
    assert_eq!(agent.backend().calls(), 0);
}

#[tokio::test]
async fn identical_inputs_give_identical_histories() {
    let script = || {
        ScriptedBackend::new([
            tool_call("c1", "search_papers", json!({"query": "X"})),
            Message::assistant("X-1"),
        ])
    };
    let first = Agent::new(script(), PaperTools::new(), config(5)).unwrap();
    let second = Agent::new(script(), PaperTools::new(), config(5)).unwrap();
    let mut a = Conversation::new();
    let mut b = Conversation::new();

    let answer_a = first.run(&mut a, "Find X").await.unwrap();
    let answer_b = second.run(&mut b, "Find X").await.unwrap();

    assert_eq!(answer_a, answer_b);
    assert_eq!(a, b);
}

#[tokio::test]
async fn cancellation_rolls_back_in_flight_iteration() {
    let backend = ScriptedBackend::new([
        tool_call("c1", "search_papers", json!({"query": "X"})),
        Message::assistant("never reached"),
    ]);
    let tools = PaperTools {
        delay: Duration::from_secs(30),
        ..PaperTools::new()
    };
    let agent = Agent::new(backend, tools, config(10)).unwrap();
    let mut conversation = Conversation::new();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = agent
        .run_until_cancelled(&mut conversation, "Find X", &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled));
    // The assistant turn and its pending tool call were discarded.
    assert_eq!(conversation.len(), 1);
    assert_eq!(conversation.turns()[0].role, Role::User);
}

#[tokio::test]
async fn parallel_dispatch_keeps_request_order() {
    let backend = ScriptedBackend::new([
        Message {
            role: Role::Assistant,
            parts: vec![
                Part::ToolCall(ToolCall {
                    id: "slow".into(),
                    name: "search_papers".into(),
                    input: json!({"query": "slow"}),
                }),
                Part::ToolCall(ToolCall {
                    id: "fast".into(),
                    name: "search_papers".into(),
                    input: json!({"query": "fast"}),
                }),
            ],
        },
        Message::assistant("done"),
    ]);
    let tools = PaperTools {
        delay: Duration::from_millis(20),
        parallel: true,
        ..PaperTools::new()
    };
    let agent = Agent::new(backend, tools, config(10)).unwrap();
    let mut conversation = Conversation::new();

    agent.run(&mut conversation, "q").await.unwrap();

    let ids: Vec<String> = conversation.turns()[2..4]
        .iter()
        .flat_map(|m| m.tool_results().map(|r| r.tool_call_id.clone()).collect::<Vec<_>>())
        .collect();
    assert_eq!(ids, ["slow", "fast"]);
}

#[tokio::test]
async fn marker_mode_nudges_until_final_answer() {
    let backend = ScriptedBackend::new([
        tool_call("c1", "search_papers", json!({"query": "X"})),
        Message::assistant("Let me think about it."),
        Message::assistant("Thought: done.\nFinal Answer: 42"),
    ]);
    let config = LoopConfig {
        final_marker: Some("Final Answer:".into()),
        system_prompt: Some("Use ReAct.".into()),
        ..config(5)
    };
    let agent = Agent::new(backend, PaperTools::new(), config).unwrap();
    let mut conversation = Conversation::new();

    let answer = agent.run(&mut conversation, "q").await.unwrap();

    assert_eq!(answer.text, "42");
    assert_eq!(answer.iterations, 3);
    let turns = conversation.turns();
    assert_eq!(turns.len(), 7);

    // Tool round, then a reflection turn listing its results.
    assert_eq!(turns[2].role, Role::Tool);
    assert_eq!(turns[3].role, Role::User);
    let reflection = turns[3].text();
    assert!(reflection.starts_with("Based on the tool results:"));
    assert!(reflection.contains("Tool 'search_papers' returned: [\"X-1\",\"X-2\"]"));
    assert!(reflection.contains("Final Answer:"));

    // A reply with neither tools nor the marker gets the continue prompt.
    assert_eq!(turns[5].role, Role::User);
    assert_eq!(
        turns[5].text(),
        runtime::agent::continue_prompt("Final Answer:")
    );
    let requests = agent.backend().requests();
    assert_eq!(requests[0].system.as_deref(), Some("Use ReAct."));
    assert!((requests[0].temperature - 0.7).abs() < f32::EPSILON);
}

#[tokio::test]
async fn plain_mode_adds_no_reflection_turn() {
    let backend = ScriptedBackend::new([
        tool_call("c1", "search_papers", json!({"query": "X"})),
        Message::assistant("Found X-1."),
    ]);
    let agent = Agent::new(backend, PaperTools::new(), config(5)).unwrap();
    let mut conversation = Conversation::new();

    agent.run(&mut conversation, "q").await.unwrap();

    let roles: Vec<Role> = conversation.turns().iter().map(|m| m.role).collect();
    assert_eq!(roles, [Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
}

#[tokio::test]
async fn plain_mode_ignores_tool_requests() {
    let backend = ScriptedBackend::new([Message {
        role: Role::Assistant,
        parts: vec![
            Part::text("Hello."),
            Part::ToolCall(ToolCall {
                id: "c1".into(),
                name: "search_papers".into(),
                input: json!({"query": "X"}),
            }),
        ],
    }]);
    let agent = Agent::new(backend, EmptyToolProvider, config(10)).unwrap();
    let mut conversation = Conversation::new();

    let answer = agent.run(&mut conversation, "hi").await.unwrap();

    assert_eq!(answer.text, "Hello.");
    assert!(conversation.turns()[1].tool_calls().is_empty());
}

#[tokio::test]
async fn history_window_limits_request() {
    let backend = ScriptedBackend::new([Message::assistant("one"), Message::assistant("two")]);
    let config = LoopConfig {
        history_window: Some(1),
        ..config(5)
    };
    let mut session = Session::new(Agent::new(backend, EmptyToolProvider, config).unwrap());

    session.chat("first").await.unwrap();
    session.chat("second").await.unwrap();

    let requests = session.agent().backend().requests();
    assert_eq!(requests[1].messages.len(), 1);
    assert_eq!(requests[1].messages[0].text(), "second");
    assert_eq!(session.conversation().len(), 4);
}
