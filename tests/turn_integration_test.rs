//! 轮次集成测试：脚本化模型 + 进程内工具，走完整的 run_turn 流程

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use toolchat::core::{ConversationOrchestrator, ToolErrorKind, TurnPhase};
use toolchat::llm::{LlmClient, LlmError, MockLlmClient};
use toolchat::memory::{
    tool_results_are_correlated, AssistantReply, ChatSession, Message, ToolCallArguments,
    ToolCallRequest, ToolPayload,
};
use toolchat::tools::{builtin_tools, FnTool, Tool, ToolDispatcher, ToolRegistry, ToolSpec};

/// 按顺序返回预设回复，并记录每次调用看到的消息与工具数
struct ScriptedLlm {
    replies: Mutex<VecDeque<AssistantReply>>,
    seen: Mutex<Vec<(Vec<Message>, usize)>>,
}

impl ScriptedLlm {
    fn new(replies: Vec<AssistantReply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<(Vec<Message>, usize)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<AssistantReply, LlmError> {
        self.seen
            .lock()
            .unwrap()
            .push((messages.to_vec(), tools.len()));
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::InvalidResponse("script exhausted".to_string()))
    }
}

fn sleeper(name: &str, delay_ms: u64) -> Arc<dyn Tool> {
    let label = name.to_string();
    Arc::new(FnTool::new(name, "sleep then report", move |_args: Value| {
        let label = label.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Ok(json!({ "tool": label }))
        }
    }))
}

fn orchestrator(llm: Arc<dyn LlmClient>, tools: Vec<Arc<dyn Tool>>) -> ConversationOrchestrator {
    let registry = Arc::new(ToolRegistry::from_tools(tools).unwrap());
    ConversationOrchestrator::new(llm, ToolDispatcher::new(registry, Duration::from_secs(5)))
}

#[tokio::test]
async fn test_turn_without_tools_appends_user_and_reply() {
    let llm = ScriptedLlm::new(vec![AssistantReply::text("Hello there.")]);
    let orch = orchestrator(llm.clone(), builtin_tools());
    let mut session = ChatSession::new("sys");

    let outcome = orch.run_turn(&mut session, "hi").await.unwrap();

    assert_eq!(outcome.reply, "Hello there.");
    assert_eq!(outcome.appended, 2);
    assert_eq!(session.history.len(), 3);
    assert!(outcome.tool_results.is_empty());
    assert_eq!(
        outcome.phases,
        vec![TurnPhase::AwaitingModelDecision, TurnPhase::Done]
    );
    // 只调用一次模型，且绑定了全部工具
    let calls = llm.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1, builtin_tools().len());
}

#[tokio::test]
async fn test_empty_reply_without_tools_is_valid() {
    let llm = ScriptedLlm::new(vec![AssistantReply::text("")]);
    let orch = orchestrator(llm, builtin_tools());
    let mut session = ChatSession::new("sys");

    let outcome = orch.run_turn(&mut session, "say nothing").await.unwrap();

    assert_eq!(outcome.reply, "");
    assert_eq!(outcome.appended, 2);
    assert_eq!(outcome.phases.last(), Some(&TurnPhase::Done));
    let last = session.history.messages().last().unwrap();
    assert_eq!(last, &Message::Assistant(AssistantReply::text("")));
    assert!(last.is_visible());
}

#[tokio::test]
async fn test_tool_calls_in_final_reply_are_dropped() {
    let llm = ScriptedLlm::new(vec![
        AssistantReply::with_calls(
            "",
            vec![
                ToolCallRequest::new("c1", "add", json!({ "a": 1, "b": 2 })),
                ToolCallRequest::new("c2", "multiply", json!({ "a": 2, "b": 3 })),
            ],
        ),
        AssistantReply::with_calls(
            "1 + 2 = 3 and 2 * 3 = 6.",
            vec![ToolCallRequest::new("c3", "subtract", json!({ "a": 6, "b": 3 }))],
        ),
    ]);
    let orch = orchestrator(llm.clone(), builtin_tools());
    let mut session = ChatSession::new("sys");

    let outcome = orch.run_turn(&mut session, "add and multiply").await.unwrap();

    // User + 决策 + 2 个结果 + 最终回复
    assert_eq!(outcome.appended, 2 + 3);
    assert_eq!(session.history.len(), 1 + 5);
    assert_eq!(outcome.tool_results.len(), 2);
    assert_eq!(llm.calls().len(), 2);

    let last = session.history.messages().last().unwrap();
    match last {
        Message::Assistant(reply) => {
            assert!(reply.tool_calls.is_empty());
            assert_eq!(reply.content, "1 + 2 = 3 and 2 * 3 = 6.");
        }
        other => panic!("expected assistant reply, got {other:?}"),
    }
    assert!(last.is_visible());
    assert!(tool_results_are_correlated(session.history.messages()));
}

#[tokio::test]
async fn test_results_follow_request_order_despite_latency() {
    let requests = vec![
        ToolCallRequest::new("c1", "slow", json!({})),
        ToolCallRequest::new("c2", "medium", json!({})),
        ToolCallRequest::new("c3", "fast", json!({})),
    ];
    let llm = ScriptedLlm::new(vec![
        AssistantReply::with_calls("", requests),
        AssistantReply::text("All three finished."),
    ]);
    let orch = orchestrator(
        llm.clone(),
        vec![sleeper("slow", 120), sleeper("medium", 60), sleeper("fast", 5)],
    );
    let mut session = ChatSession::new("sys");

    let outcome = orch.run_turn(&mut session, "run them").await.unwrap();

    let ids: Vec<_> = outcome.tool_results.iter().map(|r| r.call_id.as_str()).collect();
    assert_eq!(ids, vec!["c1", "c2", "c3"]);
    assert_eq!(
        outcome.tool_results[0].payload,
        ToolPayload::Success(json!({ "tool": "slow" }))
    );
    // User + 决策 + 3 个结果 + 最终回复
    assert_eq!(outcome.appended, 6);
    assert_eq!(outcome.reply, "All three finished.");
    assert!(tool_results_are_correlated(session.history.messages()));
    assert_eq!(
        outcome.phases,
        vec![
            TurnPhase::AwaitingModelDecision,
            TurnPhase::DispatchingTools,
            TurnPhase::AwaitingFinalReply,
            TurnPhase::Done,
        ]
    );

    // 第二次调用不绑定工具，且能看到全部工具结果
    let calls = llm.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].1, 0);
    let results_seen = calls[1]
        .0
        .iter()
        .filter(|m| matches!(m, Message::ToolResult(_)))
        .count();
    assert_eq!(results_seen, 3);
}

#[tokio::test]
async fn test_calls_run_concurrently() {
    let requests = (0..4)
        .map(|i| ToolCallRequest::new(format!("c{i}"), "nap", json!({})))
        .collect();
    let llm = ScriptedLlm::new(vec![
        AssistantReply::with_calls("", requests),
        AssistantReply::text("done"),
    ]);
    let orch = orchestrator(llm, vec![sleeper("nap", 150)]);
    let mut session = ChatSession::new("sys");

    let started = std::time::Instant::now();
    let outcome = orch.run_turn(&mut session, "nap four times").await.unwrap();
    assert_eq!(outcome.tool_results.len(), 4);
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[tokio::test]
async fn test_unknown_tool_is_reported_and_turn_completes() {
    let llm = ScriptedLlm::new(vec![
        AssistantReply::with_calls(
            "",
            vec![
                ToolCallRequest::new("c1", "teleport", json!({ "to": "mars" })),
                ToolCallRequest::new("c2", "add", json!({ "a": 1, "b": 2 })),
            ],
        ),
        AssistantReply::text("I could not teleport, but 1 + 2 = 3."),
    ]);
    let orch = orchestrator(llm, builtin_tools());
    let mut session = ChatSession::new("sys");

    let outcome = orch.run_turn(&mut session, "teleport and add").await.unwrap();

    assert_eq!(outcome.phases.last(), Some(&TurnPhase::Done));
    match &outcome.tool_results[0].payload {
        ToolPayload::Error(e) => {
            assert_eq!(e.kind, ToolErrorKind::ToolNotFound);
            assert!(e.message.contains("unknown"));
            assert!(e.message.contains("teleport"));
        }
        other => panic!("expected error payload, got {other:?}"),
    }
    assert_eq!(
        outcome.tool_results[1].payload,
        ToolPayload::Success(json!({ "result": 3 }))
    );
}

#[tokio::test]
async fn test_malformed_raw_arguments_still_invoke_tool() {
    let invoked = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&invoked);
    let lenient: Arc<dyn Tool> = Arc::new(FnTool::new("lenient", "accepts anything", move |args| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "received": args }))
        }
    }));
    let llm = ScriptedLlm::new(vec![
        AssistantReply::with_calls(
            "",
            vec![ToolCallRequest {
                call_id: "c1".to_string(),
                tool_name: "lenient".to_string(),
                arguments: ToolCallArguments::Raw("{not json".to_string()),
            }],
        ),
        AssistantReply::text("ok"),
    ]);
    let orch = orchestrator(llm, vec![lenient]);
    let mut session = ChatSession::new("sys");

    let outcome = orch.run_turn(&mut session, "go").await.unwrap();

    assert_eq!(invoked.load(Ordering::SeqCst), 1);
    assert_eq!(
        outcome.tool_results[0].payload,
        ToolPayload::Success(json!({ "received": "{not json" }))
    );
}

#[tokio::test]
async fn test_model_failure_in_final_reply_leaves_history_unchanged() {
    let llm = ScriptedLlm::new(vec![AssistantReply::with_calls(
        "",
        vec![ToolCallRequest::new("c1", "add", json!({ "a": 1, "b": 1 }))],
    )]);
    let orch = orchestrator(llm, builtin_tools());
    let mut session = ChatSession::new("sys");

    let result = orch.run_turn(&mut session, "1 + 1").await;

    assert!(result.is_err());
    assert_eq!(session.history.len(), 1);
}

#[tokio::test]
async fn test_mock_backend_answers_addition_with_tool() {
    let orch = orchestrator(Arc::new(MockLlmClient::new()), builtin_tools());
    let mut session = ChatSession::new("sys");

    let outcome = orch.run_turn(&mut session, "What is 25 + 17?").await.unwrap();

    assert!(outcome.reply.contains("42"));
    assert_eq!(outcome.tool_results.len(), 1);
    assert_eq!(
        outcome.tool_results[0].payload,
        ToolPayload::Success(json!({ "result": 42 }))
    );

    // 第二轮能看到第一轮的完整历史
    let before = session.history.len();
    orch.run_turn(&mut session, "thanks").await.unwrap();
    assert_eq!(session.history.len(), before + 2);
}

#[test]
fn test_registry_lookup_is_idempotent() {
    let registry = ToolRegistry::from_tools(builtin_tools()).unwrap();
    let first = registry.lookup("multiply").unwrap();
    let second = registry.lookup("multiply").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(registry.lookup("missing").is_err());
    assert!(registry.lookup("missing").is_err());
    assert_eq!(registry.len(), builtin_tools().len());
}
