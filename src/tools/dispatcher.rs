//! 工具调度器
//!
//! 持有只读 ToolRegistry、单次调用超时与并发上限。execute(calls) 为每个调用单独 spawn，
//! 全部完成（或失败 / 超时）后按请求顺序返回 ToolResult；任何单个调用的错误都被转成
//! ErrorPayload，不会中止同批次的其它调用。每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::core::ToolErrorKind;
use crate::memory::{ToolCallArguments, ToolCallRequest, ToolPayload, ToolResult};
use crate::tools::{Tool, ToolRegistry};

/// 审计日志中参数预览的最大字符数
const ARGS_PREVIEW_CHARS: usize = 200;

/// 单次调用在被执行前解析出的参数
struct PreparedArgs {
    value: Value,
    /// 原始字符串无法解码时的解码错误（参数以原样字符串传入）
    decode_error: Option<String>,
}

/// 工具调度器：对每次调用施加超时，并将结果映射为 ToolResult
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    call_timeout: Duration,
    permits: Arc<Semaphore>,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, call_timeout: Duration) -> Self {
        Self::with_concurrency(registry, call_timeout, usize::MAX >> 4)
    }

    /// 限制同一时刻在途的工具调用数（如最多 4 个）
    pub fn with_concurrency(
        registry: Arc<ToolRegistry>,
        call_timeout: Duration,
        max_concurrent: usize,
    ) -> Self {
        Self {
            registry,
            call_timeout,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// 执行一批调用；返回结果与 calls 等长、call_id 一一对应、顺序与请求一致（与完成顺序无关）。
    /// 每个调用都有超时，因此整批等待有上界。
    pub async fn execute(&self, calls: &[ToolCallRequest]) -> Vec<ToolResult> {
        let pending = calls.iter().map(|call| self.execute_one(call));
        let results = join_all(pending).await;
        debug_assert!(results
            .iter()
            .zip(calls)
            .all(|(r, c)| r.call_id == c.call_id));
        results
    }

    async fn execute_one(&self, call: &ToolCallRequest) -> ToolResult {
        let tool = match self.registry.lookup(&call.tool_name) {
            Ok(tool) => tool,
            Err(e) => {
                tracing::error!(tool = %call.tool_name, call_id = %call.call_id, "{}", e);
                audit(call, &args_preview_of(&call.arguments), "not_found", 0);
                return ToolResult {
                    call_id: call.call_id.clone(),
                    payload: ToolPayload::error(ToolErrorKind::ToolNotFound, e.to_string()),
                };
            }
        };

        let prepared = prepare_arguments(call);
        let preview = truncate(&prepared.value.to_string());
        tracing::info!(tool = %call.tool_name, call_id = %call.call_id, asynchronous = tool.is_asynchronous(), args = %preview, "calling tool");

        let start = Instant::now();
        let outcome = self.spawn_call(tool, prepared.value).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let payload = match outcome {
            CallOutcome::Ok(value) => {
                audit(call, &preview, "ok", duration_ms);
                ToolPayload::Success(value)
            }
            CallOutcome::Failed(message) => {
                audit(call, &preview, "error", duration_ms);
                match prepared.decode_error {
                    Some(decode_err) => {
                        tracing::error!(tool = %call.tool_name, call_id = %call.call_id, "tool rejected undecodable arguments: {}", message);
                        ToolPayload::error(
                            ToolErrorKind::ToolArgumentDecodeError,
                            format!(
                                "arguments for '{}' could not be decoded ({}); tool error: {}",
                                call.tool_name, decode_err, message
                            ),
                        )
                    }
                    None => {
                        tracing::error!(tool = %call.tool_name, call_id = %call.call_id, "tool failed: {}", message);
                        ToolPayload::error(
                            ToolErrorKind::ToolExecutionError,
                            format!("Error executing tool '{}': {}", call.tool_name, message),
                        )
                    }
                }
            }
            CallOutcome::TimedOut => {
                audit(call, &preview, "timeout", duration_ms);
                tracing::error!(tool = %call.tool_name, call_id = %call.call_id, timeout_ms = self.call_timeout.as_millis() as u64, "tool timed out");
                ToolPayload::error(
                    ToolErrorKind::ToolTimeout,
                    format!(
                        "tool '{}' did not finish within {}ms",
                        call.tool_name,
                        self.call_timeout.as_millis()
                    ),
                )
            }
        };

        ToolResult {
            call_id: call.call_id.clone(),
            payload,
        }
    }

    /// 在独立任务中执行工具：panic 被隔离为执行错误，超时后任务被丢弃
    async fn spawn_call(&self, tool: Arc<dyn Tool>, args: Value) -> CallOutcome {
        let permits = Arc::clone(&self.permits);
        let call_timeout = self.call_timeout;
        let handle = tokio::spawn(async move {
            // 共用通道的调用先排队，计时从拿到通道之后开始
            let _lane = match tool.call_lane() {
                Some(lane) => Some(lane.lock_owned().await),
                None => None,
            };
            let _permit = match permits.acquire_owned().await {
                Ok(p) => p,
                Err(_) => return CallOutcome::Failed("tool dispatcher is shut down".to_string()),
            };
            match timeout(call_timeout, tool.call(args)).await {
                Ok(Ok(value)) => CallOutcome::Ok(value),
                Ok(Err(message)) => CallOutcome::Failed(message),
                Err(_) => CallOutcome::TimedOut,
            }
        });
        match handle.await {
            Ok(outcome) => outcome,
            Err(join_err) => CallOutcome::Failed(format!("tool task aborted: {join_err}")),
        }
    }
}

enum CallOutcome {
    Ok(Value),
    Failed(String),
    TimedOut,
}

/// 解析参数：结构化 map 直接使用；原始字符串尝试解码为 map，失败则原样透传
fn prepare_arguments(call: &ToolCallRequest) -> PreparedArgs {
    match &call.arguments {
        ToolCallArguments::Structured(map) => PreparedArgs {
            value: Value::Object(map.clone()),
            decode_error: None,
        },
        ToolCallArguments::Raw(raw) if raw.trim().is_empty() => PreparedArgs {
            value: Value::Object(Default::default()),
            decode_error: None,
        },
        ToolCallArguments::Raw(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => PreparedArgs {
                value: Value::Object(map),
                decode_error: None,
            },
            Ok(other) => {
                let reason = format!("expected a JSON object, got {}", json_type_name(&other));
                tracing::warn!(tool = %call.tool_name, call_id = %call.call_id, "Failed to parse tool args as object ({}): {}", reason, truncate(raw));
                PreparedArgs {
                    value: Value::String(raw.clone()),
                    decode_error: Some(reason),
                }
            }
            Err(e) => {
                tracing::warn!(tool = %call.tool_name, call_id = %call.call_id, "Failed to parse tool args as JSON ({}): {}", e, truncate(raw));
                PreparedArgs {
                    value: Value::String(raw.clone()),
                    decode_error: Some(e.to_string()),
                }
            }
        },
    }
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn audit(call: &ToolCallRequest, args_preview: &str, outcome: &str, duration_ms: u64) {
    let audit = serde_json::json!({
        "event": "tool_audit",
        "tool": call.tool_name,
        "call_id": call.call_id,
        "ok": outcome == "ok",
        "outcome": outcome,
        "duration_ms": duration_ms,
        "args_preview": args_preview,
    });
    tracing::info!(audit = %audit.to_string(), "tool");
}

fn args_preview_of(args: &ToolCallArguments) -> String {
    truncate(&args.to_wire_string())
}

fn truncate(s: &str) -> String {
    if s.chars().count() > ARGS_PREVIEW_CHARS {
        format!("{}...", s.chars().take(ARGS_PREVIEW_CHARS).collect::<String>())
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{CallLane, FnTool};
    use serde_json::json;

    fn registry_with(tools: Vec<Arc<dyn Tool>>) -> Arc<ToolRegistry> {
        Arc::new(ToolRegistry::from_tools(tools).unwrap())
    }

    fn echo_tool() -> Arc<dyn Tool> {
        Arc::new(FnTool::new("echo", "returns its arguments", |args| async move {
            Ok(args)
        }))
    }

    #[tokio::test]
    async fn test_unknown_tool_is_not_found_payload() {
        let dispatcher = ToolDispatcher::new(registry_with(vec![]), Duration::from_secs(1));
        let results = dispatcher
            .execute(&[ToolCallRequest::new("c1", "mul", json!({"a": 1}))])
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].call_id, "c1");
        match &results[0].payload {
            ToolPayload::Error(e) => {
                assert_eq!(e.kind, ToolErrorKind::ToolNotFound);
                assert!(e.message.contains("unknown"));
                assert!(e.message.contains("mul"));
            }
            other => panic!("Expected ToolNotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_raw_json_arguments_are_decoded() {
        let dispatcher = ToolDispatcher::new(registry_with(vec![echo_tool()]), Duration::from_secs(1));
        let call = ToolCallRequest::new(
            "c1",
            "echo",
            ToolCallArguments::Raw(r#"{"a": 25, "b": 17}"#.to_string()),
        );
        let results = dispatcher.execute(&[call]).await;
        assert_eq!(results[0].payload, ToolPayload::Success(json!({"a": 25, "b": 17})));
    }

    #[tokio::test]
    async fn test_malformed_arguments_passed_through_raw() {
        let dispatcher = ToolDispatcher::new(registry_with(vec![echo_tool()]), Duration::from_secs(1));
        let call = ToolCallRequest::new("c1", "echo", ToolCallArguments::Raw("a=25, b=17".to_string()));
        let results = dispatcher.execute(&[call]).await;
        assert_eq!(results[0].payload, ToolPayload::Success(json!("a=25, b=17")));
    }

    #[tokio::test]
    async fn test_malformed_arguments_rejected_by_tool_reports_decode_error() {
        let strict = Arc::new(FnTool::new("strict", "needs an object", |args: Value| async move {
            args.as_object().cloned().map(Value::Object).ok_or_else(|| "expected object".to_string())
        })) as Arc<dyn Tool>;
        let dispatcher = ToolDispatcher::new(registry_with(vec![strict]), Duration::from_secs(1));
        let call = ToolCallRequest::new("c1", "strict", ToolCallArguments::Raw("{oops".to_string()));
        let results = dispatcher.execute(&[call]).await;
        assert_eq!(results[0].payload.error_kind(), Some(ToolErrorKind::ToolArgumentDecodeError));
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_batch() {
        let failing = Arc::new(FnTool::new("boom", "always fails", |_args| async move {
            Err::<Value, _>("kaboom".to_string())
        })) as Arc<dyn Tool>;
        let panicking = Arc::new(FnTool::new("panic", "panics", |_args| async move {
            if true {
                panic!("tool bug");
            }
            Ok(Value::Null)
        })) as Arc<dyn Tool>;
        let dispatcher = ToolDispatcher::new(
            registry_with(vec![failing, panicking, echo_tool()]),
            Duration::from_secs(1),
        );
        let results = dispatcher
            .execute(&[
                ToolCallRequest::new("c1", "boom", json!({})),
                ToolCallRequest::new("c2", "panic", json!({})),
                ToolCallRequest::new("c3", "echo", json!({"x": 1})),
            ])
            .await;
        assert_eq!(results[0].payload.error_kind(), Some(ToolErrorKind::ToolExecutionError));
        assert_eq!(results[1].payload.error_kind(), Some(ToolErrorKind::ToolExecutionError));
        assert_eq!(results[2].payload, ToolPayload::Success(json!({"x": 1})));
    }

    #[tokio::test]
    async fn test_hanging_call_times_out_without_stalling_batch() {
        let hang = Arc::new(FnTool::new("hang", "never returns", |_args| async move {
            futures_util::future::pending::<()>().await;
            Ok(Value::Null)
        })) as Arc<dyn Tool>;
        let dispatcher = ToolDispatcher::new(
            registry_with(vec![hang, echo_tool()]),
            Duration::from_millis(50),
        );
        let start = Instant::now();
        let results = dispatcher
            .execute(&[
                ToolCallRequest::new("c1", "hang", json!({})),
                ToolCallRequest::new("c2", "echo", json!({"ok": true})),
            ])
            .await;
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(results[0].payload.error_kind(), Some(ToolErrorKind::ToolTimeout));
        assert_eq!(results[1].payload, ToolPayload::Success(json!({"ok": true})));
    }

    #[tokio::test]
    async fn test_output_order_ignores_completion_order() {
        let sleepy = Arc::new(FnTool::new("sleepy", "sleeps for ms", |args: Value| async move {
            let ms = args["ms"].as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(json!(ms))
        })) as Arc<dyn Tool>;
        let dispatcher = ToolDispatcher::new(registry_with(vec![sleepy]), Duration::from_secs(2));
        let calls: Vec<ToolCallRequest> = [120u64, 60, 0]
            .iter()
            .enumerate()
            .map(|(i, ms)| ToolCallRequest::new(format!("c{i}"), "sleepy", json!({"ms": ms})))
            .collect();
        let results = dispatcher.execute(&calls).await;
        let ids: Vec<&str> = results.iter().map(|r| r.call_id.as_str()).collect();
        assert_eq!(ids, vec!["c0", "c1", "c2"]);
        assert_eq!(results[0].payload, ToolPayload::Success(json!(120)));
    }

    #[tokio::test]
    async fn test_calls_run_concurrently() {
        let sleepy = Arc::new(FnTool::new("sleepy", "sleeps 100ms", |_args| async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(Value::Null)
        })) as Arc<dyn Tool>;
        let dispatcher = ToolDispatcher::new(registry_with(vec![sleepy]), Duration::from_secs(2));
        let calls: Vec<ToolCallRequest> = (0..4)
            .map(|i| ToolCallRequest::new(format!("c{i}"), "sleepy", json!({})))
            .collect();
        let start = Instant::now();
        dispatcher.execute(&calls).await;
        assert!(start.elapsed() < Duration::from_millis(350));
    }

    /// 共用一个通道的慢工具：每次调用 300ms
    struct LanedTool {
        lane: CallLane,
    }

    #[async_trait::async_trait]
    impl Tool for LanedTool {
        fn name(&self) -> &str {
            "laned"
        }

        fn description(&self) -> &str {
            "serialised slow call"
        }

        fn call_lane(&self) -> Option<CallLane> {
            Some(Arc::clone(&self.lane))
        }

        async fn call(&self, _args: Value) -> Result<Value, String> {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(json!("done"))
        }
    }

    #[tokio::test]
    async fn test_lane_wait_is_not_counted_against_timeout() {
        let tool: Arc<dyn Tool> = Arc::new(LanedTool { lane: CallLane::default() });
        let dispatcher = ToolDispatcher::new(registry_with(vec![tool]), Duration::from_millis(500));
        let calls: Vec<_> = (0..3)
            .map(|i| ToolCallRequest::new(format!("c{i}"), "laned", json!({})))
            .collect();

        let started = Instant::now();
        let results = dispatcher.execute(&calls).await;

        for result in &results {
            assert_eq!(result.payload, ToolPayload::Success(json!("done")));
        }
        // 串行执行
        assert!(started.elapsed() >= Duration::from_millis(900));
    }
}
