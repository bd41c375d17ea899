//! 对话编排器：单轮状态机与会话主控循环
//!
//! 一个轮次：AwaitingModelDecision →（无工具请求 → Done）|（DispatchingTools → AwaitingFinalReply → Done）。
//! 轮次内的消息写入 TurnBuffer，到达 Done 才提交到历史；模型调用失败或被取消时缓冲区被丢弃，历史不变。
//! 每个用户轮次最多一轮工具调用。
//!
//! create_agent 负责：加载配置、构建运行时、建立 cmd/state 两通道，
//! 并在后台任务中消费用户命令（Submit/Cancel/Clear/Quit），驱动轮次并更新 UI 状态。

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::config::{load_config, validate_config};
use crate::core::{
    build_runtime, AgentPhase, ChatError, SessionSupervisor, TurnEvent, TurnPhase, UiState,
};
use crate::llm::LlmClient;
use crate::memory::{AssistantReply, ChatSession, Message, ToolResult};
use crate::tools::{ToolDispatcher, ToolSpec};

/// 一个完成的轮次
#[derive(Clone, Debug)]
pub struct TurnOutcome {
    /// 用户可见的最终回复
    pub reply: String,
    /// 本轮工具结果（与请求同序）；未调用工具时为空
    pub tool_results: Vec<ToolResult>,
    /// 经过的阶段（以 Done 结尾）
    pub phases: Vec<TurnPhase>,
    /// 提交到历史的消息条数
    pub appended: usize,
}

/// 对话编排器：持有模型客户端、工具调度器与绑定给模型的工具列表
pub struct ConversationOrchestrator {
    llm: Arc<dyn LlmClient>,
    dispatcher: ToolDispatcher,
    tool_specs: Vec<ToolSpec>,
    events: Option<mpsc::UnboundedSender<TurnEvent>>,
}

impl ConversationOrchestrator {
    pub fn new(llm: Arc<dyn LlmClient>, dispatcher: ToolDispatcher) -> Self {
        let tool_specs = dispatcher.registry().specs();
        Self {
            llm,
            dispatcher,
            tool_specs,
            events: None,
        }
    }

    /// 订阅轮次事件（阶段迁移、工具调用开始 / 结束）
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<TurnEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn tool_specs(&self) -> &[ToolSpec] {
        &self.tool_specs
    }

    pub fn llm(&self) -> &Arc<dyn LlmClient> {
        &self.llm
    }

    fn emit(&self, event: TurnEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn enter(&self, session: &ChatSession, phases: &mut Vec<TurnPhase>, phase: TurnPhase) {
        tracing::debug!(session = %session.id, phase = %phase, "turn phase");
        phases.push(phase);
        self.emit(TurnEvent::Phase(phase));
    }

    fn emit_usage(&self) {
        let (prompt_tokens, completion_tokens, total_tokens) = self.llm.token_usage();
        if total_tokens > 0 {
            self.emit(TurnEvent::TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens,
            });
        }
    }

    async fn invoke(
        &self,
        session: &ChatSession,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<AssistantReply, ChatError> {
        let reply = self.llm.complete(messages, tools).await.map_err(|e| {
            tracing::error!(session = %session.id, "model invocation failed: {}", e);
            ChatError::ModelInvocation(e)
        })?;
        self.emit_usage();
        Ok(reply)
    }

    /// 执行一个完整轮次；成功时历史追加 User、Assistant（及工具结果、最终回复），失败时历史不变
    pub async fn run_turn(
        &self,
        session: &mut ChatSession,
        user_input: &str,
    ) -> Result<TurnOutcome, ChatError> {
        let mut phases = Vec::with_capacity(4);
        let mut turn = session.history.begin_turn();
        turn.push(Message::user(user_input));
        tracing::info!(session = %session.id, input_len = user_input.len(), "turn started");

        self.enter(session, &mut phases, TurnPhase::AwaitingModelDecision);
        let decision = self
            .invoke(session, &turn.model_view(), &self.tool_specs)
            .await?;
        let requested = decision.tool_calls.clone();
        let decision_text = decision.content.clone();
        // 带工具调用的 Assistant 消息也保留在历史中供模型回放，只是不作为可见回复
        turn.push(decision);

        if requested.is_empty() {
            self.enter(session, &mut phases, TurnPhase::Done);
            let appended = session.history.commit(turn);
            tracing::info!(session = %session.id, appended, "turn done without tools");
            return Ok(TurnOutcome {
                reply: decision_text,
                tool_results: Vec::new(),
                phases,
                appended,
            });
        }

        self.enter(session, &mut phases, TurnPhase::DispatchingTools);
        tracing::info!(session = %session.id, calls = requested.len(), "dispatching tool calls");
        for call in &requested {
            self.emit(TurnEvent::ToolCallStarted {
                call_id: call.call_id.clone(),
                tool: call.tool_name.clone(),
            });
        }
        let results = self.dispatcher.execute(&requested).await;
        for (call, result) in requested.iter().zip(&results) {
            self.emit(TurnEvent::ToolCallFinished {
                call_id: result.call_id.clone(),
                tool: call.tool_name.clone(),
                error: result.payload.error_kind(),
            });
            turn.push(result.clone());
        }

        self.enter(session, &mut phases, TurnPhase::AwaitingFinalReply);
        // 第二次调用不绑定工具，迫使模型给出自然语言回复
        let final_reply = self.invoke(session, &turn.model_view(), &[]).await?;
        if final_reply.requests_tools() {
            tracing::warn!(
                session = %session.id,
                calls = final_reply.tool_calls.len(),
                "ignoring tool calls requested in final reply (single tool round per turn)"
            );
        }
        let reply = final_reply.content;
        turn.push(AssistantReply::text(reply.clone()));

        self.enter(session, &mut phases, TurnPhase::Done);
        let appended = session.history.commit(turn);
        tracing::info!(session = %session.id, appended, tools = results.len(), "turn done");
        Ok(TurnOutcome {
            reply,
            tool_results: results,
            phases,
            appended,
        })
    }

    /// 可取消的轮次：token 被取消时立即返回 Cancelled，未提交的缓冲区随之丢弃
    pub async fn run_turn_cancellable(
        &self,
        session: &mut ChatSession,
        user_input: &str,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, ChatError> {
        let session_id = session.id;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(session = %session_id, "turn cancelled by user");
                Err(ChatError::Cancelled)
            }
            result = self.run_turn(session, user_input) => result,
        }
    }
}

/// 从 UI 发往编排器的用户命令
#[derive(Debug, Clone)]
pub enum Command {
    /// 提交用户输入，触发一个轮次
    Submit(String),
    /// 取消当前轮次（Stop generating）
    Cancel,
    /// 清空对话（以同一系统提示开启新会话）
    Clear,
    /// 退出应用
    Quit,
}

/// 创建 Agent 运行时：返回命令发送端、状态接收端；后台任务消费命令并更新 state。
/// 配置缺失、凭据缺失、工具发现失败等启动错误在此直接返回，不会启动会话。
pub async fn create_agent(
    config_path: Option<PathBuf>,
) -> Result<(mpsc::UnboundedSender<Command>, watch::Receiver<UiState>), ChatError> {
    let cfg = load_config(config_path)?;
    validate_config(&cfg)?;
    let runtime = build_runtime(&cfg).await?;
    Ok(spawn_session(runtime.orchestrator, cfg.app.system_prompt.clone()))
}

/// 在后台任务中运行一个会话的命令循环
pub fn spawn_session(
    orchestrator: ConversationOrchestrator,
    system_prompt: String,
) -> (mpsc::UnboundedSender<Command>, watch::Receiver<UiState>) {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<TurnEvent>();
    let orchestrator = orchestrator.with_events(event_tx);

    // 两通道：UI -> Core 命令；Core -> UI 状态快照
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<Command>();
    let mut session = ChatSession::new(system_prompt);
    let (state_tx, state_rx) = watch::channel(UiState::idle(&session));

    tokio::spawn(async move {
        let mut supervisor = SessionSupervisor::new();
        tracing::info!(session = %session.id, started_at = %session.created_at.to_rfc3339(), "session started");

        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                Command::Submit(input) => {
                    let input = input.trim().to_string();
                    if input.is_empty() {
                        continue;
                    }
                    // 先乐观显示用户消息并锁定输入，再跑轮次
                    let pending = input.clone();
                    state_tx.send_modify(|s| {
                        s.phase = AgentPhase::Thinking;
                        s.pending_input = Some(pending);
                        s.active_tools.clear();
                        s.input_locked = true;
                        s.error_message = None;
                    });

                    let token = supervisor.begin_turn();
                    let mut quit = false;
                    let result = {
                        let turn = orchestrator.run_turn_cancellable(&mut session, &input, token);
                        tokio::pin!(turn);
                        loop {
                            tokio::select! {
                                result = &mut turn => break result,
                                Some(event) = event_rx.recv() => apply_event(&state_tx, event),
                                cmd = cmd_rx.recv() => match cmd {
                                    Some(Command::Cancel) => {
                                        supervisor.cancel_turn();
                                    }
                                    Some(Command::Quit) | None => {
                                        quit = true;
                                        supervisor.cancel_turn();
                                    }
                                    Some(other) => {
                                        tracing::warn!(?other, "turn in progress, ignoring command");
                                    }
                                },
                            }
                        }
                    };
                    supervisor.end_turn();
                    while event_rx.try_recv().is_ok() {}

                    let snapshot = session.snapshot();
                    let usage = orchestrator.llm().token_usage();
                    match result {
                        Ok(_) => state_tx.send_modify(|s| {
                            s.phase = AgentPhase::Idle;
                            s.history = snapshot;
                            s.pending_input = None;
                            s.active_tools.clear();
                            s.input_locked = false;
                            s.token_usage = usage;
                        }),
                        Err(e) => {
                            let phase = match e {
                                ChatError::Cancelled => AgentPhase::Idle,
                                _ => AgentPhase::Error,
                            };
                            state_tx.send_modify(|s| {
                                s.phase = phase;
                                s.history = snapshot;
                                s.pending_input = None;
                                s.active_tools.clear();
                                s.input_locked = false;
                                s.error_message = Some(e.to_string());
                            });
                        }
                    }
                    if quit {
                        break;
                    }
                }
                Command::Cancel => {
                    tracing::debug!("cancel requested with no turn in progress");
                }
                Command::Clear => {
                    session = session.restart();
                    tracing::info!(session = %session.id, "conversation cleared");
                    let _ = state_tx.send(UiState::idle(&session));
                }
                Command::Quit => break,
            }
        }

        supervisor.shutdown();
        tracing::info!(session = %session.id, "session loop exited");
    });

    (cmd_tx, state_rx)
}

fn apply_event(state_tx: &watch::Sender<UiState>, event: TurnEvent) {
    state_tx.send_modify(|s| match event {
        TurnEvent::Phase(phase) => s.phase = phase.into(),
        TurnEvent::ToolCallStarted { tool, .. } => s.active_tools.push(tool),
        TurnEvent::ToolCallFinished { tool, .. } => {
            if let Some(pos) = s.active_tools.iter().position(|t| *t == tool) {
                s.active_tools.remove(pos);
            }
        }
        TurnEvent::TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        } => s.token_usage = (prompt_tokens, completion_tokens, total_tokens),
    });
}
