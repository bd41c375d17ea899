//! 核心编排层：错误、轮次事件、状态投影、会话监管、运行时构建与主控循环

pub mod builder;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod session_supervisor;
pub mod state;

pub use builder::{build_runtime, create_discovery_from_config, create_llm_from_config, Runtime, RuntimeBuilder};
pub use error::{ChatError, ToolErrorKind};
pub use events::{TurnEvent, TurnPhase};
pub use orchestrator::{create_agent, spawn_session, Command, ConversationOrchestrator, TurnOutcome};
pub use session_supervisor::SessionSupervisor;
pub use state::{AgentPhase, UiState};
