//! 核心编排层：错误与恢复、状态、构建器、编排器、优雅关闭

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod shutdown;
pub mod state;

pub use builder::{OrchestratorBuilder, DEFAULT_SYSTEM_PROMPT};
pub use error::{
    ConfigError, LlmError, OrchestratorError, RecursionLimitError, ToolCallError, ToolInvocationError,
    ToolProcessError,
};
pub use orchestrator::{Orchestrator, ShutdownHandle};
pub use recovery::{RecoveryAction, RecoveryEngine};
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use state::{LoopPhase, ProcessState, SessionSnapshot};
