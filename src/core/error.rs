//! 错误类型
//!
//! 按层划分：工具进程（ToolProcessError）、工具自身失败（ToolInvocationError）、
//! 单次调用结果槽位（ToolCallError）、模型后端（LlmError）、递归深度（RecursionLimitError），
//! 以及会话级致命错误（OrchestratorError）。与 RecoveryEngine 配合决定「写回历史」还是「中止会话」。

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::ProcessState;

/// 工具进程级错误：启动失败、握手超时/格式错误、意外崩溃。只对该进程致命，会话继续使用其余工具。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolProcessError {
    #[error("failed to spawn tool process '{name}': {reason}")]
    Spawn { name: String, reason: String },

    #[error("tool process '{name}' did not answer the handshake within {timeout:?}")]
    HandshakeTimeout { name: String, timeout: Duration },

    #[error("tool process '{name}' sent a malformed handshake: {reason}")]
    MalformedHandshake { name: String, reason: String },

    /// 同一会话内工具名必须唯一，冲突在握手阶段发现并上报，不做静默覆盖
    #[error("tool '{tool}' from process '{name}' collides with the same tool from '{existing}'")]
    NameCollision {
        tool: String,
        name: String,
        existing: String,
    },

    #[error("tool process '{name}' crashed: {reason}")]
    Crashed { name: String, reason: String },

    #[error("tool process '{name}' is not accepting calls (state: {state:?})")]
    NotRunning { name: String, state: ProcessState },

    #[error("I/O error talking to tool process '{name}': {reason}")]
    Io { name: String, reason: String },
}

/// 工具自身报告的失败（参数错误、内部故障）；作为 tool-result 内容交给模型自我纠正
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ToolInvocationError {
    pub kind: String,
    pub message: String,
    /// 结构化附加信息（如递归超限时的深度）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ToolInvocationError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            data: None,
        }
    }

    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::new("invalid_arguments", message)
    }

    /// 递归超限的线上表示
    pub fn recursion_limit(err: RecursionLimitError) -> Self {
        Self {
            kind: crate::tools::protocol::RECURSION_LIMIT_KIND.to_string(),
            message: err.to_string(),
            data: Some(serde_json::json!({
                "child_depth": err.child_depth,
                "max_depth": err.max_depth,
            })),
        }
    }

    /// kind 为 recursion_limit 时还原为 RecursionLimitError
    pub fn as_recursion_limit(&self) -> Option<RecursionLimitError> {
        if self.kind != crate::tools::protocol::RECURSION_LIMIT_KIND {
            return None;
        }
        let data = self.data.as_ref();
        let field = |key: &str| {
            data.and_then(|d| d.get(key))
                .and_then(|v| v.as_u64())
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(0)
        };
        Some(RecursionLimitError {
            child_depth: field("child_depth"),
            max_depth: field("max_depth"),
        })
    }
}

/// 嵌套深度超限：在子会话创建之前抛出，绝不部分启动子编排器
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("recursion limit reached: child depth {child_depth} exceeds max_recursion_depth {max_depth}")]
pub struct RecursionLimitError {
    pub child_depth: u32,
    pub max_depth: u32,
}

/// 单次工具调用的错误槽位：每个 ToolCallRequest 恰好对应一个结果，失败也不例外
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolCallError {
    #[error(transparent)]
    Process(#[from] ToolProcessError),

    #[error(transparent)]
    Invocation(#[from] ToolInvocationError),

    #[error("tool '{tool}' timed out after {timeout:?}")]
    Timeout { tool: String, timeout: Duration },

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error(transparent)]
    RecursionLimit(#[from] RecursionLimitError),

    /// 会话被关闭时仍未返回的调用
    #[error("tool call cancelled by session shutdown")]
    Cancelled,
}

impl ToolCallError {
    /// 工具进程返回的失败；recursion_limit 还原为 RecursionLimit，其余保持 Invocation
    pub fn from_invocation(err: ToolInvocationError) -> Self {
        match err.as_recursion_limit() {
            Some(limit) => ToolCallError::RecursionLimit(limit),
            None => ToolCallError::Invocation(err),
        }
    }

    /// 错误类别（审计日志与线协议 error.kind 使用）
    pub fn kind(&self) -> &str {
        match self {
            ToolCallError::Process(_) => "tool_process",
            ToolCallError::Invocation(e) => &e.kind,
            ToolCallError::Timeout { .. } => "timeout",
            ToolCallError::UnknownTool(_) => "unknown_tool",
            ToolCallError::RecursionLimit(_) => crate::tools::protocol::RECURSION_LIMIT_KIND,
            ToolCallError::Cancelled => "cancelled",
        }
    }
}

/// 模型后端错误（ModelProviderError）：瞬时错误按指数退避重试，不可重试错误立即上抛
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("model request timed out after {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited (retry after {retry_after_ms:?} ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// 返回内容无法解析为 Final / ToolCalls（原实现对不可用的工具调用生成会重试）
    #[error("malformed model response: {0}")]
    MalformedResponse(String),

    #[error("model call failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<LlmError> },
}

impl LlmError {
    /// 是否属于瞬时错误（超时、限流、5xx、网络、响应格式）
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::Timeout(_)
                | LlmError::Network(_)
                | LlmError::RateLimited { .. }
                | LlmError::Server { .. }
                | LlmError::MalformedResponse(_)
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimited {
                retry_after_ms: Some(ms),
            } => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }
}

/// 配置错误：加载失败、未知字段、取值非法
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing credential: environment variable {0} is not set")]
    MissingCredential(&'static str),
}

/// 会话级致命错误：只有这些会让 Orchestrator 进入 Aborted / Dead
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("model provider failed: {0}")]
    ModelProvider(#[from] LlmError),

    #[error(transparent)]
    RecursionLimit(#[from] RecursionLimitError),

    #[error("none of the {attempted} configured tool sources could be launched")]
    NoToolsAvailable {
        attempted: usize,
        failures: Vec<ToolProcessError>,
    },

    #[error("session has been shut down")]
    SessionClosed,

    #[error("session was cancelled by shutdown")]
    Cancelled,

    #[error(transparent)]
    Config(#[from] ConfigError),
}
