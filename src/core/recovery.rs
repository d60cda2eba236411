//! 错误恢复引擎
//!
//! 将单次工具调用的错误映射为 RecoveryAction：写回历史让模型自我纠正，或中止整个会话。
//! 只有递归超限会中止会话；进程崩溃、超时、工具自身失败都留在各自的结果槽位里。

use crate::core::{RecursionLimitError, ToolCallError};
use crate::tools::ToolCallResult;

/// 恢复动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 作为 tool-result 文本交给模型
    FoldIntoHistory,
    /// 会话进入 Aborted
    AbortSession,
}

#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, err: &ToolCallError) -> RecoveryAction {
        match err {
            ToolCallError::RecursionLimit(_) => RecoveryAction::AbortSession,
            ToolCallError::Process(_)
            | ToolCallError::Invocation(_)
            | ToolCallError::Timeout { .. }
            | ToolCallError::UnknownTool(_)
            | ToolCallError::Cancelled => RecoveryAction::FoldIntoHistory,
        }
    }

    /// 一批结果中第一个需要中止会话的递归超限
    pub fn escalation(&self, results: &[ToolCallResult]) -> Option<RecursionLimitError> {
        results.iter().find_map(|r| match &r.outcome {
            Err(e) if self.classify(e) == RecoveryAction::AbortSession => match e {
                ToolCallError::RecursionLimit(limit) => Some(*limit),
                _ => None,
            },
            _ => None,
        })
    }
}
