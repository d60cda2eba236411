//! 决策循环事件：供调用方实时观察迭代、模型调用、工具调用与结果

use serde::Serialize;

/// 单步过程事件（可序列化为 JSON）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    /// 新一轮迭代开始
    IterationStarted {
        iteration: usize,
        max_iterations: usize,
        depth: u32,
    },
    /// 正在调用模型（附带本轮可用工具数）
    ModelCall { tools: usize },
    /// 模型在工具调用之外给出的中间文本
    Thinking { text: String },
    /// 发起工具调用
    ToolCall {
        call_id: String,
        tool: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览）
    ToolResult {
        call_id: String,
        tool: String,
        ok: bool,
        preview: String,
    },
    /// 最终回答
    Final { text: String },
    /// 达到 max_iterations 仍无最终回答
    BudgetExceeded { iterations: usize },
    /// 会话中止
    Aborted { reason: String },
}
