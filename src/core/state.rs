//! 状态定义：工具进程生命周期、决策循环阶段与会话快照
//!
//! 进程：Starting → Ready ⇄ Busy → Terminating → Dead（崩溃时任意状态直接进入 Dead）。
//! 循环：AwaitingModel → ExecutingTools → AwaitingModel …，终止于 Completed / Failed / Aborted。

use serde::Serialize;

/// 工具进程生命周期状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ProcessState {
    /// 已启动，握手未完成
    Starting,
    /// 空闲，可接受调用
    Ready,
    /// 至少有一个调用在途
    Busy,
    /// 已请求关闭，等待在途调用排空
    Terminating,
    /// 已退出（正常关闭、强杀或崩溃）
    Dead,
}

impl ProcessState {
    /// 是否可以接受新的调用
    pub fn accepts_calls(self) -> bool {
        matches!(self, ProcessState::Ready | ProcessState::Busy)
    }

    /// 状态机允许的迁移；Dead 为终态
    pub fn can_transition_to(self, next: ProcessState) -> bool {
        use ProcessState::{Busy, Dead, Ready, Starting, Terminating};
        match (self, next) {
            (Dead, _) => false,
            (_, Dead) => true,
            (_, Terminating) => self != Terminating,
            (Starting, Ready) => true,
            (Ready, Busy) | (Busy, Ready) => true,
            _ => false,
        }
    }
}

/// 编排器决策循环阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum LoopPhase {
    /// 尚未处理查询
    Idle,
    /// 等待模型给出 Final 或 ToolCalls
    AwaitingModel,
    /// 正在执行本轮工具调用
    ExecutingTools,
    /// 模型给出最终回答
    Completed,
    /// 达到 max_iterations 仍未得到最终回答（返回部分答案，不抛错）
    Failed,
    /// 递归超限或模型致命错误
    Aborted,
    /// 已 shutdown，不再接受查询
    Dead,
}

impl LoopPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LoopPhase::Completed | LoopPhase::Failed | LoopPhase::Aborted | LoopPhase::Dead
        )
    }
}

/// 会话快照（日志与调试用）
#[derive(Clone, Debug, Serialize)]
pub struct SessionSnapshot {
    pub phase: LoopPhase,
    pub iteration: usize,
    pub depth: u32,
    pub message_count: usize,
    pub tool_names: Vec<String>,
}
