//! 认知层：决策主循环与过程事件

pub mod events;
pub mod loop_;

pub use events::LoopEvent;
pub use loop_::{normalize_call_ids, run_query, LoopContext, RunOutcome, BUDGET_EXCEEDED_PREFIX};
