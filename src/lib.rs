//! Fractal - 递归 Agent-Tool 编排引擎
//!
//! 模块划分：
//! - **config**: 配置加载（TOML + FRACTAL_ 环境变量）
//! - **core**: 错误、状态、恢复、构建器、编排器、优雅关闭
//! - **llm**: 模型后端抽象与实现（OpenAI 兼容 / Mock / 脚本）及重试
//! - **memory**: 会话消息日志与持久化
//! - **observability**: tracing 日志
//! - **react**: 决策主循环与循环事件
//! - **tools**: NDJSON 线协议、工具进程监管、并发分发、工具服务端、分形 Agent 工具

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;

pub use crate::core::{Orchestrator, OrchestratorBuilder, OrchestratorError, ShutdownHandle};
pub use crate::react::RunOutcome;
