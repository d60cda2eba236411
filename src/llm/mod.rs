//! 模型层：后端抽象、重试装饰、OpenAI 兼容实现与 Mock

pub mod factory;
pub mod mock;
pub mod openai;
pub mod traits;

pub use factory::create_provider;
pub use mock::{MockProvider, ScriptedProvider};
pub use openai::{OpenAiAdapter, OpenAiCompatibleProvider, TokenUsage};
pub use traits::{ModelProvider, Outcome, RetryPolicy, RetryingProvider, ToolCallRequest, ToolSchema};
