//! 模型后端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Qwen / Mock）实现 ModelProvider：
//! generate(history, tool_schemas) → Outcome（Final 或 ToolCalls）。
//! RetryingProvider 在任意后端外层加上超时与指数退避重试。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::LlmError;
use crate::memory::Message;

/// 提供给模型的工具描述（名称、说明、参数 JSON Schema）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub parameters: Value,
}

/// 模型发起的单个工具调用；call_id 在一轮迭代内唯一
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCallRequest {
    pub fn new(call_id: impl Into<String>, tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            arguments,
        }
    }
}

/// 一次 generate 的结果：最终回答，或一组工具调用（可附带模型的中间文本）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outcome {
    Final {
        text: String,
    },
    ToolCalls {
        #[serde(default)]
        content: String,
        calls: Vec<ToolCallRequest>,
    },
}

impl Outcome {
    pub fn final_text(text: impl Into<String>) -> Self {
        Outcome::Final { text: text.into() }
    }

    pub fn tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Outcome::ToolCalls {
            content: String::new(),
            calls,
        }
    }
}

/// 模型后端 trait；tools 为空表示纯对话
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// 后端名（日志用）
    fn name(&self) -> &str;

    /// 根据完整历史与当前工具集生成下一步；不修改会话存储
    async fn generate(&self, history: &[Message], tools: &[ToolSchema]) -> Result<Outcome, LlmError>;
}

/// 重试策略：瞬时错误按 base * 2^n 退避（上限 max_delay），遇到 retry-after 取较大者
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// 总尝试次数（含第一次），至少为 1
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// 单次尝试超时；None 表示不限
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            attempt_timeout: Some(Duration::from_secs(120)),
        }
    }
}

impl RetryPolicy {
    /// 第 attempt 次失败（从 0 开始）之后的等待时间
    pub fn delay_for(&self, attempt: u32, err: &LlmError) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let backoff = self.base_delay.saturating_mul(factor).min(self.max_delay);
        err.retry_after().map_or(backoff, |hint| hint.max(backoff))
    }

    /// 带重试地调用 provider.generate
    pub async fn run(
        &self,
        provider: &dyn ModelProvider,
        history: &[Message],
        tools: &[ToolSchema],
    ) -> Result<Outcome, LlmError> {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            let result = match self.attempt_timeout {
                Some(limit) => tokio::time::timeout(limit, provider.generate(history, tools))
                    .await
                    .unwrap_or(Err(LlmError::Timeout(limit))),
                None => provider.generate(history, tools).await,
            };
            match result {
                Ok(outcome) => return Ok(outcome),
                Err(e) if !e.is_transient() => {
                    tracing::warn!(provider = provider.name(), error = %e, "model call failed (not retryable)");
                    return Err(e);
                }
                Err(e) if attempt + 1 >= max_attempts => {
                    tracing::warn!(provider = provider.name(), attempts = max_attempts, error = %e, "model retries exhausted");
                    return Err(LlmError::RetriesExhausted {
                        attempts: max_attempts,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    let wait = self.delay_for(attempt, &e);
                    tracing::warn!(
                        provider = provider.name(),
                        attempt = attempt + 1,
                        max_attempts,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "transient model error, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// 重试装饰器：对内层后端施加 RetryPolicy
pub struct RetryingProvider {
    inner: Arc<dyn ModelProvider>,
    policy: RetryPolicy,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn ModelProvider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl ModelProvider for RetryingProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate(&self, history: &[Message], tools: &[ToolSchema]) -> Result<Outcome, LlmError> {
        self.policy.run(self.inner.as_ref(), history, tools).await
    }
}
