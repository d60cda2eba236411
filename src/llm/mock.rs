//! Mock 后端（无需 API）
//!
//! - MockProvider：回显用户最后一条消息；若会话中有 echo 工具则先调用它，便于本地跑通完整循环。
//! - ScriptedProvider：按脚本依次返回 Outcome / LlmError，并记录每次调用看到的历史（测试用）。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::core::LlmError;
use crate::llm::{ModelProvider, Outcome, ToolCallRequest, ToolSchema};
use crate::memory::{Message, Role};

/// 回显后端
#[derive(Debug, Default)]
pub struct MockProvider;

#[async_trait]
impl ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(&self, history: &[Message], tools: &[ToolSchema]) -> Result<Outcome, LlmError> {
        let Some(last) = history.last() else {
            return Ok(Outcome::final_text("(no input)"));
        };
        match last.role {
            Role::ToolResult => Ok(Outcome::final_text(last.content.clone())),
            _ if tools.iter().any(|t| t.name == "echo") => Ok(Outcome::tool_calls(vec![
                ToolCallRequest::new(
                    uuid::Uuid::new_v4().to_string(),
                    "echo",
                    json!({ "text": format!("Echo from Mock: {}", last.content) }),
                ),
            ])),
            _ => Ok(Outcome::final_text(format!("Echo from Mock: {}", last.content))),
        }
    }
}

/// 脚本后端：依次弹出预设结果；耗尽后返回 fallback（未设置则报 InvalidRequest）
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<Outcome, LlmError>>>,
    fallback: Option<Outcome>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    histories: Mutex<Vec<Vec<Message>>>,
    tool_sets: Mutex<Vec<Vec<String>>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<Outcome, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            delay: None,
            calls: AtomicUsize::new(0),
            histories: Mutex::new(Vec::new()),
            tool_sets: Mutex::new(Vec::new()),
        }
    }

    /// 脚本耗尽后一直返回该结果
    pub fn with_fallback(mut self, outcome: Outcome) -> Self {
        self.fallback = Some(outcome);
        self
    }

    /// 每次调用前等待（用于超时测试）
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 已发生的 generate 调用次数
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 每次调用时看到的历史
    pub fn histories(&self) -> Vec<Vec<Message>> {
        self.histories.lock().map(|h| h.clone()).unwrap_or_default()
    }

    /// 每次调用时看到的工具名（已排序）
    pub fn tool_sets(&self) -> Vec<Vec<String>> {
        self.tool_sets.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, history: &[Message], tools: &[ToolSchema]) -> Result<Outcome, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut h) = self.histories.lock() {
            h.push(history.to_vec());
        }
        if let Ok(mut t) = self.tool_sets.lock() {
            let mut names: Vec<String> = tools.iter().map(|s| s.name.clone()).collect();
            names.sort();
            t.push(names);
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match (next, &self.fallback) {
            (Some(result), _) => result,
            (None, Some(outcome)) => Ok(outcome.clone()),
            (None, None) => Err(LlmError::InvalidRequest("script exhausted".to_string())),
        }
    }
}
