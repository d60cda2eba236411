//! 会话存储：只追加的有序消息日志
//!
//! 每个 Orchestrator 独占一个 ConversationSession；消息一旦追加不可修改、不可删除、不可重排。
//! 与具体模型后端的线格式转换由 llm 层的适配器负责，存储本身与后端无关。

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::llm::ToolCallRequest;

/// 消息角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    /// 工具执行结果（成功或错误文本）
    ToolResult,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// assistant 消息发起的工具调用
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// tool_result 消息所响应的调用 id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl Message {
    fn plain(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content.into())
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content.into())
    }

    /// 携带工具调用请求的 assistant 消息
    pub fn assistant_tool_calls(content: impl Into<String>, calls: Vec<ToolCallRequest>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::plain(Role::Assistant, content.into())
        }
    }

    pub fn tool_result(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            tool_name: Some(tool_name.into()),
            ..Self::plain(Role::ToolResult, content.into())
        }
    }

    /// 本消息引用的调用 id（assistant 为发起的调用，tool_result 为响应的调用）
    pub fn referenced_call_ids(&self) -> Vec<&str> {
        if let Some(id) = &self.tool_call_id {
            return vec![id.as_str()];
        }
        self.tool_calls.iter().map(|c| c.call_id.as_str()).collect()
    }
}

/// 只追加的会话存储
#[derive(Clone, Debug, Default)]
pub struct ConversationStore {
    messages: Vec<Message>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以 system prompt 开头的存储；空 prompt 不写入
    pub fn with_system_prompt(prompt: &str) -> Self {
        let mut store = Self::new();
        if !prompt.trim().is_empty() {
            store.append(Message::system(prompt));
        }
        store
    }

    /// 追加到末尾，返回该消息的下标
    pub fn append(&mut self, message: Message) -> usize {
        self.messages.push(message);
        self.messages.len() - 1
    }

    /// 只读有序视图，作为模型输入
    pub fn snapshot(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.messages)
    }

    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        Ok(Self {
            messages: serde_json::from_str(data)?,
        })
    }

    /// 调试输出：每条消息一行，内容截断到 50 字符
    pub fn format_debug_output(&self) -> String {
        let mut out = String::from("=== CONVERSATION HISTORY ===\n");
        for (i, m) in self.messages.iter().enumerate() {
            let preview: String = m.content.chars().take(47).collect();
            let preview = if m.content.chars().count() > 50 {
                format!("{preview}...")
            } else {
                m.content.clone()
            };
            let _ = match m.role {
                Role::System => writeln!(out, "[{i}] SYSTEM: {preview}"),
                Role::User => writeln!(out, "[{i}] USER: {preview}"),
                Role::Assistant if !m.tool_calls.is_empty() => {
                    let names: Vec<&str> = m.tool_calls.iter().map(|c| c.tool_name.as_str()).collect();
                    writeln!(out, "[{i}] ASSISTANT [TOOLS: {}]: {preview}", names.join(", "))
                }
                Role::Assistant => writeln!(out, "[{i}] ASSISTANT: {preview}"),
                Role::ToolResult => writeln!(
                    out,
                    "[{i}] TOOL [{}]: {preview}",
                    m.tool_name.as_deref().unwrap_or("unknown")
                ),
            };
        }
        out.push_str("============================");
        out
    }
}

/// 单个会话：消息日志 + 循环计数器（当前迭代、递归深度）
#[derive(Clone, Debug)]
pub struct ConversationSession {
    pub store: ConversationStore,
    pub iteration: usize,
    depth: u32,
}

impl ConversationSession {
    pub fn new(system_prompt: &str, depth: u32) -> Self {
        Self {
            store: ConversationStore::with_system_prompt(system_prompt),
            iteration: 0,
            depth,
        }
    }

    /// 用已有的消息日志恢复会话（迭代计数从 0 开始）
    pub fn with_store(store: ConversationStore, depth: u32) -> Self {
        Self {
            store,
            iteration: 0,
            depth,
        }
    }

    /// 本会话所处的嵌套深度（根会话为 0），创建后不变
    pub fn depth(&self) -> u32 {
        self.depth
    }
}
