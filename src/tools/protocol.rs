//! 工具进程线协议：基于 stdin/stdout 的逐行 JSON
//!
//! - `{"type":"handshake"}` → `{"type":"handshake","tools":[{tool_name,description,argument_schema}],"concurrent":bool}`
//! - `{"type":"invoke","call_id","tool_name","arguments","depth"}` → `{"call_id","result"}` 或 `{"call_id","error":{kind,message}}`
//! - `{"type":"shutdown"}`：停止读取，排空在途调用后退出
//!
//! depth 为调用方会话的嵌套深度，跨进程边界显式传递。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::ToolInvocationError;
use crate::llm::ToolSchema;

/// 递归超限在线协议中的 error.kind
pub const RECURSION_LIMIT_KIND: &str = "recursion_limit";

/// 客户端 → 工具进程
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Handshake,
    Invoke {
        call_id: String,
        tool_name: String,
        #[serde(default)]
        arguments: Value,
        #[serde(default)]
        depth: u32,
    },
    Shutdown,
}

/// 握手中声明的单个工具
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub tool_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_object_schema")]
    pub argument_schema: Value,
}

impl ToolSpec {
    pub fn to_schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.tool_name.clone(),
            description: self.description.clone(),
            parameters: self.argument_schema.clone(),
        }
    }
}

fn empty_object_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// 握手应答
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    #[serde(rename = "type")]
    pub kind: HandshakeTag,
    pub tools: Vec<ToolSpec>,
    /// 是否可同时处理多个调用；false 时同一进程的调用串行
    #[serde(default)]
    pub concurrent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeTag {
    Handshake,
}

impl HandshakeResponse {
    pub fn new(tools: Vec<ToolSpec>, concurrent: bool) -> Self {
        Self {
            kind: HandshakeTag::Handshake,
            tools,
            concurrent,
        }
    }
}

/// 调用应答；error 存在即失败，否则 result（缺省为 null）即成功
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeResponse {
    pub call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolInvocationError>,
}

impl InvokeResponse {
    pub fn ok(call_id: impl Into<String>, result: Value) -> Self {
        Self {
            call_id: call_id.into(),
            result: Some(result),
            error: None,
        }
    }

    pub fn err(call_id: impl Into<String>, error: ToolInvocationError) -> Self {
        Self {
            call_id: call_id.into(),
            result: None,
            error: Some(error),
        }
    }

    pub fn into_result(self) -> Result<Value, ToolInvocationError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// 序列化为一行（末尾带换行）
pub fn encode_line<T: Serialize>(frame: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut line = serde_json::to_vec(frame)?;
    line.push(b'\n');
    Ok(line)
}
