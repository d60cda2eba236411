//! Echo 工具（测试与 mock 模式用）

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::ToolInvocationError;
use crate::tools::protocol::ToolSpec;
use crate::tools::ToolHandler;

/// Echo 工具：回显 text 参数
pub struct EchoHandler;

#[async_trait]
impl ToolHandler for EchoHandler {
    fn tools(&self) -> Vec<ToolSpec> {
        vec![ToolSpec {
            tool_name: "echo".to_string(),
            description: "Echo text back. Args: {\"text\": \"message\"}".to_string(),
            argument_schema: json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            }),
        }]
    }

    async fn call(&self, tool_name: &str, arguments: Value, _depth: u32) -> Result<Value, ToolInvocationError> {
        if tool_name != "echo" {
            return Err(ToolInvocationError::new("unknown_tool", format!("no tool named '{tool_name}'")));
        }
        let text = arguments
            .get("text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolInvocationError::invalid_arguments("missing string field 'text'"))?;
        Ok(Value::String(text.to_string()))
    }
}
