//! 工具参数 JSON Schema 生成（schemars）

use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::Value;

/// Agent 工具的参数：交给子 Agent 处理的查询
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct AgentToolArgs {
    /// The task or question for the sub-agent, self-contained
    pub query: String,
}

/// 生成 T 的参数 schema，去掉 `$schema` / `title` 元信息
pub fn argument_schema<T: JsonSchema>() -> Value {
    let mut schema = serde_json::to_value(schema_for!(T))
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}));
    if let Some(obj) = schema.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    schema
}
