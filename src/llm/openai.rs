//! OpenAI 兼容 chat/completions 后端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（DeepSeek、Qwen 兼容模式、OpenRouter、OpenAI 等）。
//! OpenAiAdapter 负责会话消息 ⇄ 请求消息/tool_calls、工具集 ⇄ tools[type=function] 的转换。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionMessageToolCall, ChatCompletionMessageToolCalls, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestToolMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionResponseMessage, ChatCompletionTool, ChatCompletionTools,
    CreateChatCompletionRequestArgs, FunctionCall, FunctionObjectArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use serde_json::Value;

use crate::core::LlmError;
use crate::llm::{ModelProvider, Outcome, ToolCallRequest, ToolSchema};
use crate::memory::{Message, Role};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
    }

    /// (prompt, completion, total)
    pub fn get(&self) -> (u64, u64, u64) {
        let p = self.prompt_tokens.load(Ordering::Relaxed);
        let c = self.completion_tokens.load(Ordering::Relaxed);
        (p, c, p + c)
    }
}

fn build_error(e: OpenAIError) -> LlmError {
    LlmError::InvalidRequest(e.to_string())
}

/// OpenAI chat/completions 类型适配器
pub struct OpenAiAdapter;

impl OpenAiAdapter {
    pub fn to_request_messages(history: &[Message]) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        history
            .iter()
            .map(|m| {
                let message = match m.role {
                    Role::System => ChatCompletionRequestMessage::System(
                        ChatCompletionRequestSystemMessageArgs::default()
                            .content(m.content.clone())
                            .build()
                            .map_err(build_error)?,
                    ),
                    Role::User => ChatCompletionRequestMessage::User(
                        ChatCompletionRequestUserMessageArgs::default()
                            .content(m.content.clone())
                            .build()
                            .map_err(build_error)?,
                    ),
                    Role::Assistant => {
                        let mut args = ChatCompletionRequestAssistantMessageArgs::default();
                        args.content(m.content.clone());
                        if !m.tool_calls.is_empty() {
                            args.tool_calls(
                                m.tool_calls
                                    .iter()
                                    .map(|c| {
                                        ChatCompletionMessageToolCalls::Function(ChatCompletionMessageToolCall {
                                            id: c.call_id.clone(),
                                            function: FunctionCall {
                                                name: c.tool_name.clone(),
                                                arguments: c.arguments.to_string(),
                                            },
                                        })
                                    })
                                    .collect::<Vec<_>>(),
                            );
                        }
                        ChatCompletionRequestMessage::Assistant(args.build().map_err(build_error)?)
                    }
                    Role::ToolResult => ChatCompletionRequestMessage::Tool(
                        ChatCompletionRequestToolMessageArgs::default()
                            .content(m.content.clone())
                            .tool_call_id(m.tool_call_id.clone().unwrap_or_default())
                            .build()
                            .map_err(build_error)?,
                    ),
                };
                Ok(message)
            })
            .collect()
    }

    pub fn to_request_tools(tools: &[ToolSchema]) -> Result<Vec<ChatCompletionTools>, LlmError> {
        tools
            .iter()
            .map(|t| {
                let function = FunctionObjectArgs::default()
                    .name(t.name.clone())
                    .description(t.description.clone())
                    .parameters(t.parameters.clone())
                    .build()
                    .map_err(build_error)?;
                let tool = ChatCompletionTool { function };
                Ok(ChatCompletionTools::Function(tool))
            })
            .collect()
    }

    /// 将返回的 assistant 消息解析为 Outcome；无 tool_calls 即 Final。
    /// 参数不是 JSON 对象的工具调用按响应格式错误处理，交由重试层重新生成
    pub fn parse_message(message: ChatCompletionResponseMessage) -> Result<Outcome, LlmError> {
        let content = message.content.unwrap_or_default();
        let calls = message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| match tc {
                ChatCompletionMessageToolCalls::Function(call) => Ok(ToolCallRequest {
                    arguments: parse_arguments(&call.function.name, &call.function.arguments)?,
                    call_id: call.id,
                    tool_name: call.function.name,
                }),
                other => Err(LlmError::MalformedResponse(format!(
                    "unsupported tool call type: {other:?}"
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        if calls.is_empty() {
            Ok(Outcome::Final { text: content })
        } else {
            Ok(Outcome::ToolCalls { content, calls })
        }
    }
}

fn parse_arguments(tool: &str, raw: &str) -> Result<Value, LlmError> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(other) => Err(LlmError::MalformedResponse(format!(
            "arguments for tool '{tool}' must be a JSON object, got {other}"
        ))),
        Err(e) => {
            tracing::warn!(tool, error = %e, "tool call arguments are not valid JSON");
            Err(LlmError::MalformedResponse(format!(
                "arguments for tool '{tool}' are not valid JSON: {e}"
            )))
        }
    }
}

/// 按 API 错误的 type/code 文本归类
pub(crate) fn classify_api_error(kind: &str, message: String) -> LlmError {
    let kind = kind.to_ascii_lowercase();
    if kind.contains("rate_limit") || kind.contains("insufficient_quota") {
        LlmError::RateLimited { retry_after_ms: None }
    } else if kind.contains("invalid_api_key") || kind.contains("authentication") || kind.contains("permission") {
        LlmError::Auth(message)
    } else if kind.contains("server_error") || kind.contains("overloaded") || kind.contains("service_unavailable") {
        LlmError::Server { status: 500, body: message }
    } else {
        LlmError::InvalidRequest(message)
    }
}

fn map_openai_error(e: OpenAIError) -> LlmError {
    match e {
        OpenAIError::ApiError(api) => {
            let kind = format!("{:?} {:?}", api.r#type, api.code);
            classify_api_error(&kind, api.message)
        }
        OpenAIError::JSONDeserialize(..) => LlmError::MalformedResponse(e.to_string()),
        OpenAIError::InvalidArgument(m) => LlmError::InvalidRequest(m),
        other => LlmError::Network(other.to_string()),
    }
}

/// OpenAI 兼容后端
pub struct OpenAiCompatibleProvider {
    client: Client<OpenAIConfig>,
    name: String,
    model: String,
    request_timeout: Duration,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiCompatibleProvider {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        request_timeout: Duration,
    ) -> Self {
        let config = OpenAIConfig::new()
            .with_api_base(base_url.into().trim_end_matches('/').to_string())
            .with_api_key(api_key.into());
        Self {
            client: Client::with_config(config),
            name: name.into(),
            model: model.into(),
            request_timeout,
            usage: TokenUsage::default(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, history: &[Message], tools: &[ToolSchema]) -> Result<Outcome, LlmError> {
        let mut request = CreateChatCompletionRequestArgs::default()
            .model(self.model.clone())
            .messages(OpenAiAdapter::to_request_messages(history)?)
            .build()
            .map_err(build_error)?;
        if !tools.is_empty() {
            request.tools = Some(OpenAiAdapter::to_request_tools(tools)?);
        }

        let response = tokio::time::timeout(self.request_timeout, self.client.chat().create(request))
            .await
            .map_err(|_| LlmError::Timeout(self.request_timeout))?
            .map_err(map_openai_error)?;

        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }

        let message = response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| LlmError::MalformedResponse("response has no choices".to_string()))?;

        OpenAiAdapter::parse_message(message)
    }
}
