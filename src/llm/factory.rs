//! 按配置的 provider 字段创建模型后端
//!
//! DeepSeek / OpenAI / Qwen（DashScope 兼容模式）/ OpenRouter 均走 OpenAI 兼容协议，
//! 区别只在默认端点、默认模型与 API Key 环境变量；mock 不需要凭据。

use std::sync::Arc;

use crate::config::{AppConfig, ProviderKind};
use crate::core::ConfigError;
use crate::llm::{MockProvider, ModelProvider, OpenAiCompatibleProvider};

/// 创建配置指定的后端（不含重试装饰，重试由 Orchestrator 统一施加）
pub fn create_provider(config: &AppConfig) -> Result<Arc<dyn ModelProvider>, ConfigError> {
    create_provider_with(config, |key| std::env::var(key).ok())
}

pub(crate) fn create_provider_with(
    config: &AppConfig,
    lookup_env: impl Fn(&str) -> Option<String>,
) -> Result<Arc<dyn ModelProvider>, ConfigError> {
    let kind = config.provider;
    let Some(key_env) = kind.api_key_env() else {
        tracing::info!("using mock model provider");
        return Ok(Arc::new(MockProvider));
    };
    let api_key = lookup_env(key_env)
        .filter(|k| !k.trim().is_empty())
        .ok_or(ConfigError::MissingCredential(key_env))?;

    tracing::info!(
        provider = provider_label(kind),
        model = config.model_name(),
        base_url = config.base_url(),
        "creating model provider"
    );
    Ok(Arc::new(OpenAiCompatibleProvider::new(
        provider_label(kind),
        config.base_url(),
        config.model_name(),
        api_key,
        config.model_timeout(),
    )))
}

fn provider_label(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::Deepseek => "deepseek",
        ProviderKind::Openai => "openai",
        ProviderKind::Qwen => "qwen",
        ProviderKind::Openrouter => "openrouter",
        ProviderKind::Mock => "mock",
    }
}
