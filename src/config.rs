//! 编排器配置：从 config/fractal.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `FRACTAL__*` 覆盖（双下划线表示嵌套，如 `FRACTAL__MAX_ITERATIONS=20`）。
//! 未设置的选项取默认值；未识别的选项在加载时直接报错，不做静默忽略。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::core::ConfigError;
use crate::llm::RetryPolicy;

/// 模型后端选择
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Deepseek,
    Openai,
    Qwen,
    Openrouter,
    Mock,
}

impl ProviderKind {
    pub fn default_base_url(self) -> &'static str {
        match self {
            ProviderKind::Deepseek => "https://api.deepseek.com",
            ProviderKind::Openai => "https://api.openai.com/v1",
            ProviderKind::Qwen => "https://dashscope.aliyuncs.com/compatible-mode/v1",
            ProviderKind::Openrouter => "https://openrouter.ai/api/v1",
            ProviderKind::Mock => "",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            ProviderKind::Deepseek => "deepseek-chat",
            ProviderKind::Openai => "gpt-4o-mini",
            ProviderKind::Qwen => "qwen-plus",
            ProviderKind::Openrouter => "openai/gpt-4o-mini",
            ProviderKind::Mock => "mock",
        }
    }

    /// 读取 API Key 的环境变量名；Mock 不需要
    pub fn api_key_env(self) -> Option<&'static str> {
        match self {
            ProviderKind::Deepseek => Some("DEEPSEEK_API_KEY"),
            ProviderKind::Openai => Some("OPENAI_API_KEY"),
            ProviderKind::Qwen => Some("QWEN_API_KEY"),
            ProviderKind::Openrouter => Some("OPENROUTER_API_KEY"),
            ProviderKind::Mock => None,
        }
    }
}

/// [[tools]] 条目：一个工具进程的启动方式
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ToolProcessEntry {
    /// 进程名（日志与冲突报告用），同一配置内唯一
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
}

/// 配置根
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub provider: ProviderKind,
    /// 未设置时取 provider 的默认模型
    pub model_name: Option<String>,
    /// 覆盖 provider 的默认端点
    pub base_url: Option<String>,
    pub system_prompt: Option<String>,
    /// 单次查询最多调用模型的次数
    pub max_iterations: usize,
    /// 分形嵌套的最大深度（根会话深度为 0）
    pub max_recursion_depth: u32,
    /// 模型调用（含工具调用决策）的总尝试次数
    pub tool_call_max_retries: u32,
    /// 工具调用超时后的重试次数（默认不重试）
    pub tool_invoke_retries: u32,
    pub handshake_timeout_secs: f64,
    pub call_timeout_secs: f64,
    pub shutdown_grace_period_secs: f64,
    pub model_timeout_secs: f64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// 一轮迭代内同时在途的工具调用上限
    pub max_concurrent_calls: usize,
    pub tools: Vec<ToolProcessEntry>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Deepseek,
            model_name: None,
            base_url: None,
            system_prompt: None,
            max_iterations: 10,
            max_recursion_depth: 3,
            tool_call_max_retries: 5,
            tool_invoke_retries: 0,
            handshake_timeout_secs: 10.0,
            call_timeout_secs: 120.0,
            shutdown_grace_period_secs: 5.0,
            model_timeout_secs: 120.0,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            max_concurrent_calls: 8,
            tools: Vec::new(),
        }
    }
}

impl AppConfig {
    /// 取值校验：预算、超时为正；工具进程名唯一
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::Invalid("max_iterations must be at least 1".into()));
        }
        if self.max_concurrent_calls == 0 {
            return Err(ConfigError::Invalid("max_concurrent_calls must be at least 1".into()));
        }
        for (key, value) in [
            ("handshake_timeout_secs", self.handshake_timeout_secs),
            ("call_timeout_secs", self.call_timeout_secs),
            ("shutdown_grace_period_secs", self.shutdown_grace_period_secs),
            ("model_timeout_secs", self.model_timeout_secs),
        ] {
            match Duration::try_from_secs_f64(value) {
                Ok(d) if !d.is_zero() => {}
                _ => {
                    return Err(ConfigError::Invalid(format!(
                        "{key} must be a positive number of seconds within range, got {value}"
                    )))
                }
            }
        }
        if self.backoff_base_ms > self.backoff_max_ms {
            return Err(ConfigError::Invalid(
                "backoff_base_ms must not exceed backoff_max_ms".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for entry in &self.tools {
            if !seen.insert(entry.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate tool process name '{}'",
                    entry.name
                )));
            }
        }
        Ok(())
    }

    pub fn model_name(&self) -> &str {
        self.model_name
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }

    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
    }

    pub fn handshake_timeout(&self) -> Duration {
        secs(self.handshake_timeout_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        secs(self.call_timeout_secs)
    }

    pub fn shutdown_grace_period(&self) -> Duration {
        secs(self.shutdown_grace_period_secs)
    }

    pub fn model_timeout(&self) -> Duration {
        secs(self.model_timeout_secs)
    }

    /// 模型调用的重试策略（不用于工具调用）
    pub fn model_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.tool_call_max_retries.max(1),
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_max_ms),
            attempt_timeout: Some(self.model_timeout()),
        }
    }
}

/// 秒数转 Duration；越界值（validate 会拒绝）饱和处理
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
}

fn finish(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<AppConfig, ConfigError> {
    let cfg: AppConfig = builder.build()?.try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}

/// 从 config 目录加载配置，环境变量 FRACTAL__* 可覆盖
///
/// 1. 按顺序查找 config/fractal.toml、../config/fractal.toml、fractal.toml，找到则作为第一源
/// 2. 若传入 config_path，则追加该文件（必须存在，可覆盖前面的键）
/// 3. 最后叠加环境变量 FRACTAL__*
pub fn load_config(config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/fractal", "../config/fractal", "fractal"] {
        if Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        builder = builder.add_source(config::File::from(path.to_path_buf()).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("FRACTAL")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    finish(builder)
}

/// 从 TOML 文本加载（不读取环境变量），嵌入式使用与测试用
pub fn load_config_from_str(toml: &str) -> Result<AppConfig, ConfigError> {
    finish(config::Config::builder().add_source(config::File::from_str(toml, config::FileFormat::Toml)))
}
