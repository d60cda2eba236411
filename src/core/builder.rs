//! 编排器构建器
//!
//! 统一根会话、子会话（分形 Agent 工具）与测试的初始化：
//! 配置校验 → 深度检查 → 模型后端（外包重试）→ 工具来源（配置中的子进程 + 额外来源）→ 会话。

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::{LoopPhase, Orchestrator, OrchestratorError, RecoveryEngine, RecursionLimitError};
use crate::llm::{create_provider, ModelProvider, RetryingProvider};
use crate::memory::{ConversationSession, ConversationStore};
use crate::react::LoopEvent;
use crate::tools::{CommandLauncher, DispatchPolicy, ToolDispatcher, ToolSource, ToolSupervisor};

/// 未配置 system_prompt 时的默认提示词
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Use the available tools when they help answer the request, \
     then reply with a concise final answer.";

/// 编排器构建器
pub struct OrchestratorBuilder {
    config: AppConfig,
    provider: Option<Arc<dyn ModelProvider>>,
    system_prompt: Option<String>,
    depth: u32,
    sources: Vec<ToolSource>,
    include_config_tools: bool,
    events: Option<UnboundedSender<LoopEvent>>,
    history: Option<ConversationStore>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            provider: None,
            system_prompt: None,
            depth: 0,
            sources: Vec::new(),
            include_config_tools: true,
            events: None,
            history: None,
        }
    }

    /// 指定模型后端；未指定时按配置的 provider 创建
    pub fn with_provider(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// 覆盖配置中的系统提示词
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// 会话嵌套深度（根会话为 0）
    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_tool_source(mut self, source: ToolSource) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_tool_sources(mut self, sources: impl IntoIterator<Item = ToolSource>) -> Self {
        self.sources.extend(sources);
        self
    }

    /// 是否启动配置中 [[tools]] 声明的子进程（默认启动）
    pub fn with_config_tools(mut self, enable: bool) -> Self {
        self.include_config_tools = enable;
        self
    }

    pub fn with_event_tx(mut self, tx: UnboundedSender<LoopEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// 从已保存的消息日志恢复会话
    pub fn with_history(mut self, store: ConversationStore) -> Self {
        self.history = Some(store);
        self
    }

    pub fn build(self) -> Result<Orchestrator, OrchestratorError> {
        self.config.validate()?;
        if self.depth > self.config.max_recursion_depth {
            return Err(RecursionLimitError {
                child_depth: self.depth,
                max_depth: self.config.max_recursion_depth,
            }
            .into());
        }

        let inner = match self.provider {
            Some(p) => p,
            None => create_provider(&self.config)?,
        };
        let provider: Arc<dyn ModelProvider> =
            Arc::new(RetryingProvider::new(inner, self.config.model_retry_policy()));

        let mut sources: Vec<ToolSource> = Vec::new();
        if self.include_config_tools {
            sources.extend(
                self.config
                    .tools
                    .iter()
                    .map(|entry| Arc::new(CommandLauncher::from_entry(entry)) as ToolSource),
            );
        }
        sources.extend(self.sources);

        let supervisor = Arc::new(ToolSupervisor::new(
            self.config.handshake_timeout(),
            self.config.shutdown_grace_period(),
        ));
        let dispatcher = ToolDispatcher::new(
            supervisor.clone(),
            DispatchPolicy {
                call_timeout: self.config.call_timeout(),
                max_concurrent_calls: self.config.max_concurrent_calls,
                timeout_retries: self.config.tool_invoke_retries,
                retry_delay: std::time::Duration::from_millis(self.config.backoff_base_ms),
            },
        );

        let session = match self.history {
            Some(store) => ConversationSession::with_store(store, self.depth),
            None => {
                let prompt = self
                    .system_prompt
                    .or_else(|| self.config.system_prompt.clone())
                    .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
                ConversationSession::new(&prompt, self.depth)
            }
        };

        tracing::debug!(
            depth = self.depth,
            provider = provider.name(),
            sources = sources.len(),
            "orchestrator built"
        );
        Ok(Orchestrator {
            config: Arc::new(self.config),
            provider,
            supervisor,
            dispatcher,
            recovery: RecoveryEngine::new(),
            session,
            sources,
            phase: LoopPhase::Idle,
            cancel: CancellationToken::new(),
            events: self.events,
            started: false,
        })
    }
}
