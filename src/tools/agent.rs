//! 分形 Agent 工具
//!
//! 把一个完整的 Orchestrator 包装成工具：每次调用在 depth + 1 上构建一个全新的子会话，
//! 启动它自己的工具进程，跑完查询后关闭。子会话与父会话不共享历史和进程。
//! 深度检查在构建任何东西之前完成，超限时以 recursion_limit 错误返回给调用方。

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::Value;

use crate::config::AppConfig;
use crate::core::{OrchestratorBuilder, RecursionLimitError, ToolInvocationError};
use crate::llm::ModelProvider;
use crate::tools::protocol::ToolSpec;
use crate::tools::{argument_schema, AgentToolArgs, InProcessLauncher, ToolHandler, ToolSource};

pub const DEFAULT_AGENT_TOOL_NAME: &str = "agent";

const DEFAULT_AGENT_DESCRIPTION: &str = "Delegate a self-contained sub-task to a fresh sub-agent that has its own \
     tools and conversation. Returns the sub-agent's final answer.";

/// 子会话的构建配方
#[derive(Clone)]
pub struct AgentRecipe {
    pub config: AppConfig,
    /// 未设置时按 config.provider 创建
    pub provider: Option<Arc<dyn ModelProvider>>,
    pub system_prompt: Option<String>,
    /// 子会话额外的工具来源（配置中的 [[tools]] 总会启动）
    pub sources: Vec<ToolSource>,
    pub tool_name: String,
    pub description: String,
    /// 子会话也挂载本工具
    pub recursive: bool,
}

impl AgentRecipe {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            provider: None,
            system_prompt: None,
            sources: Vec::new(),
            tool_name: DEFAULT_AGENT_TOOL_NAME.to_string(),
            description: DEFAULT_AGENT_DESCRIPTION.to_string(),
            recursive: true,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_tool_source(mut self, source: ToolSource) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_tool_name(mut self, name: impl Into<String>) -> Self {
        self.tool_name = name.into();
        self
    }

    pub fn recursive(mut self, enable: bool) -> Self {
        self.recursive = enable;
        self
    }
}

/// 分形 Agent 工具
pub struct AgentToolHandler {
    recipe: AgentRecipe,
    this: Weak<AgentToolHandler>,
}

impl AgentToolHandler {
    pub fn new(recipe: AgentRecipe) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            recipe,
            this: this.clone(),
        })
    }

    pub fn tool_name(&self) -> &str {
        &self.recipe.tool_name
    }

    /// 以进程内工具来源的形式挂到某个会话上
    pub fn as_source(self: &Arc<Self>) -> ToolSource {
        Arc::new(InProcessLauncher::new(
            self.recipe.tool_name.clone(),
            self.clone() as Arc<dyn ToolHandler>,
        ))
    }

    async fn run_child(&self, query: &str, child_depth: u32) -> Result<String, ToolInvocationError> {
        let recipe = &self.recipe;
        let mut builder = OrchestratorBuilder::new(recipe.config.clone())
            .with_depth(child_depth)
            .with_tool_sources(recipe.sources.iter().cloned());
        if let Some(provider) = &recipe.provider {
            builder = builder.with_provider(provider.clone());
        }
        if let Some(prompt) = &recipe.system_prompt {
            builder = builder.with_system_prompt(prompt.clone());
        }
        if recipe.recursive {
            if let Some(this) = self.this.upgrade() {
                builder = builder.with_tool_source(this.as_source());
            }
        }

        let mut child = builder.build().map_err(|e| ToolInvocationError::new("child_aborted", e.to_string()))?;
        tracing::info!(depth = child_depth, "sub-agent started");
        let result = child.run(query).await;
        child.shutdown().await;

        match result {
            Ok(outcome) => {
                tracing::info!(
                    depth = child_depth,
                    iterations = outcome.iterations,
                    budget_exceeded = outcome.budget_exceeded,
                    "sub-agent finished"
                );
                Ok(outcome.answer)
            }
            Err(e) => {
                tracing::warn!(depth = child_depth, error = %e, "sub-agent aborted");
                Err(ToolInvocationError::new("child_aborted", e.to_string()))
            }
        }
    }
}

#[async_trait]
impl ToolHandler for AgentToolHandler {
    fn tools(&self) -> Vec<ToolSpec> {
        vec![ToolSpec {
            tool_name: self.recipe.tool_name.clone(),
            description: self.recipe.description.clone(),
            argument_schema: argument_schema::<AgentToolArgs>(),
        }]
    }

    async fn call(&self, tool_name: &str, arguments: Value, depth: u32) -> Result<Value, ToolInvocationError> {
        if tool_name != self.recipe.tool_name {
            return Err(ToolInvocationError::new("unknown_tool", format!("no tool named '{tool_name}'")));
        }
        let args: AgentToolArgs =
            serde_json::from_value(arguments).map_err(|e| ToolInvocationError::invalid_arguments(e.to_string()))?;

        let child_depth = depth + 1;
        let max_depth = self.recipe.config.max_recursion_depth;
        if child_depth > max_depth {
            tracing::warn!(child_depth, max_depth, "sub-agent refused: recursion limit");
            return Err(ToolInvocationError::recursion_limit(RecursionLimitError {
                child_depth,
                max_depth,
            }));
        }

        self.run_child(&args.query, child_depth).await.map(Value::String)
    }
}
