//! 编排器：一个会话的决策循环
//!
//! 独占一个 ConversationSession 与一个 ToolSupervisor，不与其它会话共享。
//! start() 启动全部工具来源；run(query) 驱动决策循环；shutdown() 关闭工具进程并使会话不可再用。
//! ShutdownHandle 可从其它任务取消进行中的 run 并关闭工具进程。

use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::{LoopPhase, OrchestratorError, RecoveryEngine, SessionSnapshot};
use crate::llm::ModelProvider;
use crate::memory::{ConversationPersistence, ConversationSession, Message};
use crate::react::{run_query, LoopContext, LoopEvent, RunOutcome};
use crate::tools::{LaunchReport, ToolDispatcher, ToolSource, ToolSupervisor};

/// 可克隆的关闭句柄
#[derive(Clone)]
pub struct ShutdownHandle {
    cancel: CancellationToken,
    supervisor: Arc<ToolSupervisor>,
}

impl ShutdownHandle {
    /// 取消进行中的 run 并关闭全部工具进程；可重复调用
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.supervisor.shutdown().await;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// 编排器
pub struct Orchestrator {
    pub(crate) config: Arc<AppConfig>,
    pub(crate) provider: Arc<dyn ModelProvider>,
    pub(crate) supervisor: Arc<ToolSupervisor>,
    pub(crate) dispatcher: ToolDispatcher,
    pub(crate) recovery: RecoveryEngine,
    pub(crate) session: ConversationSession,
    pub(crate) sources: Vec<ToolSource>,
    pub(crate) phase: LoopPhase,
    pub(crate) cancel: CancellationToken,
    pub(crate) events: Option<UnboundedSender<LoopEvent>>,
    pub(crate) started: bool,
}

impl Orchestrator {
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    pub fn depth(&self) -> u32 {
        self.session.depth()
    }

    pub fn session(&self) -> &ConversationSession {
        &self.session
    }

    pub fn history(&self) -> &[Message] {
        self.session.store.snapshot()
    }

    pub fn supervisor(&self) -> &Arc<ToolSupervisor> {
        &self.supervisor
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.supervisor.tool_names()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            iteration: self.session.iteration,
            depth: self.session.depth(),
            message_count: self.session.store.len(),
            tool_names: self.tool_names(),
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            cancel: self.cancel.clone(),
            supervisor: self.supervisor.clone(),
        }
    }

    fn ensure_usable(&self) -> Result<(), OrchestratorError> {
        match self.phase {
            LoopPhase::Dead | LoopPhase::Aborted => Err(OrchestratorError::SessionClosed),
            _ if self.cancel.is_cancelled() || self.supervisor.is_shut_down() => Err(OrchestratorError::SessionClosed),
            _ => Ok(()),
        }
    }

    /// 启动全部工具来源；配置了来源但一个都没起来时会话失败。
    /// 已启动的会话再次调用时不做任何事，返回空报告
    pub async fn start(&mut self) -> Result<LaunchReport, OrchestratorError> {
        self.ensure_usable()?;
        if self.started {
            tracing::debug!(depth = self.depth(), "orchestrator already started");
            return Ok(LaunchReport::default());
        }
        let report = self.supervisor.launch_all(&self.sources).await;
        self.started = true;
        if !self.sources.is_empty() && report.launched.is_empty() {
            self.phase = LoopPhase::Aborted;
            tracing::error!(attempted = report.attempted(), "no tool process could be launched");
            return Err(OrchestratorError::NoToolsAvailable {
                attempted: report.attempted(),
                failures: report.failures,
            });
        }
        tracing::info!(
            depth = self.depth(),
            launched = report.launched.len(),
            failed = report.failures.len(),
            tools = ?report.tools,
            "orchestrator started"
        );
        Ok(report)
    }

    /// 处理一条查询；未 start 时先 start
    pub async fn run(&mut self, query: &str) -> Result<RunOutcome, OrchestratorError> {
        self.ensure_usable()?;
        if !self.started {
            self.start().await?;
        }
        tracing::info!(depth = self.depth(), query_len = query.len(), "processing query");

        let ctx = LoopContext {
            provider: self.provider.as_ref(),
            supervisor: &self.supervisor,
            dispatcher: &self.dispatcher,
            recovery: &self.recovery,
            cancel: self.cancel.clone(),
            events: self.events.as_ref(),
            max_iterations: self.config.max_iterations,
        };
        let result = run_query(&ctx, &mut self.session, &mut self.phase, query).await;
        if let Err(e) = &result {
            tracing::debug!(history = %self.session.store.format_debug_output(), error = %e, "history at abort");
        }
        result
    }

    /// 关闭工具进程，会话进入 Dead；重复调用无副作用
    pub async fn shutdown(&mut self) {
        if self.phase == LoopPhase::Dead {
            return;
        }
        self.cancel.cancel();
        self.supervisor.shutdown().await;
        self.phase = LoopPhase::Dead;
        tracing::info!(depth = self.depth(), "orchestrator shut down");
    }

    /// 将会话消息保存为 JSON
    pub fn save_history(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        ConversationPersistence::new(path).save(&self.session.store)
    }
}
