//! 进程级关闭信号
//!
//! Ctrl+C / SIGTERM 取消一个 CancellationToken 并记录首个原因；
//! forward_to 把信号转交给 Orchestrator 的 ShutdownHandle，取消进行中的查询并关闭工具进程。

use std::fmt;
use std::sync::{Arc, OnceLock};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::ShutdownHandle;

/// 关闭原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Interrupt => f.write_str("interrupt (Ctrl+C)"),
            ShutdownReason::Terminate => f.write_str("termination signal (SIGTERM)"),
        }
    }
}

/// 关闭信号管理器
#[derive(Default)]
pub struct ShutdownManager {
    token: CancellationToken,
    reason: OnceLock<ShutdownReason>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 触发关闭；只有第一次的原因会被记录
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        let first = self.reason.set(reason).is_ok();
        if first {
            tracing::info!(%reason, "shutdown requested");
        }
        self.token.cancel();
        first
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.get().copied()
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 等待关闭并返回原因
    pub async fn wait(&self) -> ShutdownReason {
        self.token.cancelled().await;
        self.reason().unwrap_or(ShutdownReason::Terminate)
    }

    /// 关闭时调用 handle.shutdown()；查询正常结束后应 abort 返回的任务
    pub fn forward_to(self: &Arc<Self>, handle: ShutdownHandle) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let reason = manager.wait().await;
            tracing::info!(%reason, "cancelling in-flight query");
            handle.shutdown().await;
        })
    }

    /// 安装 Ctrl+C 与 SIGTERM 处理
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                manager.trigger(ShutdownReason::Interrupt);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        if sigterm.recv().await.is_some() {
                            manager.trigger(ShutdownReason::Terminate);
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "failed to install SIGTERM handler"),
                }
            });
        }
    }
}
