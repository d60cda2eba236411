//! 工具进程启动器
//!
//! ProcessLauncher 产出一条双向字节通道与一个终止句柄：
//! - CommandLauncher：tokio::process 子进程，stdin/stdout 承载协议，stderr 逐行转发到 tracing
//! - InProcessLauncher：在运行时内用 duplex 管道跑一个 ToolHandler（进程内 Agent 工具、测试）

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::config::ToolProcessEntry;
use crate::core::ToolProcessError;
use crate::tools::server::{serve, ToolHandler};

/// 进程内 duplex 管道的缓冲大小
const DUPLEX_BUFFER: usize = 64 * 1024;

/// 终止句柄：子进程或进程内任务
pub enum KillHandle {
    Child(Child),
    /// 完成后置为 None
    Task(Option<JoinHandle<()>>),
}

impl KillHandle {
    /// 等待退出
    pub async fn wait(&mut self) {
        match self {
            KillHandle::Child(child) => {
                if let Err(e) = child.wait().await {
                    tracing::warn!(error = %e, "failed to wait for tool process");
                }
            }
            KillHandle::Task(slot) => {
                if let Some(handle) = slot.as_mut() {
                    let _ = handle.await;
                    *slot = None;
                }
            }
        }
    }

    /// 强制终止并回收
    pub async fn kill(&mut self) {
        match self {
            KillHandle::Child(child) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "failed to kill tool process");
                }
            }
            KillHandle::Task(slot) => {
                if let Some(handle) = slot.take() {
                    handle.abort();
                    let _ = handle.await;
                }
            }
        }
    }
}

/// 一个已启动的工具进程：协议读写端与终止句柄
pub struct ToolChannel {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
    pub kill: KillHandle,
}

/// 工具来源：每次 launch 启动一个新的工具进程
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// 进程名（日志、冲突报告用）
    fn name(&self) -> &str;

    async fn launch(&self) -> Result<ToolChannel, ToolProcessError>;
}

/// 可共享的工具来源
pub type ToolSource = Arc<dyn ProcessLauncher>;

/// 子进程启动器
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    name: String,
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    cwd: Option<PathBuf>,
}

impl CommandLauncher {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
        }
    }

    pub fn from_entry(entry: &ToolProcessEntry) -> Self {
        Self {
            name: entry.name.clone(),
            command: entry.command.clone(),
            args: entry.args.clone(),
            env: entry.env.clone(),
            cwd: entry.cwd.clone(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

#[async_trait]
impl ProcessLauncher for CommandLauncher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn launch(&self) -> Result<ToolChannel, ToolProcessError> {
        let spawn_err = |reason: String| ToolProcessError::Spawn {
            name: self.name.clone(),
            reason,
        };

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| spawn_err(format!("{}: {e}", self.command)))?;
        let stdin = child.stdin.take().ok_or_else(|| spawn_err("stdin not captured".into()))?;
        let stdout = child.stdout.take().ok_or_else(|| spawn_err("stdout not captured".into()))?;

        if let Some(stderr) = child.stderr.take() {
            let name = self.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(process = %name, "{}", line);
                }
            });
        }

        tracing::info!(process = %self.name, pid = ?child.id(), command = %self.command, "tool process spawned");
        Ok(ToolChannel {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            kill: KillHandle::Child(child),
        })
    }
}

/// 进程内启动器：每次 launch 在新的 duplex 管道上运行 serve(handler)
pub struct InProcessLauncher {
    name: String,
    handler: Arc<dyn ToolHandler>,
}

impl InProcessLauncher {
    pub fn new(name: impl Into<String>, handler: Arc<dyn ToolHandler>) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }
}

#[async_trait]
impl ProcessLauncher for InProcessLauncher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn launch(&self) -> Result<ToolChannel, ToolProcessError> {
        let (client, server) = tokio::io::duplex(DUPLEX_BUFFER);
        let (server_read, server_write) = tokio::io::split(server);
        let handler = self.handler.clone();
        let name = self.name.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = serve(server_read, server_write, handler).await {
                tracing::warn!(process = %name, error = %e, "in-process tool server stopped with error");
            }
        });
        let (client_read, client_write) = tokio::io::split(client);
        tracing::debug!(process = %self.name, "in-process tool server started");
        Ok(ToolChannel {
            reader: Box::new(client_read),
            writer: Box::new(client_write),
            kill: KillHandle::Task(Some(task)),
        })
    }
}
