//! 工具进程监管器
//!
//! 每个会话持有一个 ToolSupervisor（注册表是它的字段，不是全局表）：
//! - launch：启动进程 → 握手（带超时）→ 校验工具名唯一 → 注册 ToolDescriptor
//! - invoke：按工具名路由到所属进程；Dead 直接报错不投递，非并发进程的调用经 Semaphore(1) 排队
//! - shutdown：发 shutdown 帧并关闭 stdin → 宽限期内等在途调用排空与进程退出 → 超时强杀；幂等
//!
//! 每个进程有一个读任务按 call_id 分发应答；读到 EOF 即视为崩溃，所有在途调用立即以 Crashed 结束。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::sync::{oneshot, Notify, OnceCell, Semaphore};
use tokio::task::JoinHandle;

use crate::core::{ProcessState, ToolCallError, ToolProcessError};
use crate::llm::ToolSchema;
use crate::tools::launcher::{KillHandle, ToolSource};
use crate::tools::protocol::{encode_line, HandshakeResponse, InvokeResponse, Request, ToolSpec};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type PendingReply = oneshot::Sender<Result<Value, ToolCallError>>;

/// 调用上下文：显式携带调用方会话深度与单次调用超时
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallContext {
    pub depth: u32,
    /// 从请求写出起计时；串行进程排队等待的时间不计入
    pub timeout: Option<Duration>,
}

impl CallContext {
    pub fn new(depth: u32) -> Self {
        Self { depth, timeout: None }
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..self
        }
    }
}

/// 握手得到的工具描述，随所属进程一起销毁
#[derive(Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub argument_schema: Value,
    pub process: Arc<ToolProcessHandle>,
}

impl ToolDescriptor {
    pub fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.argument_schema.clone(),
        }
    }
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("process", &self.process.name())
            .finish()
    }
}

#[derive(Debug)]
struct ProcessStatus {
    state: ProcessState,
    in_flight: usize,
    concurrent: bool,
}

/// 一个工具进程的身份与生命周期状态
pub struct ToolProcessHandle {
    id: String,
    name: String,
    status: Mutex<ProcessStatus>,
    pending: Mutex<HashMap<String, PendingReply>>,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    kill: tokio::sync::Mutex<Option<KillHandle>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    /// 非并发进程的调用队列
    serial: Semaphore,
    /// in_flight 归零或进程死亡时通知
    idle: Notify,
}

impl ToolProcessHandle {
    fn new(name: &str, writer: BoxedWriter, kill: KillHandle) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            status: Mutex::new(ProcessStatus {
                state: ProcessState::Starting,
                in_flight: 0,
                concurrent: false,
            }),
            pending: Mutex::new(HashMap::new()),
            writer: tokio::sync::Mutex::new(Some(writer)),
            kill: tokio::sync::Mutex::new(Some(kill)),
            reader_task: Mutex::new(None),
            serial: Semaphore::new(1),
            idle: Notify::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ProcessState {
        self.status.lock().map(|s| s.state).unwrap_or(ProcessState::Dead)
    }

    pub fn in_flight(&self) -> usize {
        self.status.lock().map(|s| s.in_flight).unwrap_or(0)
    }

    pub fn is_concurrent(&self) -> bool {
        self.status.lock().map(|s| s.concurrent).unwrap_or(false)
    }

    fn transition(&self, next: ProcessState) -> bool {
        let Ok(mut status) = self.status.lock() else {
            return false;
        };
        if !status.state.can_transition_to(next) {
            return false;
        }
        tracing::debug!(process = %self.name, from = ?status.state, to = ?next, "process state transition");
        status.state = next;
        true
    }

    /// 登记一个在途调用；进程不接受调用时返回 NotRunning
    fn begin_call(&self) -> Result<(), ToolProcessError> {
        let mut status = self.status.lock().map_err(|_| self.not_running(ProcessState::Dead))?;
        if !status.state.accepts_calls() {
            return Err(self.not_running(status.state));
        }
        status.in_flight += 1;
        if status.state == ProcessState::Ready {
            status.state = ProcessState::Busy;
            tracing::debug!(process = %self.name, "process state transition Ready -> Busy");
        }
        Ok(())
    }

    fn end_call(&self) {
        let drained = match self.status.lock() {
            Ok(mut status) => {
                status.in_flight = status.in_flight.saturating_sub(1);
                if status.in_flight == 0 && status.state == ProcessState::Busy {
                    status.state = ProcessState::Ready;
                    tracing::debug!(process = %self.name, "process state transition Busy -> Ready");
                }
                status.in_flight == 0
            }
            Err(_) => true,
        };
        if drained {
            self.idle.notify_waiters();
        }
    }

    fn not_running(&self, state: ProcessState) -> ToolProcessError {
        ToolProcessError::NotRunning {
            name: self.name.clone(),
            state,
        }
    }

    /// 标记为 Dead，并让所有在途调用以 Crashed 结束
    fn mark_dead(&self, reason: &str) {
        let was = self.state();
        if was != ProcessState::Dead {
            if let Ok(mut status) = self.status.lock() {
                status.state = ProcessState::Dead;
            }
            if was == ProcessState::Terminating {
                tracing::debug!(process = %self.name, "tool process exited");
            } else {
                tracing::warn!(process = %self.name, from = ?was, reason, "tool process died");
            }
        }
        let orphaned: Vec<PendingReply> = self
            .pending
            .lock()
            .map(|mut p| p.drain().map(|(_, tx)| tx).collect())
            .unwrap_or_default();
        for tx in orphaned {
            let _ = tx.send(Err(ToolCallError::Process(ToolProcessError::Crashed {
                name: self.name.clone(),
                reason: reason.to_string(),
            })));
        }
        self.serial.close();
        self.idle.notify_waiters();
    }

    fn deliver(&self, response: InvokeResponse) {
        let tx = self.pending.lock().ok().and_then(|mut p| p.remove(&response.call_id));
        match tx {
            Some(tx) => {
                let _ = tx.send(response.into_result().map_err(ToolCallError::from_invocation));
            }
            None => tracing::debug!(process = %self.name, call_id = %response.call_id, "dropping response for abandoned call"),
        }
    }

    async fn write_frame(&self, frame: &Request) -> Result<(), ToolProcessError> {
        let io_err = |reason: String| ToolProcessError::Io {
            name: self.name.clone(),
            reason,
        };
        let line = encode_line(frame).map_err(|e| io_err(e.to_string()))?;
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or_else(|| self.not_running(self.state()))?;
        writer.write_all(&line).await.map_err(|e| io_err(e.to_string()))?;
        writer.flush().await.map_err(|e| io_err(e.to_string()))
    }

    /// 向进程投递一次调用并等待应答
    pub async fn call(&self, tool_name: &str, arguments: Value, ctx: CallContext) -> Result<Value, ToolCallError> {
        // Dead 进程不投递
        let state = self.state();
        if !state.accepts_calls() {
            return Err(self.not_running(state).into());
        }
        let _permit = if self.is_concurrent() {
            None
        } else {
            Some(
                self.serial
                    .acquire()
                    .await
                    .map_err(|_| self.not_running(self.state()))?,
            )
        };
        self.begin_call()?;

        let call_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(call_id.clone(), tx);
        }
        let _guard = InFlightGuard {
            handle: self,
            call_id: call_id.clone(),
        };

        let request = Request::Invoke {
            call_id,
            tool_name: tool_name.to_string(),
            arguments,
            depth: ctx.depth,
        };
        let exchange = self.exchange(request, rx);
        match ctx.timeout {
            Some(limit) => tokio::time::timeout(limit, exchange).await.unwrap_or_else(|_| {
                Err(ToolCallError::Timeout {
                    tool: tool_name.to_string(),
                    timeout: limit,
                })
            }),
            None => exchange.await,
        }
    }

    async fn exchange(
        &self,
        request: Request,
        rx: oneshot::Receiver<Result<Value, ToolCallError>>,
    ) -> Result<Value, ToolCallError> {
        self.write_frame(&request).await?;
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(ToolProcessError::Crashed {
                name: self.name.clone(),
                reason: "response channel closed".to_string(),
            }
            .into()),
        }
    }

    /// 优雅关闭：shutdown 帧 + 关闭 stdin，宽限期内等待排空与退出，超时强杀
    async fn shutdown(&self, grace: Duration) {
        if self.state() != ProcessState::Dead {
            self.transition(ProcessState::Terminating);
            let _ = self.write_frame(&Request::Shutdown).await;
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }

        let kill = self.kill.lock().await.take();
        if let Some(mut kill) = kill {
            let drained = tokio::time::timeout(grace, async {
                self.wait_idle().await;
                kill.wait().await;
            })
            .await;
            if drained.is_err() {
                tracing::warn!(process = %self.name, in_flight = self.in_flight(), grace = ?grace, "grace period elapsed, force-killing tool process");
                kill.kill().await;
            }
        }

        if let Some(task) = self.reader_task.lock().ok().and_then(|mut t| t.take()) {
            task.abort();
        }
        self.mark_dead("process terminated by shutdown");
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.in_flight() == 0 || self.state() == ProcessState::Dead {
                return;
            }
            notified.await;
        }
    }
}

/// 调用结束（正常、出错或被超时取消）时清理 pending 与计数
struct InFlightGuard<'a> {
    handle: &'a ToolProcessHandle,
    call_id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.handle.pending.lock() {
            pending.remove(&self.call_id);
        }
        self.handle.end_call();
    }
}

/// 启动结果：成功的进程、注册的工具与逐个来源的失败
#[derive(Debug, Default)]
pub struct LaunchReport {
    pub launched: Vec<String>,
    pub tools: Vec<String>,
    pub failures: Vec<ToolProcessError>,
}

impl LaunchReport {
    pub fn attempted(&self) -> usize {
        self.launched.len() + self.failures.len()
    }
}

/// 工具进程监管器
pub struct ToolSupervisor {
    handshake_timeout: Duration,
    grace_period: Duration,
    processes: Mutex<Vec<Arc<ToolProcessHandle>>>,
    registry: Mutex<HashMap<String, ToolDescriptor>>,
    shutdown_once: OnceCell<()>,
}

impl ToolSupervisor {
    pub fn new(handshake_timeout: Duration, grace_period: Duration) -> Self {
        Self {
            handshake_timeout,
            grace_period,
            processes: Mutex::new(Vec::new()),
            registry: Mutex::new(HashMap::new()),
            shutdown_once: OnceCell::new(),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown_once.initialized()
    }

    /// 启动一个工具进程并完成握手；失败时进程标记为 Dead 并返回错误
    pub async fn launch(&self, source: &ToolSource) -> Result<Vec<String>, ToolProcessError> {
        let name = source.name().to_string();
        if self.is_shut_down() {
            return Err(ToolProcessError::NotRunning {
                name,
                state: ProcessState::Dead,
            });
        }

        let channel = source.launch().await.map_err(|e| {
            tracing::warn!(process = %name, error = %e, "tool process failed to start");
            e
        })?;
        let handle = Arc::new(ToolProcessHandle::new(&name, channel.writer, channel.kill));
        if let Ok(mut processes) = self.processes.lock() {
            processes.push(handle.clone());
        }

        let mut lines = BufReader::new(channel.reader).lines();
        let handshake = match self.handshake(&handle, &mut lines).await {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!(process = %name, error = %e, "handshake failed");
                self.terminate(&handle).await;
                return Err(e);
            }
        };

        if let Err(e) = self.register(&handle, &handshake.tools) {
            tracing::warn!(process = %name, error = %e, "tool name collision");
            self.terminate(&handle).await;
            return Err(e);
        }

        if let Ok(mut status) = handle.status.lock() {
            status.concurrent = handshake.concurrent;
        }
        handle.transition(ProcessState::Ready);
        let reader = tokio::spawn(read_responses(handle.clone(), lines));
        if let Ok(mut task) = handle.reader_task.lock() {
            *task = Some(reader);
        }

        let names: Vec<String> = handshake.tools.iter().map(|t| t.tool_name.clone()).collect();
        tracing::info!(process = %name, tools = ?names, concurrent = handshake.concurrent, "tool process ready");
        Ok(names)
    }

    /// 依次启动所有来源；单个来源失败不影响其它来源
    pub async fn launch_all(&self, sources: &[ToolSource]) -> LaunchReport {
        let mut report = LaunchReport::default();
        for source in sources {
            match self.launch(source).await {
                Ok(tools) => {
                    report.launched.push(source.name().to_string());
                    report.tools.extend(tools);
                }
                Err(e) => report.failures.push(e),
            }
        }
        report
    }

    async fn handshake(
        &self,
        handle: &ToolProcessHandle,
        lines: &mut Lines<BufReader<BoxedReader>>,
    ) -> Result<HandshakeResponse, ToolProcessError> {
        let malformed = |reason: String| ToolProcessError::MalformedHandshake {
            name: handle.name.clone(),
            reason,
        };

        handle.write_frame(&Request::Handshake).await?;
        let response = tokio::time::timeout(self.handshake_timeout, read_handshake(&handle.name, lines))
            .await
            .map_err(|_| ToolProcessError::HandshakeTimeout {
                name: handle.name.clone(),
                timeout: self.handshake_timeout,
            })??;

        let mut seen = std::collections::HashSet::new();
        for tool in &response.tools {
            if tool.tool_name.trim().is_empty() {
                return Err(malformed("tool with an empty name".into()));
            }
            if !seen.insert(tool.tool_name.as_str()) {
                return Err(malformed(format!("tool '{}' declared twice", tool.tool_name)));
            }
        }
        Ok(response)
    }

    /// 整体注册一个进程的工具；任一名称冲突则全部不注册
    fn register(&self, handle: &Arc<ToolProcessHandle>, tools: &[ToolSpec]) -> Result<(), ToolProcessError> {
        let mut registry = self.registry.lock().map_err(|_| ToolProcessError::Io {
            name: handle.name.clone(),
            reason: "tool registry poisoned".to_string(),
        })?;
        if let Some((tool, existing)) = tools
            .iter()
            .find_map(|t| registry.get(&t.tool_name).map(|d| (t.tool_name.clone(), d.process.name.clone())))
        {
            return Err(ToolProcessError::NameCollision {
                tool,
                name: handle.name.clone(),
                existing,
            });
        }
        for tool in tools {
            registry.insert(
                tool.tool_name.clone(),
                ToolDescriptor {
                    name: tool.tool_name.clone(),
                    description: tool.description.clone(),
                    argument_schema: tool.argument_schema.clone(),
                    process: handle.clone(),
                },
            );
        }
        Ok(())
    }

    /// 启动失败的进程：强杀并标记 Dead
    async fn terminate(&self, handle: &ToolProcessHandle) {
        handle.writer.lock().await.take();
        if let Some(mut kill) = handle.kill.lock().await.take() {
            kill.kill().await;
        }
        handle.mark_dead("launch failed");
    }

    pub fn descriptor(&self, tool_name: &str) -> Option<ToolDescriptor> {
        self.registry.lock().ok().and_then(|r| r.get(tool_name).cloned())
    }

    /// 当前可用工具的 schema（按名称排序）；已死亡进程的工具不再提供给模型
    pub fn tool_schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .registry
            .lock()
            .map(|r| {
                r.values()
                    .filter(|d| d.process.state().accepts_calls())
                    .map(ToolDescriptor::schema)
                    .collect()
            })
            .unwrap_or_default();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tool_schemas().into_iter().map(|s| s.name).collect()
    }

    /// 所有进程的 (名称, 状态)，按启动顺序
    pub fn process_states(&self) -> Vec<(String, ProcessState)> {
        self.processes
            .lock()
            .map(|p| p.iter().map(|h| (h.name.clone(), h.state())).collect())
            .unwrap_or_default()
    }

    /// 按工具名路由调用
    pub async fn invoke(&self, tool_name: &str, arguments: Value, ctx: CallContext) -> Result<Value, ToolCallError> {
        let descriptor = self
            .descriptor(tool_name)
            .ok_or_else(|| ToolCallError::UnknownTool(tool_name.to_string()))?;
        descriptor.process.call(tool_name, arguments, ctx).await
    }

    /// 关闭全部进程；重复调用直接返回（并发调用方等待第一次关闭完成）
    pub async fn shutdown(&self) {
        self.shutdown_once
            .get_or_init(|| async {
                let processes: Vec<Arc<ToolProcessHandle>> =
                    self.processes.lock().map(|p| p.clone()).unwrap_or_default();
                tracing::info!(processes = processes.len(), "shutting down tool processes");
                futures_util::future::join_all(processes.iter().map(|h| h.shutdown(self.grace_period))).await;
                if let Ok(mut registry) = self.registry.lock() {
                    registry.clear();
                }
            })
            .await;
    }
}

/// 读取握手应答；非 JSON 行视为进程的普通输出并跳过
async fn read_handshake(
    name: &str,
    lines: &mut Lines<BufReader<BoxedReader>>,
) -> Result<HandshakeResponse, ToolProcessError> {
    let malformed = |reason: String| ToolProcessError::MalformedHandshake {
        name: name.to_string(),
        reason,
    };
    loop {
        let line = lines
            .next_line()
            .await
            .map_err(|e| malformed(e.to_string()))?
            .ok_or_else(|| malformed("process closed its output before the handshake".into()))?;
        if line.trim().is_empty() {
            continue;
        }
        let Ok(value) = serde_json::from_str::<Value>(&line) else {
            tracing::debug!(process = %name, line = %line, "skipping non-protocol output");
            continue;
        };
        return serde_json::from_value::<HandshakeResponse>(value).map_err(|e| malformed(e.to_string()));
    }
}

/// 读任务：逐行解析应答并按 call_id 分发；EOF 或读错误即进程死亡
async fn read_responses(handle: Arc<ToolProcessHandle>, mut lines: Lines<BufReader<BoxedReader>>) {
    let reason = loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<InvokeResponse>(&line) {
                    Ok(response) => handle.deliver(response),
                    Err(e) => {
                        tracing::debug!(process = %handle.name, error = %e, line = %line, "skipping unrecognised output line")
                    }
                }
            }
            Ok(None) => break "process closed its output".to_string(),
            Err(e) => break format!("read error: {e}"),
        }
    };
    handle.mark_dead(&reason);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ToolInvocationError;
    use crate::tools::{EchoHandler, InProcessLauncher, ToolHandler};
    use async_trait::async_trait;
    use serde_json::json;

    fn supervisor() -> ToolSupervisor {
        ToolSupervisor::new(Duration::from_secs(2), Duration::from_millis(200))
    }

    fn source(name: &str, handler: impl ToolHandler + 'static) -> ToolSource {
        Arc::new(InProcessLauncher::new(name, Arc::new(handler)))
    }

    /// 单工具、非并发，记录同时在途的最大调用数
    struct SlowSerial {
        active: std::sync::atomic::AtomicUsize,
        peak: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl ToolHandler for SlowSerial {
        fn tools(&self) -> Vec<ToolSpec> {
            vec![ToolSpec {
                tool_name: "slow".into(),
                description: String::new(),
                argument_schema: json!({"type": "object"}),
            }]
        }

        fn concurrent(&self) -> bool {
            false
        }

        async fn call(&self, _tool: &str, args: Value, _depth: u32) -> Result<Value, ToolInvocationError> {
            use std::sync::atomic::Ordering;
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(args)
        }
    }

    #[tokio::test]
    async fn test_launch_and_invoke() {
        let sup = supervisor();
        let tools = sup.launch(&source("echo", EchoHandler)).await.unwrap();
        assert_eq!(tools, vec!["echo".to_string()]);
        assert_eq!(sup.process_states(), vec![("echo".to_string(), ProcessState::Ready)]);

        let out = sup.invoke("echo", json!({"text": "hi"}), CallContext::new(0)).await.unwrap();
        assert_eq!(out, json!("hi"));
        assert_eq!(sup.process_states()[0].1, ProcessState::Ready);

        let err = sup.invoke("echo", json!({}), CallContext::default()).await.unwrap_err();
        assert!(matches!(err, ToolCallError::Invocation(ref e) if e.kind == "invalid_arguments"));

        let err = sup.invoke("missing", json!({}), CallContext::default()).await.unwrap_err();
        assert_eq!(err, ToolCallError::UnknownTool("missing".into()));
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_name_collision_is_reported() {
        let sup = supervisor();
        sup.launch(&source("first", EchoHandler)).await.unwrap();
        let err = sup.launch(&source("second", EchoHandler)).await.unwrap_err();
        assert_eq!(
            err,
            ToolProcessError::NameCollision {
                tool: "echo".into(),
                name: "second".into(),
                existing: "first".into(),
            }
        );
        assert_eq!(sup.process_states()[1], ("second".to_string(), ProcessState::Dead));
        assert_eq!(sup.descriptor("echo").unwrap().process.name(), "first");
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_non_concurrent_process_serializes_calls() {
        let sup = Arc::new(supervisor());
        let handler = Arc::new(SlowSerial {
            active: Default::default(),
            peak: Default::default(),
        });
        let src: ToolSource = Arc::new(InProcessLauncher::new("slow", handler.clone()));
        sup.launch(&src).await.unwrap();

        let calls = (0..4).map(|i| {
            let sup = sup.clone();
            async move { sup.invoke("slow", json!(i), CallContext::default()).await }
        });
        let results = futures_util::future::join_all(calls).await;
        for (i, r) in results.into_iter().enumerate() {
            assert_eq!(r.unwrap(), json!(i));
        }
        assert_eq!(handler.peak.load(std::sync::atomic::Ordering::SeqCst), 1);
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_rejects_calls() {
        let sup = supervisor();
        sup.launch(&source("echo", EchoHandler)).await.unwrap();
        sup.shutdown().await;
        sup.shutdown().await;
        assert!(sup.is_shut_down());
        assert!(sup.tool_schemas().is_empty());
        assert_eq!(sup.process_states()[0].1, ProcessState::Dead);
        assert!(sup.launch(&source("late", EchoHandler)).await.is_err());
    }
}
