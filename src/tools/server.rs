//! 工具进程服务端：在任意读写流上实现线协议
//!
//! 工具进程（或进程内工具）实现 ToolHandler，由 serve 负责握手、分发调用与优雅退出。
//! handler 声明 concurrent 时每个 invoke 各起一个任务；否则按到达顺序逐个执行。

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::core::ToolInvocationError;
use crate::tools::protocol::{encode_line, HandshakeResponse, InvokeResponse, Request, ToolSpec};

/// 工具实现方 trait
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// 握手时声明的工具集
    fn tools(&self) -> Vec<ToolSpec>;

    /// 是否允许多个调用同时在途
    fn concurrent(&self) -> bool {
        true
    }

    /// 执行一次调用；depth 为调用方会话深度
    async fn call(&self, tool_name: &str, arguments: Value, depth: u32) -> Result<Value, ToolInvocationError>;
}

async fn write_frame<W, T>(writer: &Mutex<W>, frame: &T) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let line = encode_line(frame).map_err(std::io::Error::other)?;
    let mut w = writer.lock().await;
    w.write_all(&line).await?;
    w.flush().await
}

async fn handle_invoke<W>(
    handler: Arc<dyn ToolHandler>,
    writer: Arc<Mutex<W>>,
    call_id: String,
    tool_name: String,
    arguments: Value,
    depth: u32,
) where
    W: AsyncWrite + Unpin + Send,
{
    let response = match handler.call(&tool_name, arguments, depth).await {
        Ok(result) => InvokeResponse::ok(call_id, result),
        Err(e) => {
            tracing::debug!(tool = %tool_name, kind = %e.kind, "tool reported failure");
            InvokeResponse::err(call_id, e)
        }
    };
    if let Err(e) = write_frame(&writer, &response).await {
        tracing::warn!(tool = %tool_name, error = %e, "failed to write tool response");
    }
}

/// 在 reader/writer 上服务，直到收到 shutdown 或输入关闭；返回前排空所有在途调用
pub async fn serve<R, W>(reader: R, writer: W, handler: Arc<dyn ToolHandler>) -> std::io::Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let writer = Arc::new(Mutex::new(writer));
    let mut lines = BufReader::new(reader).lines();
    let mut in_flight = JoinSet::new();
    let concurrent = handler.concurrent();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let request: Request = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring malformed request line");
                continue;
            }
        };
        match request {
            Request::Handshake => {
                let response = HandshakeResponse::new(handler.tools(), concurrent);
                write_frame(&writer, &response).await?;
            }
            Request::Invoke {
                call_id,
                tool_name,
                arguments,
                depth,
            } => {
                let fut = handle_invoke(handler.clone(), writer.clone(), call_id, tool_name, arguments, depth);
                if concurrent {
                    in_flight.spawn(fut);
                } else {
                    fut.await;
                }
            }
            Request::Shutdown => {
                tracing::debug!("shutdown requested");
                break;
            }
        }
        // 回收已完成的任务
        while in_flight.try_join_next().is_some() {}
    }

    while in_flight.join_next().await.is_some() {}
    let mut w = writer.lock().await;
    w.flush().await?;
    w.shutdown().await
}

/// 在当前进程的 stdin/stdout 上服务（工具进程入口）
pub async fn serve_stdio(handler: Arc<dyn ToolHandler>) -> std::io::Result<()> {
    serve(tokio::io::stdin(), tokio::io::stdout(), handler).await
}
