//! 工具调用分发器
//!
//! 一轮迭代的全部 ToolCallRequest 并发执行（join_all），每个调用在 call_timeout 内完成，
//! 超时转为 Timeout 错误槽位；失败互不影响，等全部结束后按请求顺序返回，每个结果带原 call_id。
//! 同一非并发进程上的调用由 Supervisor 排队，排队时间不计入 call_timeout；max_concurrent_calls 限制整批的在途数量。
//! 每次调用输出一行结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::core::ToolCallError;
use crate::llm::ToolCallRequest;
use crate::tools::{CallContext, ToolSupervisor};

/// 审计日志中参数预览的最大字符数
const ARGS_PREVIEW_CHARS: usize = 200;

/// 单个调用的结果槽位
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallResult {
    pub call_id: String,
    pub tool_name: String,
    pub outcome: Result<Value, ToolCallError>,
}

impl ToolCallResult {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    /// 写回会话的 tool-result 文本：字符串结果原样，其它 JSON 序列化；失败为可读说明
    pub fn content(&self) -> String {
        match &self.outcome {
            Ok(Value::String(s)) => s.clone(),
            Ok(other) => other.to_string(),
            Err(e) => format!("Error calling tool {}: {}", self.tool_name, e),
        }
    }
}

/// 分发器配置
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    pub call_timeout: Duration,
    pub max_concurrent_calls: usize,
    /// 超时后的重试次数；其它错误不重试
    pub timeout_retries: u32,
    /// 两次重试之间的固定间隔
    pub retry_delay: Duration,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(120),
            max_concurrent_calls: 8,
            timeout_retries: 0,
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// 工具调用分发器
pub struct ToolDispatcher {
    supervisor: Arc<ToolSupervisor>,
    policy: DispatchPolicy,
    limit: Semaphore,
}

impl ToolDispatcher {
    pub fn new(supervisor: Arc<ToolSupervisor>, policy: DispatchPolicy) -> Self {
        let limit = Semaphore::new(policy.max_concurrent_calls.max(1));
        Self {
            supervisor,
            policy,
            limit,
        }
    }

    pub fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    /// 执行一批调用；返回值与 calls 一一对应、顺序一致
    pub async fn dispatch(&self, calls: &[ToolCallRequest], ctx: CallContext) -> Vec<ToolCallResult> {
        join_all(calls.iter().map(|call| self.execute(call, ctx))).await
    }

    async fn execute(&self, call: &ToolCallRequest, ctx: CallContext) -> ToolCallResult {
        let _permit = self.limit.acquire().await.ok();
        let start = Instant::now();
        let ctx = ctx.with_timeout(self.policy.call_timeout);
        let mut attempt = 0;
        let outcome = loop {
            let result = self
                .supervisor
                .invoke(&call.tool_name, call.arguments.clone(), ctx)
                .await;
            match result {
                Err(ToolCallError::Timeout { .. }) if attempt < self.policy.timeout_retries => {
                    attempt += 1;
                    tracing::warn!(tool = %call.tool_name, call_id = %call.call_id, attempt, "tool call timed out, retrying");
                    tokio::time::sleep(self.policy.retry_delay).await;
                }
                other => break other,
            }
        };

        let outcome_kind = match &outcome {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "call_id": call.call_id,
            "tool": call.tool_name,
            "depth": ctx.depth,
            "ok": outcome.is_ok(),
            "outcome": outcome_kind,
            "attempts": attempt + 1,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(&call.arguments),
        });
        tracing::info!(audit = %audit, "tool");
        if let Err(e) = &outcome {
            tracing::warn!(tool = %call.tool_name, call_id = %call.call_id, error = %e, "tool call failed");
        }

        ToolCallResult {
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            outcome,
        }
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > ARGS_PREVIEW_CHARS {
        format!("{}...", s.chars().take(ARGS_PREVIEW_CHARS).collect::<String>())
    } else {
        s
    }
}
