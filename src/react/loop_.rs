//! 决策主循环
//!
//! 追加用户查询 → 以完整历史与当前工具集调用模型 →
//! Final 则结束；ToolCalls 则整批分发，按请求顺序写回每个结果，进入下一轮。
//! 最多调用模型 max_iterations 次；用尽时返回「部分答案 + budget_exceeded」，不报错。

use std::collections::HashSet;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::core::{LoopPhase, OrchestratorError, RecoveryEngine, ToolCallError};
use crate::llm::{ModelProvider, Outcome, ToolCallRequest};
use crate::memory::{ConversationSession, Message};
use crate::react::LoopEvent;
use crate::tools::{CallContext, ToolCallResult, ToolDispatcher, ToolSupervisor};

/// 预算用尽时回答的前缀
pub const BUDGET_EXCEEDED_PREFIX: &str =
    "I spent too much time processing your request. Here's what I've gathered so far: ";

/// 事件中结果预览的最大字符数
const PREVIEW_CHARS: usize = 200;

/// 一次查询的结果
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub answer: String,
    /// 达到迭代上限，answer 为部分答案
    pub budget_exceeded: bool,
    /// 实际调用模型的次数
    pub iterations: usize,
}

/// 循环依赖的组件（均由 Orchestrator 持有）
pub struct LoopContext<'a> {
    pub provider: &'a dyn ModelProvider,
    pub supervisor: &'a ToolSupervisor,
    pub dispatcher: &'a ToolDispatcher,
    pub recovery: &'a RecoveryEngine,
    pub cancel: CancellationToken,
    pub events: Option<&'a UnboundedSender<LoopEvent>>,
    pub max_iterations: usize,
}

impl LoopContext<'_> {
    fn emit(&self, event: LoopEvent) {
        if let Some(tx) = self.events {
            let _ = tx.send(event);
        }
    }

    fn abort(&self, phase: &mut LoopPhase, err: OrchestratorError) -> OrchestratorError {
        *phase = LoopPhase::Aborted;
        tracing::error!(error = %err, "session aborted");
        self.emit(LoopEvent::Aborted {
            reason: err.to_string(),
        });
        err
    }
}

/// 缺失或重复的 call_id 替换为新生成的唯一 id
pub fn normalize_call_ids(calls: Vec<ToolCallRequest>) -> Vec<ToolCallRequest> {
    let mut seen = HashSet::new();
    calls
        .into_iter()
        .map(|mut call| {
            if call.call_id.trim().is_empty() || !seen.insert(call.call_id.clone()) {
                let fresh = format!("call_{}", uuid::Uuid::new_v4().simple());
                tracing::debug!(tool = %call.tool_name, old = %call.call_id, new = %fresh, "reassigning tool call id");
                seen.insert(fresh.clone());
                call.call_id = fresh;
            }
            call
        })
        .collect()
}

fn preview(text: &str) -> String {
    if text.chars().count() > PREVIEW_CHARS {
        format!("{}...", text.chars().take(PREVIEW_CHARS).collect::<String>())
    } else {
        text.to_string()
    }
}

/// 处理一条用户查询；phase 随循环推进更新
pub async fn run_query(
    ctx: &LoopContext<'_>,
    session: &mut ConversationSession,
    phase: &mut LoopPhase,
    query: &str,
) -> Result<RunOutcome, OrchestratorError> {
    session.store.append(Message::user(query));
    session.iteration = 0;
    let call_ctx = CallContext::new(session.depth());
    let mut partial = String::new();

    while session.iteration < ctx.max_iterations {
        session.iteration += 1;
        *phase = LoopPhase::AwaitingModel;
        ctx.emit(LoopEvent::IterationStarted {
            iteration: session.iteration,
            max_iterations: ctx.max_iterations,
            depth: session.depth(),
        });

        let tools = ctx.supervisor.tool_schemas();
        ctx.emit(LoopEvent::ModelCall { tools: tools.len() });
        tracing::debug!(iteration = session.iteration, depth = session.depth(), tools = tools.len(), "calling model");

        let generated = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(ctx.abort(phase, OrchestratorError::Cancelled)),
            r = ctx.provider.generate(session.store.snapshot(), &tools) => r,
        };
        let outcome = match generated {
            Ok(o) => o,
            Err(e) => return Err(ctx.abort(phase, OrchestratorError::ModelProvider(e))),
        };

        let (content, calls) = match outcome {
            Outcome::Final { text } => {
                session.store.append(Message::assistant(text.clone()));
                *phase = LoopPhase::Completed;
                ctx.emit(LoopEvent::Final { text: text.clone() });
                tracing::info!(iterations = session.iteration, depth = session.depth(), "query completed");
                return Ok(RunOutcome {
                    answer: text,
                    budget_exceeded: false,
                    iterations: session.iteration,
                });
            }
            Outcome::ToolCalls { content, calls } => (content, normalize_call_ids(calls)),
        };

        if !content.trim().is_empty() {
            partial = content.clone();
            ctx.emit(LoopEvent::Thinking { text: content.clone() });
        }
        session
            .store
            .append(Message::assistant_tool_calls(content, calls.clone()));
        *phase = LoopPhase::ExecutingTools;
        for call in &calls {
            ctx.emit(LoopEvent::ToolCall {
                call_id: call.call_id.clone(),
                tool: call.tool_name.clone(),
                args: call.arguments.clone(),
            });
        }

        let results = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                // 已发出的调用各补一条错误结果，历史中不留悬空的 call id
                let cancelled: Vec<ToolCallResult> = calls
                    .iter()
                    .map(|c| ToolCallResult {
                        call_id: c.call_id.clone(),
                        tool_name: c.tool_name.clone(),
                        outcome: Err(ToolCallError::Cancelled),
                    })
                    .collect();
                record_results(ctx, session, &cancelled, &mut partial);
                tracing::info!(outstanding = cancelled.len(), "tool dispatch cancelled");
                return Err(ctx.abort(phase, OrchestratorError::Cancelled));
            }
            r = ctx.dispatcher.dispatch(&calls, call_ctx) => r,
        };

        record_results(ctx, session, &results, &mut partial);

        if let Some(limit) = ctx.recovery.escalation(&results) {
            return Err(ctx.abort(phase, OrchestratorError::RecursionLimit(limit)));
        }
    }

    let answer = format!("{BUDGET_EXCEEDED_PREFIX}{partial}");
    session.store.append(Message::assistant(answer.clone()));
    *phase = LoopPhase::Failed;
    ctx.emit(LoopEvent::BudgetExceeded {
        iterations: session.iteration,
    });
    tracing::warn!(max_iterations = ctx.max_iterations, depth = session.depth(), "reached maximum iterations");
    Ok(RunOutcome {
        answer,
        budget_exceeded: true,
        iterations: session.iteration,
    })
}

/// 按请求顺序写回，每个请求恰好一条结果
fn record_results(
    ctx: &LoopContext<'_>,
    session: &mut ConversationSession,
    results: &[ToolCallResult],
    partial: &mut String,
) {
    for result in results {
        let text = result.content();
        ctx.emit(LoopEvent::ToolResult {
            call_id: result.call_id.clone(),
            tool: result.tool_name.clone(),
            ok: result.is_ok(),
            preview: preview(&text),
        });
        if result.is_ok() && partial.is_empty() {
            *partial = text.clone();
        }
        session
            .store
            .append(Message::tool_result(result.call_id.clone(), result.tool_name.clone(), text));
    }
}
