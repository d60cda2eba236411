//! 编排器端到端测试：进程内工具服务、模拟崩溃的启动器、sh 脚本子进程

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use fractal::config::{AppConfig, ProviderKind};
use fractal::core::{
    LlmError, LoopPhase, OrchestratorBuilder, OrchestratorError, ProcessState, RecursionLimitError, ToolCallError,
    ToolInvocationError, ToolProcessError,
};
use fractal::llm::{Outcome, ScriptedProvider, ToolCallRequest};
use fractal::memory::{ConversationPersistence, Role};
use fractal::react::{LoopEvent, BUDGET_EXCEEDED_PREFIX};
use fractal::tools::protocol::ToolSpec;
use fractal::tools::{
    AgentRecipe, AgentToolHandler, EchoHandler, InProcessLauncher, KillHandle, ProcessLauncher, ToolChannel,
    ToolHandler, ToolSource,
};

fn test_config() -> AppConfig {
    AppConfig {
        provider: ProviderKind::Mock,
        backoff_base_ms: 1,
        backoff_max_ms: 5,
        handshake_timeout_secs: 2.0,
        shutdown_grace_period_secs: 0.5,
        ..AppConfig::default()
    }
}

fn echo_source() -> ToolSource {
    Arc::new(InProcessLauncher::new("echo", Arc::new(EchoHandler)))
}

fn call(id: &str, tool: &str, args: Value) -> ToolCallRequest {
    ToolCallRequest::new(id, tool, args)
}

/// 睡眠工具：工具名可配置，按 ms 参数睡眠后返回自己的名字
struct Sleeper(&'static str);

#[async_trait]
impl ToolHandler for Sleeper {
    fn tools(&self) -> Vec<ToolSpec> {
        vec![ToolSpec {
            tool_name: self.0.to_string(),
            description: "sleep then answer".into(),
            argument_schema: json!({"type": "object", "properties": {"ms": {"type": "integer"}}}),
        }]
    }

    async fn call(&self, _tool: &str, args: Value, _depth: u32) -> Result<Value, ToolInvocationError> {
        let ms = args["ms"].as_u64().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(json!(format!("{} done", self.0)))
    }
}

/// 完成握手后，在收到第一个 invoke 时断开连接
struct CrashingLauncher;

#[async_trait]
impl ProcessLauncher for CrashingLauncher {
    fn name(&self) -> &str {
        "fragile"
    }

    async fn launch(&self) -> Result<ToolChannel, ToolProcessError> {
        let (client, server) = tokio::io::duplex(4096);
        let task = tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(server);
            let mut lines = BufReader::new(read).lines();
            if let Ok(Some(_handshake)) = lines.next_line().await {
                let reply = r#"{"type":"handshake","tools":[{"tool_name":"fragile","description":"crashes","argument_schema":{"type":"object"}}],"concurrent":true}"#;
                let _ = write.write_all(format!("{reply}\n").as_bytes()).await;
                let _ = write.flush().await;
            }
            let _ = lines.next_line().await;
        });
        let (read, write) = tokio::io::split(client);
        Ok(ToolChannel {
            reader: Box::new(read),
            writer: Box::new(write),
            kill: KillHandle::Task(Some(task)),
        })
    }
}

/// 从不应答握手
struct SilentLauncher;

#[async_trait]
impl ProcessLauncher for SilentLauncher {
    fn name(&self) -> &str {
        "silent"
    }

    async fn launch(&self) -> Result<ToolChannel, ToolProcessError> {
        let (client, server) = tokio::io::duplex(4096);
        let task = tokio::spawn(async move {
            let _keep = server;
            tokio::time::sleep(Duration::from_secs(30)).await;
        });
        let (read, write) = tokio::io::split(client);
        Ok(ToolChannel {
            reader: Box::new(read),
            writer: Box::new(write),
            kill: KillHandle::Task(Some(task)),
        })
    }
}

/// 统计 launch 次数的包装
struct CountingLauncher {
    inner: ToolSource,
    launches: Arc<AtomicUsize>,
}

#[async_trait]
impl ProcessLauncher for CountingLauncher {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn launch(&self) -> Result<ToolChannel, ToolProcessError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        self.inner.launch().await
    }
}

fn tool_results(history: &[fractal::memory::Message]) -> Vec<(String, String)> {
    history
        .iter()
        .filter(|m| m.role == Role::ToolResult)
        .map(|m| (m.tool_call_id.clone().unwrap_or_default(), m.content.clone()))
        .collect()
}

#[tokio::test]
async fn test_single_tool_single_call() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Ok(Outcome::tool_calls(vec![call("c1", "echo", json!({"text": "hi"}))])),
        Ok(Outcome::final_text("done")),
    ]));
    let mut orch = OrchestratorBuilder::new(test_config())
        .with_provider(provider.clone())
        .with_tool_source(echo_source())
        .build()
        .unwrap();

    let outcome = orch.run("say hi").await.unwrap();
    assert_eq!(outcome.answer, "done");
    assert_eq!(outcome.iterations, 2);
    assert!(!outcome.budget_exceeded);
    assert_eq!(provider.calls(), 2);
    assert_eq!(provider.tool_sets()[0], vec!["echo".to_string()]);
    assert_eq!(tool_results(orch.history()), vec![("c1".to_string(), "hi".to_string())]);
    assert_eq!(orch.phase(), LoopPhase::Completed);
    orch.shutdown().await;
}

#[tokio::test]
async fn test_independent_tools_run_concurrently_and_keep_request_order() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Ok(Outcome::tool_calls(vec![
            call("slow-1", "slow", json!({"ms": 300})),
            call("fast-2", "fast", json!({"ms": 20})),
        ])),
        Ok(Outcome::final_text("both done")),
    ]));
    let mut orch = OrchestratorBuilder::new(test_config())
        .with_provider(provider)
        .with_tool_source(Arc::new(InProcessLauncher::new("slow", Arc::new(Sleeper("slow")))))
        .with_tool_source(Arc::new(InProcessLauncher::new("fast", Arc::new(Sleeper("fast")))))
        .build()
        .unwrap();
    orch.start().await.unwrap();

    let start = Instant::now();
    let outcome = orch.run("go").await.unwrap();
    assert!(start.elapsed() < Duration::from_millis(550), "tool calls were serialized");
    assert_eq!(outcome.answer, "both done");
    assert_eq!(
        tool_results(orch.history()),
        vec![
            ("slow-1".to_string(), "slow done".to_string()),
            ("fast-2".to_string(), "fast done".to_string())
        ]
    );
    orch.shutdown().await;
}

#[tokio::test]
async fn test_crash_mid_call_is_folded_into_history() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Ok(Outcome::tool_calls(vec![
            call("a", "fragile", json!({})),
            call("b", "echo", json!({"text": "still here"})),
        ])),
        Ok(Outcome::final_text("fallback answer")),
    ]));
    let mut orch = OrchestratorBuilder::new(test_config())
        .with_provider(provider.clone())
        .with_tool_source(Arc::new(CrashingLauncher))
        .with_tool_source(echo_source())
        .build()
        .unwrap();

    let outcome = orch.run("try the fragile tool").await.unwrap();
    assert_eq!(outcome.answer, "fallback answer");
    assert_eq!(orch.phase(), LoopPhase::Completed);

    let results = tool_results(orch.history());
    assert_eq!(results.len(), 2);
    assert!(results[0].1.starts_with("Error calling tool fragile:"), "got {}", results[0].1);
    assert_eq!(results[1].1, "still here");

    let states = orch.supervisor().process_states();
    assert!(states.contains(&("fragile".to_string(), ProcessState::Dead)));
    assert!(!orch.tool_names().is_empty());
    assert_eq!(provider.tool_sets()[1], vec!["echo".to_string()]);
    orch.shutdown().await;
}

#[tokio::test]
async fn test_failing_call_does_not_drop_siblings() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Ok(Outcome::tool_calls(vec![
            call("1", "echo", json!({"text": "one"})),
            call("2", "echo", json!({})),
            call("3", "missing_tool", json!({})),
            call("4", "echo", json!({"text": "four"})),
        ])),
        Ok(Outcome::final_text("ok")),
    ]));
    let mut orch = OrchestratorBuilder::new(test_config())
        .with_provider(provider)
        .with_tool_source(echo_source())
        .build()
        .unwrap();

    orch.run("batch").await.unwrap();
    let results = tool_results(orch.history());
    let ids: Vec<&str> = results.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2", "3", "4"]);
    assert_eq!(results[0].1, "one");
    assert!(results[1].1.contains("invalid_arguments"));
    assert!(results[2].1.starts_with("Error calling tool missing_tool"));
    assert_eq!(results[3].1, "four");
    orch.shutdown().await;
}

#[tokio::test]
async fn test_nested_session_beyond_limit_is_refused() {
    let launches = Arc::new(AtomicUsize::new(0));
    let counted: ToolSource = Arc::new(CountingLauncher {
        inner: echo_source(),
        launches: launches.clone(),
    });
    let config = AppConfig {
        max_recursion_depth: 2,
        ..test_config()
    };

    let err = OrchestratorBuilder::new(config)
        .with_provider(Arc::new(ScriptedProvider::new(vec![])))
        .with_tool_source(counted)
        .with_depth(3)
        .build()
        .err()
        .unwrap();
    assert!(matches!(
        err,
        OrchestratorError::RecursionLimit(RecursionLimitError {
            child_depth: 3,
            max_depth: 2
        })
    ));
    assert_eq!(launches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_agent_tool_at_max_depth_aborts_parent_without_launching_child() {
    let launches = Arc::new(AtomicUsize::new(0));
    let config = AppConfig {
        max_recursion_depth: 2,
        ..test_config()
    };
    let provider = Arc::new(ScriptedProvider::new(vec![Ok(Outcome::tool_calls(vec![call(
        "deep",
        "agent",
        json!({"query": "go deeper"}),
    )]))]));
    let recipe = AgentRecipe::new(config.clone())
        .with_provider(provider.clone())
        .with_tool_source(Arc::new(CountingLauncher {
            inner: echo_source(),
            launches: launches.clone(),
        }));
    let agent = AgentToolHandler::new(recipe);

    let mut orch = OrchestratorBuilder::new(config)
        .with_provider(provider.clone())
        .with_tool_source(agent.as_source())
        .with_depth(2)
        .build()
        .unwrap();

    let err = orch.run("delegate").await.unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::RecursionLimit(RecursionLimitError {
            child_depth: 3,
            max_depth: 2
        })
    ));
    assert_eq!(orch.phase(), LoopPhase::Aborted);
    assert_eq!(launches.load(Ordering::SeqCst), 0);
    assert_eq!(provider.calls(), 1);
    assert!(matches!(orch.run("again").await, Err(OrchestratorError::SessionClosed)));
    orch.shutdown().await;
}

#[tokio::test]
async fn test_nested_agent_answers_through_parent() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Ok(Outcome::tool_calls(vec![call("sub", "agent", json!({"query": "child task"}))])),
        Ok(Outcome::tool_calls(vec![call("e", "echo", json!({"text": "from child tool"}))])),
        Ok(Outcome::final_text("child answer")),
        Ok(Outcome::final_text("root answer")),
    ]));
    let config = test_config();
    let recipe = AgentRecipe::new(config.clone())
        .with_provider(provider.clone())
        .with_system_prompt("you are a sub-agent")
        .with_tool_source(echo_source())
        .recursive(false);
    let agent = AgentToolHandler::new(recipe);

    let mut orch = OrchestratorBuilder::new(config)
        .with_provider(provider.clone())
        .with_tool_source(agent.as_source())
        .build()
        .unwrap();

    let outcome = orch.run("use a sub-agent").await.unwrap();
    assert_eq!(outcome.answer, "root answer");
    assert_eq!(tool_results(orch.history()), vec![("sub".to_string(), "child answer".to_string())]);

    let histories = provider.histories();
    assert_eq!(histories.len(), 4);
    assert_eq!(histories[1][0].content, "you are a sub-agent");
    assert_eq!(histories[1].last().map(|m| m.content.as_str()), Some("child task"));
    assert_eq!(provider.tool_sets()[1], vec!["echo".to_string()]);
    orch.shutdown().await;
}

#[tokio::test]
async fn test_transient_model_errors_are_retried() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Err(LlmError::Network("connection reset".into())),
        Err(LlmError::Server {
            status: 503,
            body: "busy".into(),
        }),
        Ok(Outcome::final_text("third time lucky")),
    ]));
    let config = AppConfig {
        backoff_base_ms: 40,
        backoff_max_ms: 1_000,
        ..test_config()
    };
    let mut orch = OrchestratorBuilder::new(config).with_provider(provider.clone()).build().unwrap();

    let start = Instant::now();
    let outcome = orch.run("hello").await.unwrap();
    assert_eq!(outcome.answer, "third time lucky");
    assert_eq!(outcome.iterations, 1);
    assert_eq!(provider.calls(), 3);
    assert!(start.elapsed() >= Duration::from_millis(120), "expected two backoff delays");
}

#[tokio::test]
async fn test_fatal_model_error_aborts_session() {
    let provider = Arc::new(ScriptedProvider::new(vec![Err(LlmError::Auth("bad key".into()))]));
    let mut orch = OrchestratorBuilder::new(test_config()).with_provider(provider.clone()).build().unwrap();
    let err = orch.run("hello").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::ModelProvider(LlmError::Auth(_))));
    assert_eq!(orch.phase(), LoopPhase::Aborted);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_iteration_budget_returns_partial_answer() {
    let provider = Arc::new(
        ScriptedProvider::new(vec![]).with_fallback(Outcome::tool_calls(vec![call("x", "echo", json!({"text": "partial"}))])),
    );
    let config = AppConfig {
        max_iterations: 3,
        ..test_config()
    };
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut orch = OrchestratorBuilder::new(config)
        .with_provider(provider.clone())
        .with_tool_source(echo_source())
        .with_event_tx(tx)
        .build()
        .unwrap();

    let outcome = orch.run("loop forever").await.unwrap();
    assert!(outcome.budget_exceeded);
    assert_eq!(outcome.iterations, 3);
    assert_eq!(provider.calls(), 3);
    assert!(outcome.answer.starts_with(BUDGET_EXCEEDED_PREFIX));
    assert!(outcome.answer.ends_with("partial"));

    let mut saw_budget = false;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, LoopEvent::BudgetExceeded { iterations: 3 }) {
            saw_budget = true;
        }
    }
    assert!(saw_budget);
    orch.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let mut orch = OrchestratorBuilder::new(test_config())
        .with_provider(Arc::new(ScriptedProvider::new(vec![Ok(Outcome::final_text("hi"))])))
        .with_tool_source(echo_source())
        .build()
        .unwrap();
    orch.run("hello").await.unwrap();

    orch.shutdown().await;
    let first = orch.snapshot();
    orch.shutdown().await;
    let second = orch.snapshot();
    assert_eq!(first.phase, LoopPhase::Dead);
    assert_eq!(second.phase, LoopPhase::Dead);
    assert_eq!(first.message_count, second.message_count);
    assert!(matches!(orch.run("more").await, Err(OrchestratorError::SessionClosed)));
}

#[tokio::test]
async fn test_shutdown_handle_cancels_in_flight_run() {
    let provider = Arc::new(
        ScriptedProvider::new(vec![]).with_fallback(Outcome::final_text("too late")).with_delay(Duration::from_secs(5)),
    );
    let mut orch = OrchestratorBuilder::new(test_config())
        .with_provider(provider)
        .with_tool_source(echo_source())
        .build()
        .unwrap();
    orch.start().await.unwrap();

    let handle = orch.shutdown_handle();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown().await;
        handle.shutdown().await;
    });

    let start = Instant::now();
    let err = orch.run("slow").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Cancelled));
    assert!(start.elapsed() < Duration::from_secs(2));
    canceller.await.unwrap();
    assert!(orch.supervisor().is_shut_down());
    orch.shutdown().await;
    assert_eq!(orch.phase(), LoopPhase::Dead);
}

#[tokio::test]
async fn test_cancel_during_dispatch_answers_every_issued_call() {
    let provider = Arc::new(ScriptedProvider::new(vec![Ok(Outcome::tool_calls(vec![
        call("c1", "nap", json!({"ms": 5000})),
        call("c2", "nap", json!({"ms": 5000})),
    ]))]));
    let mut orch = OrchestratorBuilder::new(test_config())
        .with_provider(provider)
        .with_tool_source(Arc::new(InProcessLauncher::new("nap", Arc::new(Sleeper("nap")))))
        .build()
        .unwrap();
    orch.start().await.unwrap();

    let handle = orch.shutdown_handle();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.shutdown().await;
    });

    let start = Instant::now();
    let err = orch.run("nap twice").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Cancelled));
    assert!(start.elapsed() < Duration::from_secs(2));
    canceller.await.unwrap();

    let issued: Vec<String> = orch
        .history()
        .iter()
        .flat_map(|m| m.tool_calls.iter().map(|c| c.call_id.clone()))
        .collect();
    let answered = tool_results(orch.history());
    assert_eq!(issued, vec!["c1".to_string(), "c2".to_string()]);
    assert_eq!(
        answered.iter().map(|(id, _)| id.clone()).collect::<Vec<_>>(),
        issued
    );
    assert!(answered
        .iter()
        .all(|(_, text)| text.contains("cancelled by session shutdown")));
    assert_eq!(orch.phase(), LoopPhase::Aborted);
}

#[tokio::test]
async fn test_second_start_does_not_relaunch_sources() {
    let launches = Arc::new(AtomicUsize::new(0));
    let source: ToolSource = Arc::new(CountingLauncher {
        inner: echo_source(),
        launches: launches.clone(),
    });
    let mut orch = OrchestratorBuilder::new(test_config())
        .with_provider(Arc::new(ScriptedProvider::new(vec![Ok(Outcome::final_text("ok"))])))
        .with_tool_source(source)
        .build()
        .unwrap();

    let first = orch.start().await.unwrap();
    assert_eq!(first.launched, vec!["echo".to_string()]);
    let second = orch.start().await.unwrap();
    assert!(second.launched.is_empty());
    assert_eq!(launches.load(Ordering::SeqCst), 1);
    assert_eq!(
        orch.supervisor().process_states(),
        vec![("echo".to_string(), ProcessState::Ready)]
    );
    assert_eq!(orch.run("hi").await.unwrap().answer, "ok");
    assert_eq!(launches.load(Ordering::SeqCst), 1);
    orch.shutdown().await;
}

#[tokio::test]
async fn test_handshake_timeout_with_no_other_tools_fails_session() {
    let config = AppConfig {
        handshake_timeout_secs: 0.1,
        ..test_config()
    };
    let mut orch = OrchestratorBuilder::new(config)
        .with_provider(Arc::new(ScriptedProvider::new(vec![])))
        .with_tool_source(Arc::new(SilentLauncher))
        .build()
        .unwrap();

    match orch.start().await {
        Err(OrchestratorError::NoToolsAvailable { attempted, failures }) => {
            assert_eq!(attempted, 1);
            assert!(matches!(failures[0], ToolProcessError::HandshakeTimeout { .. }));
        }
        other => panic!("unexpected start result: {:?}", other.map(|r| r.launched)),
    }
    assert_eq!(orch.phase(), LoopPhase::Aborted);
    orch.shutdown().await;
}

#[tokio::test]
async fn test_one_failed_source_does_not_stop_the_session() {
    let config = AppConfig {
        handshake_timeout_secs: 0.1,
        ..test_config()
    };
    let mut orch = OrchestratorBuilder::new(config)
        .with_provider(Arc::new(ScriptedProvider::new(vec![Ok(Outcome::final_text("fine"))])))
        .with_tool_source(Arc::new(SilentLauncher))
        .with_tool_source(echo_source())
        .build()
        .unwrap();

    let report = orch.start().await.unwrap();
    assert_eq!(report.launched, vec!["echo".to_string()]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(orch.run("hi").await.unwrap().answer, "fine");
    orch.shutdown().await;
}

#[tokio::test]
async fn test_history_round_trips_through_persistence() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Ok(Outcome::tool_calls(vec![call("c1", "echo", json!({"text": "saved"}))])),
        Ok(Outcome::final_text("done")),
    ]));
    let mut orch = OrchestratorBuilder::new(test_config())
        .with_provider(provider)
        .with_tool_source(echo_source())
        .build()
        .unwrap();
    orch.run("persist me").await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.json");
    orch.save_history(&path).unwrap();
    let restored = ConversationPersistence::new(&path).load().unwrap();
    assert_eq!(restored.snapshot(), orch.history());

    let resumed = OrchestratorBuilder::new(test_config())
        .with_provider(Arc::new(ScriptedProvider::new(vec![])))
        .with_history(restored)
        .build()
        .unwrap();
    assert_eq!(resumed.history(), orch.history());
    orch.shutdown().await;
}

#[test]
fn test_recursion_limit_maps_from_wire_error() {
    let wire = ToolInvocationError::recursion_limit(RecursionLimitError {
        child_depth: 4,
        max_depth: 3,
    });
    let json = serde_json::to_value(&wire).unwrap();
    let back: ToolInvocationError = serde_json::from_value(json).unwrap();
    assert!(matches!(
        ToolCallError::from_invocation(back),
        ToolCallError::RecursionLimit(RecursionLimitError {
            child_depth: 4,
            max_depth: 3
        })
    ));
}

#[cfg(unix)]
mod subprocess {
    use super::*;
    use fractal::tools::CommandLauncher;

    const HANDSHAKE: &str = r#"{"type":"handshake","tools":[{"tool_name":"ping","description":"pong","argument_schema":{"type":"object"}}],"concurrent":false}"#;

    fn script_source(name: &str, body: &str) -> ToolSource {
        let script = format!("read line; echo '{HANDSHAKE}'; {body}");
        Arc::new(CommandLauncher::new(name, "sh").with_args(["-c".to_string(), script]))
    }

    #[tokio::test]
    async fn test_scripted_subprocess_answers_invoke() {
        let body = r#"read line; id=$(printf '%s' "$line" | sed 's/.*"call_id":"\([^"]*\)".*/\1/'); printf '{"call_id":"%s","result":"pong"}\n' "$id"; read line"#;
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(Outcome::tool_calls(vec![call("p", "ping", json!({}))])),
            Ok(Outcome::final_text("got pong")),
        ]));
        let mut orch = OrchestratorBuilder::new(test_config())
            .with_provider(provider)
            .with_tool_source(script_source("pinger", body))
            .build()
            .unwrap();

        let outcome = orch.run("ping it").await.unwrap();
        assert_eq!(outcome.answer, "got pong");
        assert_eq!(tool_results(orch.history()), vec![("p".to_string(), "pong".to_string())]);
        orch.shutdown().await;
        orch.shutdown().await;
        assert_eq!(orch.phase(), LoopPhase::Dead);
    }

    #[tokio::test]
    async fn test_scripted_subprocess_crash_is_reported() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(Outcome::tool_calls(vec![call("p", "ping", json!({}))])),
            Ok(Outcome::final_text("ping tool is down")),
        ]));
        let mut orch = OrchestratorBuilder::new(test_config())
            .with_provider(provider)
            .with_tool_source(script_source("crasher", "read line; exit 3"))
            .build()
            .unwrap();

        let outcome = orch.run("ping it").await.unwrap();
        assert_eq!(outcome.answer, "ping tool is down");
        let results = tool_results(orch.history());
        assert!(results[0].1.starts_with("Error calling tool ping:"));
        assert_eq!(
            orch.supervisor().process_states(),
            vec![("crasher".to_string(), ProcessState::Dead)]
        );
        orch.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_launch_failure() {
        let mut orch = OrchestratorBuilder::new(test_config())
            .with_provider(Arc::new(ScriptedProvider::new(vec![])))
            .with_tool_source(Arc::new(CommandLauncher::new("ghost", "/nonexistent/fractal-tool")))
            .build()
            .unwrap();
        assert!(matches!(
            orch.start().await,
            Err(OrchestratorError::NoToolsAvailable { attempted: 1, .. })
        ));
    }
}
