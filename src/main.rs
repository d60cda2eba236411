//! Fractal - 递归 Agent-Tool 编排引擎
//!
//! 入口：处理一条查询并输出答案，或以 stdio 工具进程的形式对外提供本编排器。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use fractal::config::load_config;
use fractal::core::{OrchestratorBuilder, OrchestratorError, ShutdownManager};
use fractal::tools::{serve_stdio, AgentRecipe, AgentToolHandler};

#[derive(Debug, Parser)]
#[command(name = "fractal", version)]
#[command(about = "Recursive agent/tool orchestrator")]
#[command(subcommand_negates_reqs = true)]
struct Cli {
    /// Extra TOML config file, layered over config/fractal.toml
    #[arg(long, short = 'c', global = true, env = "FRACTAL_CONFIG")]
    config: Option<PathBuf>,

    /// Write the session's message history as JSON after the query
    #[arg(long)]
    save_history: Option<PathBuf>,

    /// The query to process
    #[arg(required = true)]
    query: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve this orchestrator as a tool process over stdin/stdout
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fractal::observability::init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref()).context("Failed to load configuration")?;

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    if let Some(Command::Serve) = cli.command {
        tracing::info!(provider = ?config.provider, "serving orchestrator as a tool process on stdio");
        let handler = AgentToolHandler::new(AgentRecipe::new(config));
        tokio::select! {
            res = serve_stdio(handler) => res.context("tool server failed")?,
            reason = shutdown.wait() => tracing::info!(%reason, "tool server stopped"),
        }
        return Ok(());
    }

    let Some(query) = cli.query else {
        bail!("a query is required");
    };
    let mut orchestrator = OrchestratorBuilder::new(config).build().context("Failed to build orchestrator")?;
    let forward = shutdown.forward_to(orchestrator.shutdown_handle());

    let result = orchestrator.run(&query).await;
    if let Some(path) = &cli.save_history {
        if let Err(e) = orchestrator.save_history(path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to save history");
        }
    }
    orchestrator.shutdown().await;
    forward.abort();

    match (result, shutdown.reason()) {
        (Ok(outcome), _) => {
            println!("{}", outcome.answer);
            Ok(())
        }
        (Err(OrchestratorError::Cancelled), Some(reason)) => bail!("query interrupted by {reason}"),
        (Err(e), _) => Err(e).context("query failed"),
    }
}
