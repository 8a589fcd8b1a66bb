//! Coda - 对话式任务编排引擎
//!
//! 入口：初始化日志与配置，组装编排器，进入 stdin 命令循环。
//! /pause 直接作用于共享信号（可打断正在执行的步骤），其余输入
//! 经命令通道交给编排器任务串行处理。

use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

use coda::agent::StructuredAgent;
use coda::config::load_config;
use coda::intent::IntentRouter;
use coda::llm::create_llm_from_config;
use coda::memory::SessionStore;
use coda::observability::{self, TracingDebugSink};
use coda::plan::Planner;
use coda::tools::{LocalFsAdapter, ToolExecutor};
use coda::{core::SessionSignals, Orchestrator, OrchestratorParts};

/// 交给编排器任务的命令
enum Command {
    Submit(String),
    Resume,
    Cancel,
    Quit,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config = load_config(None).context("Failed to load config")?;
    let workspace_root = config
        .app
        .workspace_root
        .clone()
        .unwrap_or_else(|| "workspace".into());
    std::fs::create_dir_all(&workspace_root).context("Failed to create workspace dir")?;

    let debug = Arc::new(TracingDebugSink);
    let llm = create_llm_from_config(&config);
    let executor = Arc::new(ToolExecutor::new(
        Arc::new(LocalFsAdapter::new(workspace_root.clone())),
        debug.clone(),
        config.tools.tool_timeout_secs,
        config.tools.bridge_timeout_secs,
    ));
    let agent = StructuredAgent::new(
        llm.clone(),
        executor,
        debug.clone(),
        config.orchestrator.max_tool_iterations,
    );
    let signals = Arc::new(SessionSignals::new());
    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();

    let mut orchestrator = Orchestrator::new(OrchestratorParts {
        planner: Arc::new(Planner::new(llm.clone(), debug.clone())),
        agent,
        router: IntentRouter::new(llm.clone(), debug.clone()),
        llm,
        store: SessionStore::new(&workspace_root),
        signals: signals.clone(),
        events: event_tx,
        debug,
        max_context_turns: config.app.max_context_turns,
        recent_context_chars: config.orchestrator.recent_context_chars,
        older_context_chars: config.orchestrator.older_context_chars,
    });

    if orchestrator.restore().await {
        tracing::info!("restored previous session from disk");
    }

    // 事件打印：一行一个 JSON，供上层界面消费
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!(error = %e, "unserializable event"),
            }
        }
    });

    let (cmd_tx, mut cmd_rx) = tokio::sync::mpsc::unbounded_channel::<Command>();

    // 编排器任务：串行消费命令
    let orchestrator_task = tokio::spawn(async move {
        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                Command::Submit(input) => orchestrator.handle_user_input(&input).await,
                Command::Resume => orchestrator.resume_task().await,
                Command::Cancel => orchestrator.cancel_task().await,
                Command::Quit => break,
            }
        }
    });

    println!("coda ready. Type a request, or /pause /resume /cancel /quit.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        match input {
            "/quit" | "/exit" => {
                let _ = cmd_tx.send(Command::Quit);
                break;
            }
            "/pause" => {
                // 直达信号：正在执行的步骤在下一个挂起点停下
                signals.pause();
                println!("pause requested");
            }
            "/resume" => {
                let _ = cmd_tx.send(Command::Resume);
            }
            "/cancel" => {
                let _ = cmd_tx.send(Command::Cancel);
            }
            other => {
                let _ = cmd_tx.send(Command::Submit(other.to_string()));
            }
        }
    }

    orchestrator_task.await.context("orchestrator task failed")?;
    Ok(())
}
