mod cli;
mod config;
mod observability;
mod session;
mod tasks;
mod worker;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

use worker_llm::{create_backend, resolve_api_config, ApiConfigInput, PROVIDER_PRESETS};
use worker_mcp::{load_mcp_servers, McpServerConfig};
use worker_tool_runtime::RemoteToolPolicy;

use crate::cli::{CliArgs, Command, SharedArgs, TaskAction};
use crate::config::{CliConfig, ConfigUpdate};
use crate::observability::JsonlEventSink;
use crate::tasks::{run_due_tasks, NewTask, ScheduledTask, TaskStore};
use crate::worker::{SessionSettings, WorkerSession};

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    let shared = args.command.shared().clone();
    init_tracing(shared.verbose);

    let workspace = shared
        .workspace
        .canonicalize()
        .with_context(|| format!("workspace {} is not accessible", shared.workspace.display()))?;
    if dotenvy::from_path(workspace.join(".env")).is_ok() {
        info!("Loaded .env from workspace");
    }

    let config = CliConfig::load(shared.config.as_deref()).context("failed to load configuration")?;

    match args.command {
        Command::Status(_) => run_status(&config, &shared, &workspace),
        Command::Chat(_) => {
            let session = start_session(&config, &shared, &workspace).await?;
            run_chat(session, memory_enabled(&config, &shared)).await
        }
        Command::Run { prompt, .. } => {
            let mut session = start_session(&config, &shared, &workspace).await?;
            let outcome = session.ask(&prompt).await;
            session.close().await;
            let reply = outcome.context("turn failed")?;
            println!("{reply}");
            Ok(())
        }
        Command::Heartbeat {
            message, every, count, ..
        } => run_heartbeat(&config, &shared, &workspace, &message, every, count).await,
        Command::Tasks { action } => run_tasks(action, &config, &shared, &workspace).await,
        Command::Config {
            api_key_provider,
            with_memory,
            gate_remote_tools,
            allow_shell,
            ..
        } => {
            let memory = if with_memory {
                Some(true)
            } else if shared.no_memory {
                Some(false)
            } else {
                None
            };
            let update = ConfigUpdate {
                provider: shared.provider.clone(),
                model: shared.model.clone(),
                base_url: shared.base_url.clone(),
                api_key: shared.api_key.clone(),
                api_key_provider,
                session: shared.session.clone(),
                timeout_secs: shared.timeout,
                max_iterations: shared.max_iterations,
                mcp_config: shared.mcp_config.clone(),
                memory,
                gate_remote_tools,
                allow_shell,
            };
            run_config(config, &shared, &update)
        }
    }
}

/// `RUST_LOG` wins; otherwise `warn`, raised to `info` for the worker
/// crates with `--verbose`.
fn init_tracing(verbose: bool) {
    let default = if verbose {
        "warn,mini_worker=info,worker_tool_runtime=info,worker_mcp=info,worker_llm=info"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn provider_name(config: &CliConfig, shared: &SharedArgs) -> String {
    shared
        .provider
        .clone()
        .unwrap_or_else(|| config.provider.clone())
        .trim()
        .to_lowercase()
}

/// History is on unless disabled by flag or by config.
fn memory_enabled(config: &CliConfig, shared: &SharedArgs) -> bool {
    !(shared.no_memory || config.no_memory)
}

fn session_id(config: &CliConfig, shared: &SharedArgs) -> String {
    shared.session.clone().unwrap_or_else(|| config.session.clone())
}

fn mcp_config_path(config: &CliConfig, shared: &SharedArgs, workspace: &Path) -> Option<PathBuf> {
    let raw = shared.mcp_config.clone().or_else(|| config.mcp_config.clone())?;
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let path = PathBuf::from(raw);
    Some(if path.is_absolute() { path } else { workspace.join(path) })
}

async fn start_session(config: &CliConfig, shared: &SharedArgs, workspace: &Path) -> Result<WorkerSession> {
    let provider = provider_name(config, shared);
    let timeout = Duration::from_secs(shared.timeout.unwrap_or(config.timeout_secs).max(1));

    let api = resolve_api_config(ApiConfigInput {
        provider: provider.clone(),
        model: config.resolve_model(&provider, shared.model.as_deref()),
        api_key: shared.api_key.clone(),
        base_url: shared.base_url.clone(),
        file_api_key: config.api_key(&provider),
        file_base_url: config.base_url(&provider),
        timeout: Some(timeout),
    })?;
    let banner = format!("provider={} model={}", api.provider, api.model);
    let backend = create_backend(api).context("failed to create model backend")?;

    let mcp_servers: Vec<McpServerConfig> = match mcp_config_path(config, shared, workspace) {
        Some(path) => load_mcp_servers(&path, workspace)
            .with_context(|| format!("failed to load MCP config {}", path.display()))?,
        None => Vec::new(),
    };

    let settings = SessionSettings {
        workspace: workspace.to_path_buf(),
        session_id: session_id(config, shared),
        memory: memory_enabled(config, shared),
        system_prompt: config.system_prompt.clone(),
        max_iterations: shared.max_iterations.unwrap_or(config.max_iterations).max(1),
        backend_timeout: timeout,
        tool_timeout: Duration::from_secs(config.tool_timeout_secs.max(1)),
        remote_policy: if config.gate_remote_tools {
            RemoteToolPolicy::Gated
        } else {
            RemoteToolPolicy::Trusted
        },
        security: config.security.clone(),
        mcp_servers,
    };
    let session = WorkerSession::start(backend, settings).await?;

    eprintln!(
        "[mini-worker] {banner} session={} tools={} resumed_turns={}",
        session.session_id(),
        session.tool_names().len(),
        session::user_turns(session.conversation().messages())
    );
    let report = session.mount_report();
    if !report.mounted.is_empty() {
        eprintln!(
            "[mcp] mounted {} tools from {} server(s)",
            report.tool_count(),
            report.mounted.len()
        );
    }
    for (server, reason) in &report.failed {
        eprintln!("[mcp] {server} unavailable: {reason}");
    }
    Ok(session)
}

async fn run_chat(mut session: WorkerSession, memory: bool) -> Result<()> {
    let memory = if memory { "on" } else { "off" };
    println!("Type 'exit' to quit. (memory {memory})");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("you> ");
        std::io::stdout().flush().ok();

        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input.to_lowercase().as_str(), "exit" | "quit") {
            break;
        }

        match session.ask(input).await {
            Ok(reply) => println!("agent> {reply}"),
            Err(e) => {
                error!(error = %e, "Turn failed");
                println!("agent error: {e:#}");
            }
        }
    }

    session.close().await;
    Ok(())
}

async fn run_heartbeat(
    config: &CliConfig,
    shared: &SharedArgs,
    workspace: &Path,
    message: &str,
    every: u64,
    count: u32,
) -> Result<()> {
    let mut session = start_session(config, shared, workspace).await?;
    let session_id = session.session_id().to_string();
    let replied = session
        .heartbeat(message, Duration::from_secs(every), count, |cycle, outcome| {
            println!("[heartbeat] cycle={cycle}/{count} session={session_id}");
            match outcome {
                Ok(reply) => println!("agent> {reply}"),
                Err(e) => println!("agent error: {e:#}"),
            }
        })
        .await;
    session.close().await;

    if replied == 0 {
        anyhow::bail!("no heartbeat cycle produced a reply");
    }
    Ok(())
}

async fn run_tasks(action: TaskAction, config: &CliConfig, shared: &SharedArgs, workspace: &Path) -> Result<()> {
    let store = TaskStore::new(workspace);
    let sink = JsonlEventSink::new(workspace, "scheduler")?;

    match action {
        TaskAction::Add { name, prompt, every, .. } => {
            let provider = provider_name(config, shared);
            let task = store.add(NewTask {
                name,
                prompt,
                model: Some(config.resolve_model(&provider, shared.model.as_deref())),
                base_url: shared.base_url.clone().or_else(|| config.base_url(&provider)),
                provider,
                session: session_id(config, shared),
                mcp_config: shared.mcp_config.clone().or_else(|| config.mcp_config.clone()),
                no_memory: !memory_enabled(config, shared),
                interval_secs: every,
            })?;
            sink.record("task_added", json!({"task_id": task.id, "name": task.name}));
            println!("{}", serde_json::to_string_pretty(&task)?);
        }
        TaskAction::List(_) => {
            println!("{}", serde_json::to_string_pretty(&store.list())?);
        }
        TaskAction::Delete { id, .. } => {
            let ok = store.delete(&id)?;
            if ok {
                sink.record("task_deleted", json!({"task_id": id}));
            }
            println!("{}", serde_json::to_string_pretty(&json!({"ok": ok, "id": id}))?);
        }
        TaskAction::Run(_) => {
            let executed = run_due_tasks(&store, |task| run_task_once(config, shared, workspace, task), Some(&sink)).await?;
            println!("{}", serde_json::to_string_pretty(&json!({"executed": executed}))?);
        }
        TaskAction::Start { poll, .. } => {
            println!("[scheduler] running, workspace={}, poll={poll}s", workspace.display());
            let mut ticker = tokio::time::interval(Duration::from_secs(poll));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = tokio::signal::ctrl_c() => {
                        println!("\n[scheduler] stopped");
                        break;
                    }
                }
                match run_due_tasks(&store, |task| run_task_once(config, shared, workspace, task), Some(&sink)).await {
                    Ok(0) => {}
                    Ok(executed) => println!("[scheduler] executed={executed}"),
                    Err(e) => error!(error = %e, "Scheduler pass failed"),
                }
            }
        }
    }
    Ok(())
}

/// One run of a stored task: a fresh session with the task's settings
/// layered over the invocation's flags.
async fn run_task_once(config: &CliConfig, shared: &SharedArgs, workspace: &Path, task: ScheduledTask) -> Result<String> {
    let task_args = SharedArgs {
        provider: Some(task.provider),
        model: task.model,
        base_url: task.base_url,
        session: Some(task.session),
        no_memory: task.no_memory,
        mcp_config: task.mcp_config,
        ..shared.clone()
    };
    let mut session = start_session(config, &task_args, workspace).await?;
    let outcome = session.ask(&task.prompt).await;
    session.close().await;
    outcome
}

fn run_config(mut config: CliConfig, shared: &SharedArgs, update: &ConfigUpdate) -> Result<()> {
    let config_path = CliConfig::resolve_path(shared.config.as_deref())?;
    let updated = config.apply(update);
    if updated {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Configuration updated");
    }
    let payload = json!({
        "updated": updated,
        "config_path": config_path.display().to_string(),
        "settings": config.redacted()?,
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn run_status(config: &CliConfig, shared: &SharedArgs, workspace: &Path) -> Result<()> {
    let provider = provider_name(config, shared);
    let mcp_path = mcp_config_path(config, shared, workspace);
    let config_path = CliConfig::resolve_path(shared.config.as_deref())?;
    let mut api_keys: Vec<&String> = config.api_keys.keys().collect();
    api_keys.sort();

    let payload = json!({
        "workspace": workspace.display().to_string(),
        "config_path": config_path.display().to_string(),
        "provider": provider,
        "model": config.resolve_model(&provider, shared.model.as_deref()),
        "base_url": shared.base_url.clone().or_else(|| config.base_url(&provider)),
        "timeout_secs": shared.timeout.unwrap_or(config.timeout_secs),
        "max_iterations": shared.max_iterations.unwrap_or(config.max_iterations),
        "session": session_id(config, shared),
        "no_memory": !memory_enabled(config, shared),
        "sessions_saved": session::count_sessions(workspace),
        "tasks_count": TaskStore::new(workspace).list().len(),
        "mcp_config_path": mcp_path.as_ref().map(|p| p.display().to_string()),
        "mcp_config_exists": mcp_path.as_ref().is_some_and(|p| p.exists()),
        "gate_remote_tools": config.gate_remote_tools,
        "allow_shell": config.security.allow_shell,
        "metrics": observability::read_counters(&observability::observability_dir(workspace).join("metrics.json")),
        "api_keys_configured": api_keys,
        "providers": PROVIDER_PRESETS.iter().map(|p| p.name).collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}
