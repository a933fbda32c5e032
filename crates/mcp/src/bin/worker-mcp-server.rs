//! worker-mcp-server: serves the built-in tools of one workspace over MCP.
//!
//! Speaks newline-delimited JSON-RPC on stdin/stdout; all logging goes to
//! stderr.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use worker_mcp::{McpServer, StdioTransport};
use worker_tool_runtime::{register_builtin_tools, SecurityConfig, SecurityPolicy, ToolContext, ToolRegistry};

// ── CLI ─────────────────────────────────────────────────────────────

/// MCP server exposing the built-in workspace tools.
#[derive(Parser, Debug)]
#[command(name = "worker-mcp-server", version, about)]
struct Cli {
    /// Workspace root every tool is confined to.
    #[arg(long, env = "WORKER_MCP_WORKSPACE", default_value = ".")]
    workspace: PathBuf,

    /// Name reported in the initialize handshake.
    #[arg(long, default_value = "worker-mcp")]
    name: String,

    /// Disable the run_shell tool's command execution.
    #[arg(long)]
    no_shell: bool,
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let workspace = cli
        .workspace
        .canonicalize()
        .with_context(|| format!("workspace {} is not accessible", cli.workspace.display()))?;

    let config = SecurityConfig {
        allow_shell: !cli.no_shell,
        ..SecurityConfig::default()
    };
    let policy = Arc::new(SecurityPolicy::new(&workspace, config));

    let mut registry = ToolRegistry::new();
    register_builtin_tools(&mut registry);
    info!(workspace = %workspace.display(), tools = registry.len(), "serving built-in tools");

    let mut server = McpServer::new(registry, ToolContext::new(policy)).with_name(cli.name);
    let mut transport = StdioTransport::stdio();
    server.run(&mut transport).await.context("MCP server loop failed")?;
    Ok(())
}
