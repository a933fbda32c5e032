use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Local worker agent: a model in a loop with workspace tools.
///
/// Tools are confined to the workspace by a security policy; additional
/// tools can be mounted from MCP servers listed in `--mcp-config`.
#[derive(Parser, Debug)]
#[command(name = "mini-worker", version, about)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Interactive REPL; `exit` or `quit` ends it
    Chat(SharedArgs),
    /// Run one turn and print the reply
    Run {
        /// The user message for this turn
        #[arg(long, short)]
        prompt: String,
        #[command(flatten)]
        shared: SharedArgs,
    },
    /// Send the same message on a fixed interval
    Heartbeat {
        /// The user message sent every cycle
        #[arg(long, short)]
        message: String,
        /// Seconds between cycles
        #[arg(long, default_value_t = 300, value_parser = clap::value_parser!(u64).range(1..))]
        every: u64,
        /// Number of cycles to run
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        count: u32,
        #[command(flatten)]
        shared: SharedArgs,
    },
    /// Manage recurring tasks stored in the workspace
    Tasks {
        #[command(subcommand)]
        action: TaskAction,
    },
    /// Persist settings to the config file and print the result
    Config {
        /// Provider whose key `--api-key` sets (default: the configured provider)
        #[arg(long)]
        api_key_provider: Option<String>,
        /// Re-enable history after a persisted `--no-memory`
        #[arg(long, conflicts_with = "no_memory")]
        with_memory: bool,
        /// Screen remote tool arguments through the security policy
        #[arg(long)]
        gate_remote_tools: Option<bool>,
        /// Enable or disable the run_shell tool
        #[arg(long)]
        allow_shell: Option<bool>,
        #[command(flatten)]
        shared: SharedArgs,
    },
    /// Show resolved configuration and workspace state
    Status(SharedArgs),
}

#[derive(Subcommand, Debug)]
pub enum TaskAction {
    /// Store a new task; it is due immediately
    Add {
        #[arg(long)]
        name: String,
        /// The user message sent on every run
        #[arg(long, short)]
        prompt: String,
        /// Seconds between runs (minimum 10)
        #[arg(long, default_value_t = 300)]
        every: u64,
        #[command(flatten)]
        shared: SharedArgs,
    },
    /// Print stored tasks as JSON
    List(SharedArgs),
    /// Remove a task by id
    Delete {
        #[arg(long)]
        id: String,
        #[command(flatten)]
        shared: SharedArgs,
    },
    /// Run due tasks once
    Run(SharedArgs),
    /// Poll for due tasks until interrupted
    Start {
        /// Seconds between polls
        #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
        poll: u64,
        #[command(flatten)]
        shared: SharedArgs,
    },
}

impl Command {
    pub fn shared(&self) -> &SharedArgs {
        match self {
            Command::Chat(shared) | Command::Status(shared) => shared,
            Command::Run { shared, .. } | Command::Heartbeat { shared, .. } | Command::Config { shared, .. } => {
                shared
            }
            Command::Tasks { action } => action.shared(),
        }
    }
}

impl TaskAction {
    pub fn shared(&self) -> &SharedArgs {
        match self {
            TaskAction::List(shared) | TaskAction::Run(shared) => shared,
            TaskAction::Add { shared, .. } | TaskAction::Delete { shared, .. } | TaskAction::Start { shared, .. } => {
                shared
            }
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct SharedArgs {
    /// Provider preset: openai, openrouter, minimax or custom
    #[arg(long)]
    pub provider: Option<String>,

    /// Model name override (uses config or preset default if not set)
    #[arg(long)]
    pub model: Option<String>,

    /// API key (overrides env var and config file)
    #[arg(long)]
    pub api_key: Option<String>,

    /// Chat-completions base URL (overrides env var and config file)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Workspace root tools are confined to
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Session id to resume or create
    #[arg(long)]
    pub session: Option<String>,

    /// Do not load or persist the session history
    #[arg(long)]
    pub no_memory: bool,

    /// JSON file listing MCP servers to mount
    #[arg(long)]
    pub mcp_config: Option<String>,

    /// Maximum model calls per turn
    #[arg(long)]
    pub max_iterations: Option<usize>,

    /// Backend request timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Path to config file (default: ~/.config/mini-worker/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log lifecycle events at info level
    #[arg(long, short)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_with_shared_flags() {
        let args = CliArgs::try_parse_from([
            "mini-worker",
            "run",
            "--prompt",
            "list files",
            "--provider",
            "minimax",
            "--no-memory",
            "--max-iterations",
            "5",
        ])
        .unwrap();
        match &args.command {
            Command::Run { prompt, shared } => {
                assert_eq!(prompt, "list files");
                assert_eq!(shared.provider.as_deref(), Some("minimax"));
                assert!(shared.no_memory);
                assert_eq!(shared.max_iterations, Some(5));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(args.command.shared().workspace, PathBuf::from("."));
    }

    #[test]
    fn test_run_requires_prompt() {
        assert!(CliArgs::try_parse_from(["mini-worker", "run"]).is_err());
        assert!(CliArgs::try_parse_from(["mini-worker", "status", "--workspace", "/tmp"]).is_ok());
    }

    #[test]
    fn test_parse_heartbeat_defaults_and_bounds() {
        let args = CliArgs::try_parse_from(["mini-worker", "heartbeat", "-m", "ping"]).unwrap();
        match args.command {
            Command::Heartbeat { message, every, count, .. } => {
                assert_eq!(message, "ping");
                assert_eq!(every, 300);
                assert_eq!(count, 1);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(CliArgs::try_parse_from(["mini-worker", "heartbeat", "-m", "x", "--every", "0"]).is_err());
        assert!(CliArgs::try_parse_from(["mini-worker", "heartbeat", "-m", "x", "--count", "0"]).is_err());
    }

    #[test]
    fn test_parse_task_actions() {
        let args = CliArgs::try_parse_from([
            "mini-worker",
            "tasks",
            "add",
            "--name",
            "digest",
            "--prompt",
            "summarize",
            "--every",
            "60",
            "--workspace",
            "/tmp/ws",
        ])
        .unwrap();
        assert_eq!(args.command.shared().workspace, PathBuf::from("/tmp/ws"));
        match args.command {
            Command::Tasks {
                action: TaskAction::Add { name, prompt, every, .. },
            } => {
                assert_eq!((name.as_str(), prompt.as_str(), every), ("digest", "summarize", 60));
            }
            other => panic!("unexpected: {other:?}"),
        }

        let args = CliArgs::try_parse_from(["mini-worker", "tasks", "start"]).unwrap();
        assert!(matches!(
            args.command,
            Command::Tasks {
                action: TaskAction::Start { poll: 5, .. }
            }
        ));
        assert!(CliArgs::try_parse_from(["mini-worker", "tasks", "delete"]).is_err());
    }

    #[test]
    fn test_parse_config_update() {
        let args = CliArgs::try_parse_from([
            "mini-worker",
            "config",
            "--api-key",
            "k",
            "--api-key-provider",
            "openrouter",
            "--gate-remote-tools",
            "true",
        ])
        .unwrap();
        match args.command {
            Command::Config {
                api_key_provider,
                gate_remote_tools,
                with_memory,
                shared,
                ..
            } => {
                assert_eq!(shared.api_key.as_deref(), Some("k"));
                assert_eq!(api_key_provider.as_deref(), Some("openrouter"));
                assert_eq!(gate_remote_tools, Some(true));
                assert!(!with_memory);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(CliArgs::try_parse_from(["mini-worker", "config", "--with-memory", "--no-memory"]).is_err());
    }
}
