//! Shell command execution tool.
//!
//! Runs commands via `sh -c` inside the workspace, after the policy's shell
//! check and timeout ceiling.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{char_byte_budget, drain_tail, optional_u64};
use crate::security::tail_chars;
use crate::tool::{required_str, Tool, ToolContext, ToolError, ToolSpec};

pub struct RunShellTool;

impl RunShellTool {
    const DEFAULT_TIMEOUT_SECS: u64 = 20;
}

#[async_trait]
impl Tool for RunShellTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "run_shell".to_string(),
            description: "Run a shell command inside the workspace and return exit code, stdout and stderr."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "The shell command to execute"
                    },
                    "timeout": {
                        "type": "integer",
                        "description": "Timeout in seconds (default 20)"
                    },
                    "working_dir": {
                        "type": "string",
                        "description": "Directory to run in, relative to the workspace"
                    }
                },
                "required": ["command"]
            }),
        }
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<Value, ToolError> {
        let command = required_str(&input, "command")?;
        let policy = &context.policy;
        policy.check_shell(command)?;

        let timeout_secs = optional_u64(&input, "timeout", Self::DEFAULT_TIMEOUT_SECS)?.max(1);
        policy.check_shell_timeout(timeout_secs)?;

        let working_dir = match input.get("working_dir").and_then(Value::as_str) {
            Some(dir) => policy.check_path(dir)?,
            None => context.working_directory.clone(),
        };
        if !working_dir.is_dir() {
            return Err(ToolError::InvalidInput(format!(
                "working_dir is not a directory: {}",
                working_dir.display()
            )));
        }

        debug!(
            command = command,
            timeout_secs = timeout_secs,
            working_dir = %working_dir.display(),
            "executing shell command"
        );

        let timeout = Duration::from_secs(timeout_secs);
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::ExecutionFailed(format!("failed to spawn shell: {e}")))?;

        let max_output = policy.config().max_output_chars;
        let byte_budget = char_byte_budget(max_output);
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let run = async {
            let out = async {
                match stdout {
                    Some(pipe) => drain_tail(pipe, byte_budget).await,
                    None => Ok(Vec::new()),
                }
            };
            let err = async {
                match stderr {
                    Some(pipe) => drain_tail(pipe, byte_budget).await,
                    None => Ok(Vec::new()),
                }
            };
            let (out, err, status) = tokio::join!(out, err, child.wait());
            Ok::<_, std::io::Error>((status?, out?, err?))
        };

        let (status, stdout, stderr) = match tokio::time::timeout(timeout, run).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ToolError::ExecutionFailed(format!(
                    "command execution error: {e}"
                )));
            }
            Err(_) => {
                warn!(command = command, timeout_secs = timeout_secs, "command timed out");
                return Err(ToolError::Timeout(timeout));
            }
        };

        let exit_code = status.code().unwrap_or(-1);
        if !status.success() {
            debug!(exit_code = exit_code, "command returned non-zero exit code");
        }

        Ok(json!({
            "exit_code": exit_code,
            "stdout": tail_chars(&String::from_utf8_lossy(&stdout), max_output),
            "stderr": tail_chars(&String::from_utf8_lossy(&stderr), max_output),
        }))
    }
}
