//! File writing tool with parent directory creation.

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::display_relative;
use crate::tool::{required_str, Tool, ToolContext, ToolError, ToolSpec};

/// Write or append to files, creating parent directories as needed.
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "write_file".to_string(),
            description: "Write text to a workspace file, creating parent directories if needed."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "File path relative to the workspace"
                    },
                    "content": {
                        "type": "string",
                        "description": "Content to write to the file"
                    },
                    "append": {
                        "type": "boolean",
                        "description": "Append instead of overwriting (default false)"
                    }
                },
                "required": ["path", "content"]
            }),
        }
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<Value, ToolError> {
        let path = context.policy.check_path(required_str(&input, "path")?)?;
        let content = match input.get("content") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        let append = input.get("append").and_then(Value::as_bool).unwrap_or(false);

        debug!(path = %path.display(), bytes = content.len(), append, "writing file");

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                ToolError::ExecutionFailed(format!(
                    "failed to create directory '{}': {e}",
                    parent.display()
                ))
            })?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&path)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("failed to open '{}': {e}", path.display())))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("failed to write '{}': {e}", path.display())))?;
        file.flush()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("failed to flush '{}': {e}", path.display())))?;

        Ok(json!(format!(
            "Wrote file: {} ({} chars)",
            display_relative(context.policy.workspace_root(), &path),
            content.chars().count()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::test_support::context_for;
    use crate::tool::ToolErrorKind;

    #[tokio::test]
    async fn test_write_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let output = WriteFileTool
            .execute(
                json!({"path": "sub/dir/test.txt", "content": "hello world"}),
                &context_for(dir.path()),
            )
            .await
            .unwrap();

        assert_eq!(output, json!("Wrote file: sub/dir/test.txt (11 chars)"));
        let written = std::fs::read_to_string(dir.path().join("sub/dir/test.txt")).unwrap();
        assert_eq!(written, "hello world");
    }

    #[tokio::test]
    async fn test_overwrite_and_append() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_for(dir.path());
        std::fs::write(dir.path().join("log.txt"), "old contents").unwrap();

        WriteFileTool
            .execute(json!({"path": "log.txt", "content": "a"}), &ctx)
            .await
            .unwrap();
        WriteFileTool
            .execute(json!({"path": "log.txt", "content": "b", "append": true}), &ctx)
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(dir.path().join("log.txt")).unwrap(), "ab");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_write_through_dangling_link_rejected() {
        let outside = tempfile::tempdir().unwrap();
        let target = outside.path().join("pwned.txt");
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(&target, dir.path().join("link")).unwrap();

        let err = WriteFileTool
            .execute(json!({"path": "link", "content": "escaped"}), &context_for(dir.path()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ToolErrorKind::PathEscape);
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_path_escape_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = WriteFileTool
            .execute(
                json!({"path": "../escape.txt", "content": "bad"}),
                &context_for(dir.path()),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ToolErrorKind::PathEscape);
    }
}
