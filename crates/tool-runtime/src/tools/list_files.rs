use async_trait::async_trait;
use serde_json::{json, Value};

use super::{display_relative, optional_str};
use crate::tool::{Tool, ToolContext, ToolError, ToolSpec};

/// Lists one directory level, directories suffixed with `/`.
pub struct ListFilesTool;

#[async_trait]
impl Tool for ListFilesTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "list_files".to_string(),
            description: "List files and directories at a workspace path.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Directory relative to the workspace (default '.')"
                    }
                }
            }),
        }
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<Value, ToolError> {
        let root = context.policy.workspace_root();
        let target = context.policy.check_path(optional_str(&input, "path", "."))?;

        let metadata = tokio::fs::metadata(&target).await.map_err(|_| {
            ToolError::ExecutionFailed(format!("Path not found: {}", display_relative(root, &target)))
        })?;
        if metadata.is_file() {
            return Ok(json!(display_relative(root, &target)));
        }

        let mut reader = tokio::fs::read_dir(&target)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("failed to list '{}': {e}", target.display())))?;
        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?
        {
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            let mark = if is_dir { "/" } else { "" };
            entries.push(format!("{}{mark}", display_relative(root, &entry.path())));
        }
        entries.sort();

        if entries.is_empty() {
            Ok(json!("(empty)"))
        } else {
            Ok(json!(entries.join("\n")))
        }
    }
}
