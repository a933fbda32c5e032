use async_trait::async_trait;
use glob::Pattern;
use serde_json::{json, Value};
use std::path::PathBuf;
use walkdir::WalkDir;

use super::{display_relative, optional_str, optional_u64};
use crate::tool::{required_str, Tool, ToolContext, ToolError, ToolSpec};

/// Recursive glob search. A file matches when the pattern matches either its
/// workspace-relative path or its bare file name.
pub struct FindFilesTool;

impl FindFilesTool {
    const DEFAULT_LIMIT: u64 = 200;

    fn search(root: PathBuf, start: PathBuf, pattern: Pattern, limit: usize) -> Vec<String> {
        let mut matches = Vec::new();
        for entry in WalkDir::new(&start)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = display_relative(&root, entry.path());
            let name = entry.file_name().to_string_lossy();
            if pattern.matches(&rel) || pattern.matches(&name) {
                matches.push(rel);
                if matches.len() >= limit {
                    break;
                }
            }
        }
        matches
    }
}

#[async_trait]
impl Tool for FindFilesTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "find_files".to_string(),
            description: "Find files under a workspace directory by glob pattern.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "pattern": {
                        "type": "string",
                        "description": "Glob such as '*.rs' or 'src/**/*.toml'"
                    },
                    "path": {
                        "type": "string",
                        "description": "Directory to search (default '.')"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum matches (default 200)"
                    }
                },
                "required": ["pattern"]
            }),
        }
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<Value, ToolError> {
        let raw_pattern = required_str(&input, "pattern")?.trim();
        let pattern = Pattern::new(raw_pattern)
            .map_err(|e| ToolError::InvalidInput(format!("invalid glob '{raw_pattern}': {e}")))?;
        let limit = optional_u64(&input, "limit", Self::DEFAULT_LIMIT)?.max(1) as usize;
        let start = context.policy.check_path(optional_str(&input, "path", "."))?;
        if !start.is_dir() {
            return Err(ToolError::ExecutionFailed(format!(
                "Path not found or not directory: {}",
                start.display()
            )));
        }

        let root = context.policy.workspace_root().to_path_buf();
        let matches = tokio::task::spawn_blocking(move || Self::search(root, start, pattern, limit))
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("search task failed: {e}")))?;

        if matches.is_empty() {
            Ok(json!("(no matches)"))
        } else {
            Ok(json!(matches.join("\n")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::test_support::context_for;

    fn seed(dir: &std::path::Path) {
        std::fs::create_dir_all(dir.join("src/nested")).unwrap();
        std::fs::write(dir.join("src/lib.rs"), "").unwrap();
        std::fs::write(dir.join("src/nested/mod.rs"), "").unwrap();
        std::fs::write(dir.join("Cargo.toml"), "").unwrap();
    }

    #[tokio::test]
    async fn test_matches_file_name() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        let output = FindFilesTool
            .execute(json!({"pattern": "*.rs"}), &context_for(dir.path()))
            .await
            .unwrap();
        assert_eq!(output, json!("src/lib.rs\nsrc/nested/mod.rs"));
    }

    #[tokio::test]
    async fn test_matches_relative_path_and_limit() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        let ctx = context_for(dir.path());
        let output = FindFilesTool
            .execute(json!({"pattern": "src/nested/*"}), &ctx)
            .await
            .unwrap();
        assert_eq!(output, json!("src/nested/mod.rs"));

        let limited = FindFilesTool
            .execute(json!({"pattern": "*", "limit": 1}), &ctx)
            .await
            .unwrap();
        assert_eq!(limited.as_str().unwrap().lines().count(), 1);
    }

    #[tokio::test]
    async fn test_no_matches() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        let output = FindFilesTool
            .execute(json!({"pattern": "*.py", "path": "src"}), &context_for(dir.path()))
            .await
            .unwrap();
        assert_eq!(output, json!("(no matches)"));
    }

    #[tokio::test]
    async fn test_invalid_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let err = FindFilesTool
            .execute(json!({"pattern": "[unclosed"}), &context_for(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }
}
