use async_trait::async_trait;
use glob::Pattern;
use regex::Regex;
use serde_json::{json, Value};
use std::path::PathBuf;
use walkdir::WalkDir;

use super::{display_relative, optional_str, optional_u64};
use crate::tool::{required_str, Tool, ToolContext, ToolError, ToolSpec};

const MAX_LINE_CHARS: usize = 300;

/// Regex search over UTF-8 files, reported as `path:line: text`.
pub struct GrepTextTool;

impl GrepTextTool {
    const DEFAULT_LIMIT: u64 = 200;

    fn search(root: PathBuf, start: PathBuf, regex: Regex, include: Pattern, limit: usize) -> Vec<String> {
        let mut hits = Vec::new();
        let files = WalkDir::new(&start)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter(|e| include.matches(&e.file_name().to_string_lossy()));

        for entry in files {
            // Binary or non-UTF-8 files are skipped.
            let Ok(text) = std::fs::read_to_string(entry.path()) else {
                continue;
            };
            let rel = display_relative(&root, entry.path());
            for (idx, line) in text.lines().enumerate() {
                if regex.is_match(line) {
                    let shown: String = line.chars().take(MAX_LINE_CHARS).collect();
                    hits.push(format!("{rel}:{}: {shown}", idx + 1));
                    if hits.len() >= limit {
                        return hits;
                    }
                }
            }
        }
        hits
    }
}

#[async_trait]
impl Tool for GrepTextTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "grep_text".to_string(),
            description: "Search workspace files for lines matching a regular expression.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "pattern": {
                        "type": "string",
                        "description": "Regular expression"
                    },
                    "path": {
                        "type": "string",
                        "description": "Directory to search (default '.')"
                    },
                    "include": {
                        "type": "string",
                        "description": "File name glob to include (default '*')"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum hits (default 200)"
                    }
                },
                "required": ["pattern"]
            }),
        }
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<Value, ToolError> {
        let raw = required_str(&input, "pattern")?;
        let regex = Regex::new(raw).map_err(|e| ToolError::InvalidInput(format!("invalid regex: {e}")))?;
        let include_raw = optional_str(&input, "include", "*");
        let include = Pattern::new(include_raw)
            .map_err(|e| ToolError::InvalidInput(format!("invalid include glob '{include_raw}': {e}")))?;
        let limit = optional_u64(&input, "limit", Self::DEFAULT_LIMIT)?.max(1) as usize;
        let start = context.policy.check_path(optional_str(&input, "path", "."))?;
        if !start.is_dir() {
            return Err(ToolError::ExecutionFailed(format!(
                "Path not found or not directory: {}",
                start.display()
            )));
        }

        let root = context.policy.workspace_root().to_path_buf();
        let hits = tokio::task::spawn_blocking(move || Self::search(root, start, regex, include, limit))
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("search task failed: {e}")))?;

        if hits.is_empty() {
            Ok(json!("(no matches)"))
        } else {
            Ok(json!(hits.join("\n")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::test_support::context_for;

    #[tokio::test]
    async fn test_grep_hits_with_line_numbers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("notes")).unwrap();
        std::fs::write(dir.path().join("notes/a.md"), "alpha\nTODO: write tests\nomega\n").unwrap();
        std::fs::write(dir.path().join("notes/b.txt"), "TODO: other\n").unwrap();

        let ctx = context_for(dir.path());
        let output = GrepTextTool
            .execute(json!({"pattern": "^TODO", "include": "*.md"}), &ctx)
            .await
            .unwrap();
        assert_eq!(output, json!("notes/a.md:2: TODO: write tests"));

        let all = GrepTextTool
            .execute(json!({"pattern": "TODO"}), &ctx)
            .await
            .unwrap();
        assert_eq!(all.as_str().unwrap().lines().count(), 2);
    }

    #[tokio::test]
    async fn test_long_lines_are_capped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("wide.txt"), format!("x{}", "y".repeat(1000))).unwrap();
        let output = GrepTextTool
            .execute(json!({"pattern": "^x"}), &context_for(dir.path()))
            .await
            .unwrap();
        let line = output.as_str().unwrap();
        assert_eq!(line.len(), "wide.txt:1: ".len() + MAX_LINE_CHARS);
    }

    #[tokio::test]
    async fn test_skips_binary_and_reports_no_matches() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("blob.bin"), [0xff, 0xfe, 0x00]).unwrap();
        let output = GrepTextTool
            .execute(json!({"pattern": "anything"}), &context_for(dir.path()))
            .await
            .unwrap();
        assert_eq!(output, json!("(no matches)"));
    }

    #[tokio::test]
    async fn test_invalid_regex() {
        let dir = tempfile::tempdir().unwrap();
        let err = GrepTextTool
            .execute(json!({"pattern": "("}), &context_for(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }
}
