//! File reading tool with a character ceiling and binary detection.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::{char_byte_budget, optional_u64, read_capped};
use crate::security::truncate_chars;
use crate::tool::{required_str, Tool, ToolContext, ToolError, ToolSpec};

pub struct ReadFileTool;

impl ReadFileTool {
    const DEFAULT_MAX_CHARS: u64 = 20_000;

    /// Check if content appears to be binary (contains null bytes in first 8KB).
    fn is_binary(bytes: &[u8]) -> bool {
        let check_len = bytes.len().min(8192);
        bytes[..check_len].contains(&0)
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "read_file".to_string(),
            description: "Read a UTF-8 text file from the workspace.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "File path relative to the workspace"
                    },
                    "max_chars": {
                        "type": "integer",
                        "description": "Maximum characters to return (default 20000)"
                    }
                },
                "required": ["path"]
            }),
        }
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<Value, ToolError> {
        let policy = &context.policy;
        let path = policy.check_path(required_str(&input, "path")?)?;
        let max_chars = optional_u64(&input, "max_chars", Self::DEFAULT_MAX_CHARS)? as usize;
        policy.check_read_chars(max_chars)?;

        debug!(path = %path.display(), max_chars, "reading file");

        let (bytes, total) = read_capped(&path, char_byte_budget(max_chars)).await?;

        if Self::is_binary(&bytes) {
            return Ok(json!(format!("Binary file, {total} bytes")));
        }

        let content = String::from_utf8_lossy(&bytes);
        let mut output = truncate_chars(&content, max_chars);
        if total > bytes.len() as u64 && !output.ends_with("...[truncated]") {
            output.push_str("\n...[truncated]");
        }
        Ok(Value::String(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::test_support::context_for;
    use crate::tool::ToolErrorKind;

    #[tokio::test]
    async fn test_read_file() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("test.txt"), "line1\nline2\nline3\n")
            .await
            .unwrap();

        let output = ReadFileTool
            .execute(json!({"path": "test.txt"}), &context_for(dir.path()))
            .await
            .unwrap();
        assert_eq!(output, json!("line1\nline2\nline3\n"));
    }

    #[tokio::test]
    async fn test_truncation_marker() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("long.txt"), "abcdefghij").await.unwrap();

        let output = ReadFileTool
            .execute(json!({"path": "long.txt", "max_chars": 4}), &context_for(dir.path()))
            .await
            .unwrap();
        assert_eq!(output, json!("abcd\n...[truncated]"));
    }

    #[tokio::test]
    async fn test_large_file_is_cut_at_budget() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("huge.txt"), "z".repeat(2_000_000)).unwrap();

        let output = ReadFileTool
            .execute(json!({"path": "huge.txt", "max_chars": 3}), &context_for(dir.path()))
            .await
            .unwrap();
        assert_eq!(output, json!("zzz\n...[truncated]"));
    }

    #[tokio::test]
    async fn test_max_chars_above_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let err = ReadFileTool
            .execute(json!({"path": "a.txt", "max_chars": 10_000_000}), &context_for(dir.path()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ToolErrorKind::LimitExceeded);
    }

    #[tokio::test]
    async fn test_binary_file_detection() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("binary.bin"), b"hello\x00world")
            .await
            .unwrap();

        let output = ReadFileTool
            .execute(json!({"path": "binary.bin"}), &context_for(dir.path()))
            .await
            .unwrap();
        assert!(output.as_str().unwrap().starts_with("Binary file"));
    }

    #[tokio::test]
    async fn test_path_escape_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = ReadFileTool
            .execute(json!({"path": "../../etc/passwd"}), &context_for(dir.path()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ToolErrorKind::PathEscape);
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ReadFileTool
            .execute(json!({"path": "nope.txt"}), &context_for(dir.path()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ToolErrorKind::ExecutionFailed);
    }
}
