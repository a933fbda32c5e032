//! JSON document read/write tools.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use super::{char_byte_budget, display_relative, optional_u64, read_capped};
use crate::tool::{required_str, Tool, ToolContext, ToolError, ToolSpec};

pub struct ReadJsonTool;

#[async_trait]
impl Tool for ReadJsonTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "read_json".to_string(),
            description: "Read and parse a JSON file from the workspace.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "JSON file relative to the workspace"}
                },
                "required": ["path"]
            }),
        }
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<Value, ToolError> {
        let path = context.policy.check_path(required_str(&input, "path")?)?;
        let policy = &context.policy;
        let (bytes, total) = read_capped(&path, char_byte_budget(policy.config().max_read_chars)).await?;
        if total > bytes.len() as u64 {
            policy.check_read_chars(usize::try_from(total).unwrap_or(usize::MAX))?;
        }
        let text = String::from_utf8(bytes)
            .map_err(|e| ToolError::ExecutionFailed(format!("'{}' is not UTF-8: {e}", path.display())))?;
        policy.check_read_chars(text.chars().count())?;
        serde_json::from_str(&text)
            .map_err(|e| ToolError::ExecutionFailed(format!("invalid JSON in '{}': {e}", path.display())))
    }
}

pub struct WriteJsonTool;

impl WriteJsonTool {
    fn render(data: &Value, indent: usize) -> Result<String, ToolError> {
        if indent == 0 {
            return Ok(data.to_string());
        }
        let indent_str = " ".repeat(indent);
        let formatter = serde_json::ser::PrettyFormatter::with_indent(indent_str.as_bytes());
        let mut out = Vec::new();
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
        data.serialize(&mut serializer)
            .map_err(|e| ToolError::ExecutionFailed(format!("failed to encode JSON: {e}")))?;
        String::from_utf8(out).map_err(|e| ToolError::ExecutionFailed(e.to_string()))
    }
}

#[async_trait]
impl Tool for WriteJsonTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "write_json".to_string(),
            description: "Write a JSON value to a workspace file.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Target file relative to the workspace"},
                    "data": {"description": "Any JSON value"},
                    "indent": {"type": "integer", "description": "Indent width (default 2, 0 for compact)"}
                },
                "required": ["path", "data"]
            }),
        }
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<Value, ToolError> {
        let path = context.policy.check_path(required_str(&input, "path")?)?;
        let data = input
            .get("data")
            .ok_or_else(|| ToolError::InvalidInput("missing 'data' field".to_string()))?;
        let indent = optional_u64(&input, "indent", 2)?.min(16) as usize;
        let rendered = Self::render(data, indent)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::ExecutionFailed(format!("failed to create '{}': {e}", parent.display())))?;
        }
        tokio::fs::write(&path, rendered)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("failed to write '{}': {e}", path.display())))?;

        Ok(json!(format!(
            "Wrote JSON file: {}",
            display_relative(context.policy.workspace_root(), &path)
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::{SecurityConfig, SecurityPolicy};
    use crate::tool::test_support::context_for;
    use crate::tool::ToolErrorKind;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_for(dir.path());
        let data = json!({"name": "worker", "tags": ["a", "b"]});

        let out = WriteJsonTool
            .execute(json!({"path": "state/data.json", "data": data}), &ctx)
            .await
            .unwrap();
        assert_eq!(out, json!("Wrote JSON file: state/data.json"));

        let raw = std::fs::read_to_string(dir.path().join("state/data.json")).unwrap();
        assert!(raw.contains("\n  \"name\""));

        let read = ReadJsonTool
            .execute(json!({"path": "state/data.json"}), &ctx)
            .await
            .unwrap();
        assert_eq!(read, data);
    }

    #[tokio::test]
    async fn test_compact_indent() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_for(dir.path());
        WriteJsonTool
            .execute(json!({"path": "c.json", "data": [1, 2], "indent": 0}), &ctx)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("c.json")).unwrap(), "[1,2]");
    }

    #[tokio::test]
    async fn test_invalid_json_and_escape() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{not json").unwrap();
        let ctx = context_for(dir.path());

        let err = ReadJsonTool.execute(json!({"path": "bad.json"}), &ctx).await.unwrap_err();
        assert_eq!(err.kind(), ToolErrorKind::ExecutionFailed);

        let err = WriteJsonTool
            .execute(json!({"path": "../x.json", "data": 1}), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ToolErrorKind::PathEscape);
    }

    #[tokio::test]
    async fn test_oversized_json_refused_before_reading() {
        let dir = tempfile::tempdir().unwrap();
        let config = SecurityConfig {
            max_read_chars: 10,
            ..SecurityConfig::default()
        };
        let ctx = ToolContext::new(Arc::new(SecurityPolicy::new(dir.path(), config)));
        std::fs::write(dir.path().join("big.json"), format!("[{}1]", "1,".repeat(100_000))).unwrap();
        std::fs::write(dir.path().join("small.json"), "[1,2]").unwrap();

        let err = ReadJsonTool.execute(json!({"path": "big.json"}), &ctx).await.unwrap_err();
        assert_eq!(err.kind(), ToolErrorKind::LimitExceeded);
        assert_eq!(
            ReadJsonTool.execute(json!({"path": "small.json"}), &ctx).await.unwrap(),
            json!([1, 2])
        );
    }
}
