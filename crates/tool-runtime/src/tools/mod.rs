//! Built-in tool implementations.
//!
//! Every handler resolves paths, commands and URLs through the
//! [`SecurityPolicy`](crate::security::SecurityPolicy) in its context before
//! performing the effect.

pub mod fetch_url;
pub mod find_files;
pub mod grep_text;
pub mod json_file;
pub mod list_files;
pub mod read_file;
pub mod shell;
pub mod write_file;

pub use fetch_url::FetchUrlTool;
pub use find_files::FindFilesTool;
pub use grep_text::GrepTextTool;
pub use json_file::{ReadJsonTool, WriteJsonTool};
pub use list_files::ListFilesTool;
pub use read_file::ReadFileTool;
pub use shell::RunShellTool;
pub use write_file::WriteFileTool;

use crate::registry::ToolRegistry;
use crate::tool::{EchoTool, ToolError};
use serde_json::Value;
use std::collections::VecDeque;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Install every built-in tool into `registry`.
pub fn register_builtin_tools(registry: &mut ToolRegistry) {
    registry.register(EchoTool);
    registry.register(ListFilesTool);
    registry.register(ReadFileTool);
    registry.register(WriteFileTool);
    registry.register(RunShellTool);
    registry.register(FindFilesTool);
    registry.register(GrepTextTool);
    registry.register(FetchUrlTool::new());
    registry.register(ReadJsonTool);
    registry.register(WriteJsonTool);
}

pub(crate) fn optional_str<'a>(input: &'a Value, field: &str, default: &'a str) -> &'a str {
    input.get(field).and_then(Value::as_str).unwrap_or(default)
}

pub(crate) fn optional_u64(input: &Value, field: &str, default: u64) -> Result<u64, ToolError> {
    match input.get(field) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v
            .as_u64()
            .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
            .ok_or_else(|| ToolError::InvalidInput(format!("'{field}' must be a non-negative integer"))),
    }
}

/// Workspace-relative display form, `/`-separated.
pub(crate) fn display_relative(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let text = rel.to_string_lossy().replace('\\', "/");
    if text.is_empty() {
        ".".to_string()
    } else {
        text
    }
}

/// Bytes that always hold at least `chars + 1` UTF-8 characters.
pub(crate) fn char_byte_budget(chars: usize) -> usize {
    chars.saturating_mul(4).saturating_add(4)
}

/// Read at most `max_bytes` from the start of a file. Also returns the
/// file's full length so callers can tell whether it was cut.
pub(crate) async fn read_capped(path: &Path, max_bytes: usize) -> Result<(Vec<u8>, u64), ToolError> {
    let fail = |e: std::io::Error| ToolError::ExecutionFailed(format!("failed to read '{}': {e}", path.display()));
    let file = tokio::fs::File::open(path).await.map_err(fail)?;
    let total = file.metadata().await.map_err(fail)?.len();
    let mut bytes = Vec::with_capacity(max_bytes.min(usize::try_from(total).unwrap_or(usize::MAX)));
    file.take(max_bytes as u64).read_to_end(&mut bytes).await.map_err(fail)?;
    Ok((bytes, total))
}

/// Drain `reader` to the end, keeping only the last `max_bytes`.
pub(crate) async fn drain_tail<R: AsyncRead + Unpin>(mut reader: R, max_bytes: usize) -> std::io::Result<Vec<u8>> {
    let mut tail = VecDeque::with_capacity(max_bytes.min(64 * 1024));
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        tail.extend(&buf[..n]);
        if tail.len() > max_bytes {
            let excess = tail.len() - max_bytes;
            tail.drain(..excess);
        }
    }
    Ok(tail.into())
}
