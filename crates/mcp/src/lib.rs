//! MCP (Model Context Protocol) support for the worker.
//!
//! Newline-delimited JSON-RPC 2.0 over a child process's stdio, in both
//! directions: the client side mounts external tool servers into a
//! `ToolRegistry`, the server side exposes a registry to other processes.
//!
//! # Architecture
//!
//! - **types**: JSON-RPC 2.0 and MCP-specific protocol types
//! - **transport**: line transport over any async stream pair, plus channels
//! - **pending**: id → waiter table correlating responses with requests
//! - **client**: `McpClient` (one server process) and the `McpTool` adapter
//! - **runtime**: `McpRuntime`, mounting and shutting down a session's servers
//! - **config**: server list loading
//! - **server**: `McpServer` wrapping a `ToolRegistry`
//!
//! # Usage
//!
//! ```no_run
//! use worker_mcp::{McpRuntime, McpServerConfig};
//! use worker_tool_runtime::ToolRegistry;
//!
//! # async fn example() {
//! let mut registry = ToolRegistry::new();
//! let mut runtime = McpRuntime::new(".");
//! let config = McpServerConfig::new("files", "worker-mcp-server").with_args(["--workspace", "."]);
//! let report = runtime.mount_all(&[config], &mut registry).await;
//! println!("mounted {} tools", report.tool_count());
//! runtime.shutdown(&mut registry).await;
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod pending;
pub mod runtime;
pub mod server;
pub mod transport;
pub mod types;

pub use client::{mounted_tool_name, ClientState, McpClient, McpTool};
pub use config::{load_mcp_servers, parse_mcp_servers, McpServerConfig};
pub use error::McpError;
pub use runtime::{McpRuntime, MountReport};
pub use server::McpServer;
pub use transport::{ChannelTransport, LineTransport, McpTransport, StdioTransport};
pub use types::*;
