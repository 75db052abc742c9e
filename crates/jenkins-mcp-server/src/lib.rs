//! MCP (Model Context Protocol) server for jenkins-mcp.
//!
//! Exposes the Jenkins build lifecycle as MCP tools over stdio and accepts
//! Jenkins notification webhooks over HTTP. Both feed the same correlation
//! registry.

pub mod handlers;
pub mod protocol;
pub mod server;
pub mod tools;
pub mod transport;
pub mod webhook_http;

pub use handlers::ToolDispatcher;
pub use server::{spawn_housekeeping, McpServer};
pub use tools::{check_tool_table, ToolName};
pub use webhook_http::WebhookListener;
