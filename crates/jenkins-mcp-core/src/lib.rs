//! Core traits, types, configuration and error handling for jenkins-mcp.
//!
//! This crate provides the foundational abstractions shared by the Jenkins
//! client, the correlation bridge and the MCP server.

pub mod config;
pub mod error;
pub mod provider;
pub mod types;

pub use config::{Config, Credentials, RetryPolicy, Settings, WebhookAuth, WebhookSettings};
pub use error::{Error, Result};
pub use provider::CiProvider;
pub use types::{
    BuildOutcome, BuildPhase, BuildResult, CancelTarget, JobSummary, PendingWait, QueueHandle,
    TriggerRequest, WebhookEvent,
};
