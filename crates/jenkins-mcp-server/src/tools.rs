//! MCP tool definitions.
//!
//! The tool set is closed: every name a client can call is a [`ToolName`]
//! variant, and [`check_tool_table`] verifies at startup that each variant has
//! a usable definition.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use jenkins_mcp_core::{Error, Result};
use serde_json::{json, Value};

use crate::protocol::ToolDefinition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    TriggerBuild,
    GetBuildStatus,
    GetQueueStatus,
    CancelBuild,
    WaitForBuild,
    GetBuildLog,
    ListJobs,
    ListPendingBuilds,
}

impl ToolName {
    pub const ALL: [ToolName; 8] = [
        ToolName::TriggerBuild,
        ToolName::GetBuildStatus,
        ToolName::GetQueueStatus,
        ToolName::CancelBuild,
        ToolName::WaitForBuild,
        ToolName::GetBuildLog,
        ToolName::ListJobs,
        ToolName::ListPendingBuilds,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ToolName::TriggerBuild => "trigger_build",
            ToolName::GetBuildStatus => "get_build_status",
            ToolName::GetQueueStatus => "get_queue_status",
            ToolName::CancelBuild => "cancel_build",
            ToolName::WaitForBuild => "wait_for_build",
            ToolName::GetBuildLog => "get_build_log",
            ToolName::ListJobs => "list_jobs",
            ToolName::ListPendingBuilds => "list_pending_builds",
        }
    }

    /// Whether a call holds one of the dispatcher's orchestration permits.
    pub fn needs_permit(self) -> bool {
        matches!(self, ToolName::TriggerBuild | ToolName::WaitForBuild)
    }

    pub fn definition(self) -> ToolDefinition {
        let (description, input_schema) = match self {
            ToolName::TriggerBuild => (
                "Trigger a Jenkins job. By default waits until the build finishes and \
                 returns its result; pass wait=false to return the queue item immediately.",
                json!({
                    "type": "object",
                    "properties": {
                        "job": job_schema(),
                        "params": {
                            "type": "object",
                            "additionalProperties": {
                                "type": ["string", "number", "boolean"]
                            },
                            "description": "Build parameters, e.g. {\"branch\": \"main\"}"
                        },
                        "wait": {
                            "type": "boolean",
                            "description": "Wait for the build to finish (default: true)"
                        },
                        "idempotency_key": {
                            "type": "string",
                            "description": "Reusing a key while its build is in flight returns that build instead of queueing another"
                        },
                        "format": format_schema()
                    },
                    "required": ["job"]
                }),
            ),
            ToolName::GetBuildStatus => (
                "Get the current state of a build.",
                json!({
                    "type": "object",
                    "properties": {
                        "job": job_schema(),
                        "build_number": build_number_schema(),
                        "include_console": {
                            "type": "boolean",
                            "description": "Attach the tail of the console log (default: false)"
                        },
                        "format": format_schema()
                    },
                    "required": ["job", "build_number"]
                }),
            ),
            ToolName::GetQueueStatus => (
                "Check a queue item: still waiting, or the build number it became.",
                json!({
                    "type": "object",
                    "properties": {
                        "job": job_schema(),
                        "queue_id": queue_id_schema(),
                        "format": format_schema()
                    },
                    "required": ["job", "queue_id"]
                }),
            ),
            ToolName::CancelBuild => (
                "Stop a running build, or drop a queue item before it starts. \
                 Pass exactly one of build_number or queue_id.",
                json!({
                    "type": "object",
                    "properties": {
                        "job": job_schema(),
                        "build_number": build_number_schema(),
                        "queue_id": queue_id_schema()
                    },
                    "required": ["job"]
                }),
            ),
            ToolName::WaitForBuild => (
                "Wait for a queue item returned by trigger_build(wait=false) to finish.",
                json!({
                    "type": "object",
                    "properties": {
                        "job": job_schema(),
                        "queue_id": queue_id_schema(),
                        "timeout_ms": {
                            "type": "integer",
                            "minimum": 1,
                            "description": "Give up after this many milliseconds (capped by the server's max wait)"
                        },
                        "format": format_schema()
                    },
                    "required": ["job", "queue_id"]
                }),
            ),
            ToolName::GetBuildLog => (
                "Get the last lines of a build's console output.",
                json!({
                    "type": "object",
                    "properties": {
                        "job": job_schema(),
                        "build_number": build_number_schema(),
                        "lines": {
                            "type": "integer",
                            "minimum": 1,
                            "description": "Number of lines from the end (default: 200)"
                        },
                        "format": format_schema()
                    },
                    "required": ["job", "build_number"]
                }),
            ),
            ToolName::ListJobs => (
                "List Jenkins jobs with their last build status.",
                json!({
                    "type": "object",
                    "properties": {
                        "format": format_schema()
                    }
                }),
            ),
            ToolName::ListPendingBuilds => (
                "List builds this server is currently waiting on.",
                json!({
                    "type": "object",
                    "properties": {
                        "format": format_schema()
                    }
                }),
            ),
        };

        ToolDefinition {
            name: self.as_str().to_string(),
            description: description.to_string(),
            input_schema,
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ToolName::ALL
            .into_iter()
            .find(|tool| tool.as_str() == s)
            .ok_or_else(|| Error::InvalidArgument(format!("Unknown tool: {}", s)))
    }
}

/// Definitions for every tool, in a stable order.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    ToolName::ALL.into_iter().map(ToolName::definition).collect()
}

/// Validate the tool table.
///
/// Every variant must round-trip through its name, names must be unique, and
/// each definition must describe an object schema.
pub fn check_tool_table() -> Result<()> {
    let mut seen = HashSet::new();
    for tool in ToolName::ALL {
        let name = tool.as_str();
        if !seen.insert(name) {
            return Err(Error::Config(format!("duplicate tool name '{}'", name)));
        }
        if name.parse::<ToolName>()? != tool {
            return Err(Error::Config(format!("tool name '{}' does not round-trip", name)));
        }
        let definition = tool.definition();
        if definition.name != name || definition.description.is_empty() {
            return Err(Error::Config(format!("tool '{}' has an incomplete definition", name)));
        }
        if definition.input_schema.get("type").and_then(Value::as_str) != Some("object") {
            return Err(Error::Config(format!(
                "tool '{}' input schema is not an object",
                name
            )));
        }
    }
    Ok(())
}

fn job_schema() -> Value {
    json!({
        "type": "string",
        "description": "Job name; folders are separated by '/', e.g. team/build-api"
    })
}

fn build_number_schema() -> Value {
    json!({ "type": "integer", "minimum": 1, "description": "Build number" })
}

fn queue_id_schema() -> Value {
    json!({ "type": "integer", "minimum": 1, "description": "Queue item id returned by trigger_build" })
}

fn format_schema() -> Value {
    json!({
        "type": "string",
        "enum": ["markdown", "compact", "json"],
        "description": "Output format (default: markdown)"
    })
}
