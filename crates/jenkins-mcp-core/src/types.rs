//! Domain types shared by the client, the correlation bridge and the tool surface.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// Build lifecycle
// =============================================================================

/// Where a build is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildPhase {
    Queued,
    Running,
    Complete,
}

impl BuildPhase {
    /// Only COMPLETE is terminal; nothing resolves a waiter before it.
    pub fn is_terminal(self) -> bool {
        matches!(self, BuildPhase::Complete)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BuildPhase::Queued => "QUEUED",
            BuildPhase::Running => "RUNNING",
            BuildPhase::Complete => "COMPLETE",
        }
    }
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result reported by Jenkins for a finished build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildOutcome {
    Success,
    Failure,
    Unstable,
    Aborted,
    Unknown,
}

impl BuildOutcome {
    /// Parse a Jenkins result string. Anything unrecognised (e.g. `NOT_BUILT`) is `Unknown`.
    pub fn from_jenkins(result: &str) -> Self {
        match result.to_ascii_uppercase().as_str() {
            "SUCCESS" => BuildOutcome::Success,
            "FAILURE" => BuildOutcome::Failure,
            "UNSTABLE" => BuildOutcome::Unstable,
            "ABORTED" => BuildOutcome::Aborted,
            _ => BuildOutcome::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BuildOutcome::Success => "SUCCESS",
            BuildOutcome::Failure => "FAILURE",
            BuildOutcome::Unstable => "UNSTABLE",
            BuildOutcome::Aborted => "ABORTED",
            BuildOutcome::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for BuildOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a build (or of a queue item that has not become a build yet).
///
/// Once `phase` is COMPLETE the value is never changed again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildResult {
    pub job: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_id: Option<u64>,
    pub phase: BuildPhase,
    pub outcome: BuildOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console_tail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Free-form detail, e.g. why a queue item is still waiting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl BuildResult {
    /// A queue item that has no executor yet.
    pub fn queued(job: impl Into<String>, queue_id: u64) -> Self {
        Self {
            job: job.into(),
            build_number: None,
            queue_id: Some(queue_id),
            phase: BuildPhase::Queued,
            outcome: BuildOutcome::Unknown,
            duration_ms: None,
            console_tail: None,
            url: None,
            detail: None,
        }
    }

    /// A build that has started but not finished.
    pub fn running(job: impl Into<String>, build_number: u64) -> Self {
        Self {
            build_number: Some(build_number),
            queue_id: None,
            phase: BuildPhase::Running,
            ..Self::queued(job, 0)
        }
    }

    /// A finished build.
    pub fn complete(job: impl Into<String>, build_number: u64, outcome: BuildOutcome) -> Self {
        Self {
            phase: BuildPhase::Complete,
            outcome,
            ..Self::running(job, build_number)
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }
}

// =============================================================================
// Trigger / queue
// =============================================================================

/// A request to start a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerRequest {
    pub job: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl TriggerRequest {
    pub fn new(job: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            ..Default::default()
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Queue item returned by a trigger, before Jenkins assigns a build number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueHandle {
    pub job: String,
    pub queue_id: u64,
}

impl QueueHandle {
    pub fn new(job: impl Into<String>, queue_id: u64) -> Self {
        Self {
            job: job.into(),
            queue_id,
        }
    }
}

/// What to cancel: a running build or a waiting queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelTarget {
    Build(u64),
    Queue(u64),
}

impl fmt::Display for CancelTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelTarget::Build(n) => write!(f, "build #{}", n),
            CancelTarget::Queue(id) => write!(f, "queue item {}", id),
        }
    }
}

// =============================================================================
// Webhooks
// =============================================================================

/// Canonical form of an inbound Jenkins notification.
///
/// At least one of `build_number` / `queue_id` is always present, and a
/// COMPLETE event always carries a real outcome from the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub job: String,
    pub build_number: Option<u64>,
    pub queue_id: Option<u64>,
    pub phase: BuildPhase,
    pub outcome: BuildOutcome,
    pub timestamp: Option<i64>,
    pub duration_ms: Option<u64>,
    pub url: Option<String>,
}

impl WebhookEvent {
    /// The build snapshot this event describes.
    pub fn to_build_result(&self) -> BuildResult {
        BuildResult {
            job: self.job.clone(),
            build_number: self.build_number,
            queue_id: self.queue_id,
            phase: self.phase,
            outcome: self.outcome,
            duration_ms: self.duration_ms,
            console_tail: None,
            url: self.url.clone(),
            detail: None,
        }
    }
}

// =============================================================================
// Inspection
// =============================================================================

/// Job listed on the Jenkins front page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Jenkins ball colour, e.g. `blue`, `red_anime`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// An in-flight correlation as seen from outside the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingWait {
    pub job: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_number: Option<u64>,
    pub phase: BuildPhase,
    pub age_ms: u64,
    pub remaining_ms: u64,
}
