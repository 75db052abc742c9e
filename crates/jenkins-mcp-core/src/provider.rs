//! Provider trait for CI servers.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{BuildResult, CancelTarget, JobSummary, QueueHandle, TriggerRequest};

/// Operations the bridge needs from a CI server.
///
/// Implementations handle their own retry policy; callers only ever see
/// errors that survived it.
#[async_trait]
pub trait CiProvider: Send + Sync {
    /// Get the provider name (e.g., "jenkins")
    fn provider_name(&self) -> &'static str;

    /// Enqueue a build. Returns as soon as the server has accepted it.
    async fn trigger(&self, request: &TriggerRequest) -> Result<QueueHandle>;

    /// Check a queue item. Yields QUEUED, or RUNNING with a build number once
    /// an executor picked it up. Fails with `QueueCancelled` if it was dropped.
    async fn poll_queue(&self, handle: &QueueHandle) -> Result<BuildResult>;

    /// Fetch the current state of a build.
    async fn poll_build(&self, job: &str, build_number: u64) -> Result<BuildResult>;

    /// Last `lines` lines of a build's console output.
    async fn console_tail(&self, job: &str, build_number: u64, lines: usize) -> Result<String>;

    /// Stop a running build or drop a queue item.
    async fn cancel(&self, job: &str, target: CancelTarget) -> Result<()>;

    /// Top-level jobs.
    async fn list_jobs(&self) -> Result<Vec<JobSummary>>;
}
