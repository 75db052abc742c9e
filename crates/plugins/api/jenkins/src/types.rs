//! Jenkins API response types.
//!
//! These types represent the raw JSON returned by the Jenkins remote access
//! API (`.../api/json`). They are deserialized and then mapped to the unified
//! types in `jenkins-mcp-core`.

use serde::{Deserialize, Serialize};

// =============================================================================
// Crumb
// =============================================================================

/// `GET /crumbIssuer/api/json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JenkinsCrumb {
    pub crumb: String,
    pub crumb_request_field: String,
}

// =============================================================================
// Queue
// =============================================================================

/// `GET /queue/item/<id>/api/json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JenkinsQueueItem {
    pub id: u64,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub blocked: bool,
    #[serde(default)]
    pub stuck: bool,
    #[serde(default)]
    pub why: Option<String>,
    #[serde(default)]
    pub executable: Option<JenkinsExecutable>,
}

/// Build a queue item turned into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JenkinsExecutable {
    pub number: u64,
    #[serde(default)]
    pub url: Option<String>,
}

// =============================================================================
// Build
// =============================================================================

/// `GET /job/<name>/<number>/api/json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JenkinsBuild {
    pub number: u64,
    #[serde(default)]
    pub building: bool,
    #[serde(default)]
    pub result: Option<String>,
    /// Milliseconds; 0 while the build is running.
    #[serde(default)]
    pub duration: u64,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub queue_id: Option<u64>,
}

// =============================================================================
// Jobs
// =============================================================================

/// `GET /api/json?tree=jobs[name,url,color]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JenkinsJobList {
    #[serde(default)]
    pub jobs: Vec<JenkinsJob>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JenkinsJob {
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}
