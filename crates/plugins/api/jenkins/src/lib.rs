//! Jenkins provider implementation for jenkins-mcp.
//!
//! This crate talks to the Jenkins REST API: triggering jobs, following queue
//! items until they become builds, reading build state and console output,
//! and cancelling work. Transient failures are retried with jittered
//! exponential backoff; CSRF crumbs are fetched lazily and cached.

mod client;
mod retry;
mod types;

pub use client::JenkinsClient;

/// Header name Jenkins uses when crumb issuing is enabled but the issuer
/// does not say otherwise.
pub const DEFAULT_CRUMB_FIELD: &str = "Jenkins-Crumb";
