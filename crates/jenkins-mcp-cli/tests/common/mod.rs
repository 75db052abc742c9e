//! Shared wiring for end-to-end tests: a real Jenkins client pointed at an
//! httpmock server, with the orchestrator, dispatcher and webhook ingestor
//! assembled the way `jenkins-mcp serve` assembles them.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use httpmock::prelude::*;
use jenkins_mcp_bridge::{
    sign_payload, BuildOrchestrator, CorrelationKey, CorrelationRegistry, WebhookIngestor,
    WebhookNormalizer,
};
use jenkins_mcp_core::{RetryPolicy, Settings, WebhookAuth};
use jenkins_mcp_jenkins::JenkinsClient;
use jenkins_mcp_server::ToolDispatcher;
use serde_json::{json, Value};

pub const WEBHOOK_SECRET: &str = "e2e-secret";
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct Harness {
    pub registry: Arc<CorrelationRegistry>,
    pub dispatcher: Arc<ToolDispatcher>,
    pub ingestor: WebhookIngestor,
}

pub fn settings(server: &MockServer) -> Settings {
    let mut settings = Settings::with_base_url(server.base_url());
    settings.poll_interval = POLL_INTERVAL;
    settings.max_wait = Duration::from_secs(10);
    settings.console_tail_lines = 5;
    settings.retry = RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    };
    settings.webhook.enabled = true;
    settings.webhook.auth = WebhookAuth::HmacSha256;
    settings.webhook.secret = Some(WEBHOOK_SECRET.to_string());
    settings
}

pub fn harness(server: &MockServer) -> Harness {
    let settings = settings(server);
    let client = JenkinsClient::new(&settings).unwrap();
    let registry = Arc::new(CorrelationRegistry::new());
    let orchestrator = Arc::new(BuildOrchestrator::new(
        Arc::new(client),
        Arc::clone(&registry),
        &settings,
    ));
    let dispatcher = Arc::new(ToolDispatcher::new(orchestrator, &settings));
    let ingestor = WebhookIngestor::new(
        WebhookNormalizer::new(&settings.webhook),
        Arc::clone(&registry),
    );

    Harness {
        registry,
        dispatcher,
        ingestor,
    }
}

/// CSRF protection off: the crumb issuer does not exist.
pub async fn mock_no_crumb(server: &MockServer) {
    server
        .mock_async(|when, then| {
            when.method(GET).path("/crumbIssuer/api/json");
            then.status(404);
        })
        .await;
}

pub async fn mock_trigger<'a>(server: &'a MockServer, job: &str, queue_id: u64) -> httpmock::Mock<'a> {
    let location = format!("{}/queue/item/{}/", server.base_url(), queue_id);
    let path = format!("/job/{}/buildWithParameters", job);
    server
        .mock_async(|when, then| {
            when.method(POST).path(path.as_str());
            then.status(201).header("Location", location.as_str());
        })
        .await
}

pub async fn mock_queue_item<'a>(
    server: &'a MockServer,
    queue_id: u64,
    body: Value,
) -> httpmock::Mock<'a> {
    let path = format!("/queue/item/{}/api/json", queue_id);
    server
        .mock_async(|when, then| {
            when.method(GET).path(path.as_str());
            then.status(200).json_body(body);
        })
        .await
}

pub async fn mock_build<'a>(
    server: &'a MockServer,
    job: &str,
    number: u64,
    body: Value,
) -> httpmock::Mock<'a> {
    let path = format!("/job/{}/{}/api/json", job, number);
    server
        .mock_async(|when, then| {
            when.method(GET).path(path.as_str());
            then.status(200).json_body(body);
        })
        .await
}

pub async fn mock_console<'a>(
    server: &'a MockServer,
    job: &str,
    number: u64,
    text: &str,
) -> httpmock::Mock<'a> {
    let path = format!("/job/{}/{}/consoleText", job, number);
    server
        .mock_async(|when, then| {
            when.method(GET).path(path.as_str());
            then.status(200).body(text);
        })
        .await
}

/// Notification plugin payload for a finished build, with its signature.
pub fn signed_completion(job: &str, number: u64, queue_id: u64, status: &str) -> (Vec<u8>, String) {
    let body = serde_json::to_vec(&json!({
        "name": job,
        "build": {
            "number": number,
            "queue_id": queue_id,
            "phase": "COMPLETED",
            "status": status,
            "duration": 61000
        }
    }))
    .unwrap();
    let signature = format!(
        "sha256={}",
        sign_payload(WEBHOOK_SECRET.as_bytes(), &body).unwrap()
    );
    (body, signature)
}

/// Wait until a waiter sits under `key`, failing the test after 5s.
pub async fn wait_for_waiter(registry: &CorrelationRegistry, key: &CorrelationKey) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !registry.contains(key) {
        assert!(
            tokio::time::Instant::now() < deadline,
            "no waiter registered under {:?}",
            key
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until `mock` has been hit at least `count` times.
pub async fn wait_for_hits(mock: &httpmock::Mock<'_>, count: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while mock.hits_async().await < count {
        assert!(
            tokio::time::Instant::now() < deadline,
            "mock was not hit {} times",
            count
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
