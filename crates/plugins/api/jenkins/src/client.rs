//! Jenkins API client implementation.

use async_trait::async_trait;
use jenkins_mcp_core::{
    BuildOutcome, BuildPhase, BuildResult, CancelTarget, CiProvider, Credentials, Error,
    JobSummary, QueueHandle, Result, RetryPolicy, Settings, TriggerRequest,
};
use reqwest::header::{LOCATION, RETRY_AFTER};
use reqwest::{Method, StatusCode, Url};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::retry;
use crate::types::{JenkinsBuild, JenkinsCrumb, JenkinsJobList, JenkinsQueueItem};

/// Longest error body we keep in an error message.
const MAX_ERROR_BODY: usize = 200;

/// Cached crumb issuer state.
#[derive(Debug, Clone)]
enum CrumbState {
    Unknown,
    /// The issuer returned 404: CSRF protection is off.
    Disabled,
    Issued(JenkinsCrumb),
}

/// Why a single request attempt failed.
enum SendError {
    /// 403 complaining about the crumb; refresh once and retry.
    CrumbRejected(String),
    Failed(Error),
}

impl From<Error> for SendError {
    fn from(err: Error) -> Self {
        SendError::Failed(err)
    }
}

/// Jenkins API client.
pub struct JenkinsClient {
    base_url: Url,
    credentials: Option<Credentials>,
    retry: RetryPolicy,
    client: reqwest::Client,
    crumb: Mutex<CrumbState>,
}

impl JenkinsClient {
    /// Create a client from resolved settings.
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("jenkins-mcp/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        let base_url = Url::parse(&settings.base_url)
            .map_err(|e| Error::Config(format!("Invalid Jenkins URL: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "Invalid Jenkins URL: {}",
                settings.base_url
            )));
        }

        Ok(Self {
            base_url,
            credentials: settings.credentials.clone(),
            retry: settings.retry,
            client,
            crumb: Mutex::new(CrumbState::Unknown),
        })
    }

    /// Create a client for `base_url` with default settings.
    pub fn with_base_url(base_url: impl Into<String>, credentials: Option<Credentials>) -> Result<Self> {
        let mut settings = Settings::with_base_url(base_url);
        settings.credentials = credentials;
        Self::new(&settings)
    }

    /// Override the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Build an absolute URL from path segments below the Jenkins root.
    fn endpoint<I, S>(&self, segments: I) -> Result<Url>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Config(format!("Invalid Jenkins URL: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Build request with common headers.
    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        let request = self.client.request(method, url);
        match &self.credentials {
            Some(creds) => request.basic_auth(&creds.username, Some(&creds.api_token)),
            None => request,
        }
    }

    /// Issue one HTTP request, classifying any non-success response.
    async fn send_once(
        &self,
        method: Method,
        url: &Url,
        query: &[(String, String)],
        crumb: Option<&JenkinsCrumb>,
    ) -> std::result::Result<reqwest::Response, SendError> {
        debug!(method = %method, url = %url, "Jenkins request");

        let mut request = self.request(method, url.clone());
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(crumb) = crumb {
            request = request.header(crumb.crumb_request_field.as_str(), crumb.crumb.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = response.status();
        if status.is_success() || status.is_redirection() {
            return Ok(response);
        }

        let retry_after = retry::parse_retry_after(
            response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok()),
        );
        let body = response.text().await.unwrap_or_default();
        warn!(
            status = status.as_u16(),
            url = %url,
            "Jenkins API error response"
        );

        if status == StatusCode::FORBIDDEN && body.to_ascii_lowercase().contains("crumb") {
            return Err(SendError::CrumbRejected(summarize(&body)));
        }

        let mut err = Error::from_status(status.as_u16(), summarize(&body));
        if let Error::RateLimited {
            retry_after: slot, ..
        } = &mut err
        {
            *slot = retry_after;
        }
        Err(SendError::Failed(err))
    }

    /// Current crumb, fetching it on first use.
    async fn crumb(&self) -> Result<Option<JenkinsCrumb>> {
        let mut state = self.crumb.lock().await;
        match &*state {
            CrumbState::Issued(crumb) => return Ok(Some(crumb.clone())),
            CrumbState::Disabled => return Ok(None),
            CrumbState::Unknown => {}
        }

        let url = self.endpoint(["crumbIssuer", "api", "json"])?;
        let fetched = match self.send_once(Method::GET, &url, &[], None).await {
            Ok(response) => {
                let crumb: JenkinsCrumb = response.json().await.map_err(|e| {
                    Error::InvalidData(format!("Failed to parse crumb response: {}", e))
                })?;
                debug!(field = %crumb.crumb_request_field, "Crumb issued");
                CrumbState::Issued(crumb)
            }
            Err(SendError::Failed(Error::NotFound(_))) => {
                debug!("Crumb issuer not available, CSRF protection disabled");
                CrumbState::Disabled
            }
            Err(SendError::CrumbRejected(message)) => return Err(Error::Unauthorized(message)),
            Err(SendError::Failed(err)) => return Err(err),
        };

        *state = fetched;
        Ok(match &*state {
            CrumbState::Issued(crumb) => Some(crumb.clone()),
            _ => None,
        })
    }

    async fn invalidate_crumb(&self) {
        *self.crumb.lock().await = CrumbState::Unknown;
    }

    async fn attempt(
        &self,
        method: Method,
        url: &Url,
        query: &[(String, String)],
        needs_crumb: bool,
    ) -> std::result::Result<reqwest::Response, SendError> {
        let crumb = if needs_crumb { self.crumb().await? } else { None };
        self.send_once(method, url, query, crumb.as_ref()).await
    }

    /// Run a request with retry on transport errors and rate limiting.
    ///
    /// State-changing requests carry a crumb; a rejected crumb is refreshed
    /// exactly once before the rejection surfaces as `Unauthorized`.
    async fn execute(
        &self,
        method: Method,
        url: Url,
        query: &[(String, String)],
    ) -> Result<reqwest::Response> {
        let needs_crumb = method != Method::GET;
        let mut attempt: u32 = 0;
        let mut crumb_refreshed = false;

        loop {
            match self.attempt(method.clone(), &url, query, needs_crumb).await {
                Ok(response) => return Ok(response),
                Err(SendError::CrumbRejected(message)) => {
                    if crumb_refreshed {
                        return Err(Error::Unauthorized(format!(
                            "crumb rejected after refresh: {}",
                            message
                        )));
                    }
                    debug!(url = %url, "Crumb rejected, refreshing");
                    crumb_refreshed = true;
                    self.invalidate_crumb().await;
                }
                Err(SendError::Failed(err))
                    if err.is_retryable() && attempt + 1 < self.retry.max_attempts =>
                {
                    let delay = retry::delay_for(&self.retry, attempt, &err);
                    warn!(
                        url = %url,
                        attempt = attempt + 1,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying Jenkins request"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(SendError::Failed(err)) => return Err(err),
            }
        }
    }

    /// Make an authenticated GET request with typed deserialization.
    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
        query: &[(String, String)],
    ) -> Result<T> {
        let response = self.execute(Method::GET, url, query).await?;
        response
            .json()
            .await
            .map_err(|e| Error::InvalidData(format!("Failed to parse response: {}", e)))
    }

    fn job_endpoint(&self, job: &str, tail: &[&str]) -> Result<Url> {
        let mut segments = job_path(job)?;
        segments.extend(tail.iter().map(|s| s.to_string()));
        self.endpoint(segments)
    }
}

// =============================================================================
// Mapping functions: Jenkins types -> Unified types
// =============================================================================

fn map_queue_item(job: &str, item: &JenkinsQueueItem) -> Result<BuildResult> {
    if item.cancelled {
        return Err(Error::QueueCancelled {
            job: job.to_string(),
            queue_id: item.id,
        });
    }

    Ok(match &item.executable {
        Some(executable) => BuildResult {
            queue_id: Some(item.id),
            url: executable.url.clone(),
            ..BuildResult::running(job, executable.number)
        },
        None => BuildResult {
            detail: item.why.clone(),
            ..BuildResult::queued(job, item.id)
        },
    })
}

fn map_build(job: &str, build: &JenkinsBuild) -> BuildResult {
    // A build that is no longer running can still lack a result while it is
    // being finalized; keep reporting RUNNING until the result is recorded.
    let (phase, outcome) = match (&build.result, build.building) {
        (Some(result), false) => (BuildPhase::Complete, BuildOutcome::from_jenkins(result)),
        _ => (BuildPhase::Running, BuildOutcome::Unknown),
    };

    BuildResult {
        job: job.to_string(),
        build_number: Some(build.number),
        queue_id: build.queue_id,
        phase,
        outcome,
        duration_ms: phase.is_terminal().then_some(build.duration),
        console_tail: None,
        url: build.url.clone(),
        detail: None,
    }
}

// =============================================================================
// Helper functions
// =============================================================================

/// Turn `team/api` into `job/team/job/api`.
fn job_path(job: &str) -> Result<Vec<String>> {
    let parts: Vec<&str> = job.split('/').filter(|p| !p.is_empty()).collect();
    if parts.is_empty() {
        return Err(Error::InvalidArgument("job name must not be empty".into()));
    }
    Ok(parts
        .into_iter()
        .flat_map(|p| ["job".to_string(), p.to_string()])
        .collect())
}

/// Extract the queue id from a trigger's `Location` header
/// (`https://ci/queue/item/42/`).
fn parse_queue_location(location: &str) -> Option<u64> {
    let trimmed = location.trim_end_matches('/');
    let (prefix, id) = trimmed.rsplit_once('/')?;
    if !prefix.ends_with("queue/item") {
        return None;
    }
    id.parse().ok()
}

/// Last `lines` lines of `text`.
fn tail_lines(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

fn summarize(body: &str) -> String {
    let body = body.trim();
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

// =============================================================================
// Trait implementation
// =============================================================================

#[async_trait]
impl CiProvider for JenkinsClient {
    fn provider_name(&self) -> &'static str {
        "jenkins"
    }

    async fn trigger(&self, request: &TriggerRequest) -> Result<QueueHandle> {
        let endpoint = if request.params.is_empty() {
            "build"
        } else {
            "buildWithParameters"
        };
        let url = self.job_endpoint(&request.job, &[endpoint])?;
        let query: Vec<(String, String)> = request
            .params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let response = self.execute(Method::POST, url, &query).await?;

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                Error::InvalidData(format!(
                    "Jenkins accepted '{}' but returned no queue location",
                    request.job
                ))
            })?;
        let queue_id = parse_queue_location(location).ok_or_else(|| {
            Error::InvalidData(format!("Unexpected queue location: {}", location))
        })?;

        info!(job = %request.job, queue_id, "Build queued");
        Ok(QueueHandle::new(&request.job, queue_id))
    }

    async fn poll_queue(&self, handle: &QueueHandle) -> Result<BuildResult> {
        let id = handle.queue_id.to_string();
        let url = self.endpoint(["queue", "item", id.as_str(), "api", "json"])?;
        let item: JenkinsQueueItem = self.get(url, &[]).await?;
        map_queue_item(&handle.job, &item)
    }

    async fn poll_build(&self, job: &str, build_number: u64) -> Result<BuildResult> {
        let number = build_number.to_string();
        let url = self
            .job_endpoint(job, &[number.as_str(), "api", "json"])?;
        let build: JenkinsBuild = self.get(url, &[]).await?;
        Ok(map_build(job, &build))
    }

    async fn console_tail(&self, job: &str, build_number: u64, lines: usize) -> Result<String> {
        let number = build_number.to_string();
        let url = self
            .job_endpoint(job, &[number.as_str(), "consoleText"])?;
        let response = self.execute(Method::GET, url, &[]).await?;
        let text = response
            .text()
            .await
            .map_err(|e| Error::Http(format!("Failed to read console output: {}", e)))?;
        Ok(tail_lines(&text, lines))
    }

    async fn cancel(&self, job: &str, target: CancelTarget) -> Result<()> {
        match target {
            CancelTarget::Build(number) => {
                let number = number.to_string();
                let url = self.job_endpoint(job, &[number.as_str(), "stop"])?;
                self.execute(Method::POST, url, &[]).await?;
            }
            CancelTarget::Queue(id) => {
                let url = self.endpoint(["queue", "cancelItem"])?;
                self.execute(Method::POST, url, &[("id".to_string(), id.to_string())])
                    .await?;
            }
        }
        info!(job = %job, target = %target, "Cancellation requested");
        Ok(())
    }

    async fn list_jobs(&self) -> Result<Vec<JobSummary>> {
        let url = self.endpoint(["api", "json"])?;
        let list: JenkinsJobList = self
            .get(
                url,
                &[("tree".to_string(), "jobs[name,url,color]".to_string())],
            )
            .await?;
        Ok(list
            .jobs
            .into_iter()
            .map(|j| JobSummary {
                name: j.name,
                url: j.url,
                color: j.color,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JenkinsExecutable;

    #[test]
    fn test_job_path() {
        assert_eq!(job_path("build-api").unwrap(), vec!["job", "build-api"]);
        assert_eq!(
            job_path("team/build-api").unwrap(),
            vec!["job", "team", "job", "build-api"]
        );
        assert!(job_path("").is_err());
        assert!(job_path("//").is_err());
    }

    #[test]
    fn test_parse_queue_location() {
        assert_eq!(
            parse_queue_location("https://ci.example.com/queue/item/42/"),
            Some(42)
        );
        assert_eq!(
            parse_queue_location("http://localhost:8080/jenkins/queue/item/7"),
            Some(7)
        );
        assert_eq!(parse_queue_location("https://ci.example.com/job/x/"), None);
        assert_eq!(parse_queue_location("garbage"), None);
    }

    #[test]
    fn test_tail_lines() {
        let text = "one\ntwo\nthree\nfour\n";
        assert_eq!(tail_lines(text, 2), "three\nfour");
        assert_eq!(tail_lines(text, 10), "one\ntwo\nthree\nfour");
        assert_eq!(tail_lines(text, 0), "");
    }

    #[test]
    fn test_summarize_truncates_long_bodies() {
        let long = "x".repeat(500);
        let summary = summarize(&long);
        assert!(summary.len() <= MAX_ERROR_BODY + 3);
        assert!(summary.ends_with("..."));
        assert_eq!(summarize("  short  "), "short");
    }

    #[test]
    fn test_map_queue_item_states() {
        let waiting = JenkinsQueueItem {
            id: 42,
            cancelled: false,
            blocked: false,
            stuck: false,
            why: Some("Waiting for next available executor".into()),
            executable: None,
        };
        let result = map_queue_item("build-api", &waiting).unwrap();
        assert_eq!(result.phase, BuildPhase::Queued);
        assert_eq!(result.queue_id, Some(42));
        assert!(result.detail.unwrap().contains("executor"));

        let started = JenkinsQueueItem {
            executable: Some(JenkinsExecutable {
                number: 7,
                url: Some("https://ci/job/build-api/7/".into()),
            }),
            why: None,
            ..waiting.clone()
        };
        let result = map_queue_item("build-api", &started).unwrap();
        assert_eq!(result.phase, BuildPhase::Running);
        assert_eq!(result.build_number, Some(7));
        assert_eq!(result.queue_id, Some(42));

        let cancelled = JenkinsQueueItem {
            cancelled: true,
            ..waiting
        };
        let err = map_queue_item("build-api", &cancelled).unwrap_err();
        assert!(matches!(err, Error::QueueCancelled { queue_id: 42, .. }));
    }

    #[test]
    fn test_map_build_states() {
        let running = JenkinsBuild {
            number: 7,
            building: true,
            result: None,
            duration: 0,
            timestamp: Some(1_700_000_000_000),
            url: None,
            queue_id: Some(42),
        };
        let result = map_build("build-api", &running);
        assert_eq!(result.phase, BuildPhase::Running);
        assert_eq!(result.duration_ms, None);

        let finalizing = JenkinsBuild {
            building: false,
            ..running.clone()
        };
        assert_eq!(map_build("build-api", &finalizing).phase, BuildPhase::Running);

        let done = JenkinsBuild {
            building: false,
            result: Some("UNSTABLE".into()),
            duration: 5_000,
            ..running
        };
        let result = map_build("build-api", &done);
        assert_eq!(result.phase, BuildPhase::Complete);
        assert_eq!(result.outcome, BuildOutcome::Unstable);
        assert_eq!(result.duration_ms, Some(5_000));
    }

    // =========================================================================
    // Integration tests with httpmock
    // =========================================================================

    mod integration {
        use super::*;
        use httpmock::prelude::*;
        use std::time::Duration;

        /// base64("bot:token")
        const BASIC_AUTH: &str = "Basic Ym90OnRva2Vu";

        fn create_test_client(server: &MockServer) -> JenkinsClient {
            JenkinsClient::with_base_url(
                server.base_url(),
                Some(Credentials {
                    username: "bot".into(),
                    api_token: "token".into(),
                }),
            )
            .unwrap()
            .with_retry_policy(RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            })
        }

        fn mock_crumb(server: &MockServer) -> httpmock::Mock<'_> {
            server.mock(|when, then| {
                when.method(GET).path("/crumbIssuer/api/json");
                then.status(200).json_body(serde_json::json!({
                    "_class": "hudson.security.csrf.DefaultCrumbIssuer",
                    "crumb": "c1",
                    "crumbRequestField": "Jenkins-Crumb"
                }));
            })
        }

        #[tokio::test]
        async fn test_trigger_without_params() {
            let server = MockServer::start();
            let crumb = mock_crumb(&server);
            let location = format!("{}/queue/item/42/", server.base_url());
            let build = server.mock(|when, then| {
                when.method(POST)
                    .path("/job/build-api/build")
                    .header("Authorization", BASIC_AUTH)
                    .header("Jenkins-Crumb", "c1");
                then.status(201).header("Location", location.as_str());
            });

            let client = create_test_client(&server);
            let handle = client
                .trigger(&TriggerRequest::new("build-api"))
                .await
                .unwrap();

            assert_eq!(handle, QueueHandle::new("build-api", 42));
            assert_eq!(build.hits(), 1);
            assert_eq!(crumb.hits(), 1);
        }

        #[tokio::test]
        async fn test_trigger_with_params_in_folder() {
            let server = MockServer::start();
            mock_crumb(&server);
            let location = format!("{}/queue/item/43/", server.base_url());
            let build = server.mock(|when, then| {
                when.method(POST)
                    .path("/job/team/job/build-api/buildWithParameters")
                    .query_param("branch", "main");
                then.status(201).header("Location", location.as_str());
            });

            let client = create_test_client(&server);
            let handle = client
                .trigger(&TriggerRequest::new("team/build-api").with_param("branch", "main"))
                .await
                .unwrap();

            assert_eq!(handle.queue_id, 43);
            assert_eq!(handle.job, "team/build-api");
            assert_eq!(build.hits(), 1);
        }

        #[tokio::test]
        async fn test_crumb_is_fetched_once_and_cached() {
            let server = MockServer::start();
            let crumb = mock_crumb(&server);
            let location = format!("{}/queue/item/1/", server.base_url());
            server.mock(|when, then| {
                when.method(POST).path("/job/build-api/build");
                then.status(201).header("Location", location.as_str());
            });

            let client = create_test_client(&server);
            client.trigger(&TriggerRequest::new("build-api")).await.unwrap();
            client.trigger(&TriggerRequest::new("build-api")).await.unwrap();

            assert_eq!(crumb.hits(), 1);
        }

        #[tokio::test]
        async fn test_crumb_issuer_missing_means_no_crumb() {
            let server = MockServer::start();
            let issuer = server.mock(|when, then| {
                when.method(GET).path("/crumbIssuer/api/json");
                then.status(404);
            });
            let location = format!("{}/queue/item/5/", server.base_url());
            server.mock(|when, then| {
                when.method(POST).path("/job/build-api/build");
                then.status(201).header("Location", location.as_str());
            });

            let client = create_test_client(&server);
            client.trigger(&TriggerRequest::new("build-api")).await.unwrap();
            client.trigger(&TriggerRequest::new("build-api")).await.unwrap();

            assert_eq!(issuer.hits(), 1);
        }

        #[tokio::test]
        async fn test_rejected_crumb_is_refreshed_exactly_once() {
            let server = MockServer::start();
            let crumb = mock_crumb(&server);
            let build = server.mock(|when, then| {
                when.method(POST).path("/job/build-api/build");
                then.status(403)
                    .body("No valid crumb was included in the request");
            });

            let client = create_test_client(&server);
            let err = client
                .trigger(&TriggerRequest::new("build-api"))
                .await
                .unwrap_err();

            assert!(matches!(err, Error::Unauthorized(_)));
            assert_eq!(crumb.hits(), 2);
            assert_eq!(build.hits(), 2);
        }

        #[tokio::test]
        async fn test_trigger_without_location_is_invalid() {
            let server = MockServer::start();
            mock_crumb(&server);
            server.mock(|when, then| {
                when.method(POST).path("/job/build-api/build");
                then.status(201);
            });

            let client = create_test_client(&server);
            let err = client
                .trigger(&TriggerRequest::new("build-api"))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::InvalidData(_)));
        }

        #[tokio::test]
        async fn test_poll_queue_waiting_and_started() {
            let server = MockServer::start();
            server.mock(|when, then| {
                when.method(GET).path("/queue/item/42/api/json");
                then.status(200).json_body(serde_json::json!({
                    "id": 42,
                    "cancelled": false,
                    "why": "Waiting for next available executor",
                    "executable": null
                }));
            });
            server.mock(|when, then| {
                when.method(GET).path("/queue/item/43/api/json");
                then.status(200).json_body(serde_json::json!({
                    "id": 43,
                    "executable": {"number": 7, "url": "http://ci/job/build-api/7/"}
                }));
            });

            let client = create_test_client(&server);
            let queued = client
                .poll_queue(&QueueHandle::new("build-api", 42))
                .await
                .unwrap();
            assert_eq!(queued.phase, BuildPhase::Queued);

            let started = client
                .poll_queue(&QueueHandle::new("build-api", 43))
                .await
                .unwrap();
            assert_eq!(started.phase, BuildPhase::Running);
            assert_eq!(started.build_number, Some(7));
        }

        #[tokio::test]
        async fn test_poll_queue_cancelled() {
            let server = MockServer::start();
            server.mock(|when, then| {
                when.method(GET).path("/queue/item/42/api/json");
                then.status(200)
                    .json_body(serde_json::json!({"id": 42, "cancelled": true}));
            });

            let client = create_test_client(&server);
            let err = client
                .poll_queue(&QueueHandle::new("build-api", 42))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::QueueCancelled { queue_id: 42, .. }));
        }

        #[tokio::test]
        async fn test_poll_build_complete() {
            let server = MockServer::start();
            server.mock(|when, then| {
                when.method(GET)
                    .path("/job/build-api/7/api/json")
                    .header("Authorization", BASIC_AUTH);
                then.status(200).json_body(serde_json::json!({
                    "number": 7,
                    "building": false,
                    "result": "FAILURE",
                    "duration": 61000,
                    "queueId": 42,
                    "url": "http://ci/job/build-api/7/"
                }));
            });

            let client = create_test_client(&server);
            let result = client.poll_build("build-api", 7).await.unwrap();
            assert_eq!(result.phase, BuildPhase::Complete);
            assert_eq!(result.outcome, BuildOutcome::Failure);
            assert_eq!(result.duration_ms, Some(61000));
            assert_eq!(result.queue_id, Some(42));
        }

        #[tokio::test]
        async fn test_transport_errors_are_retried_up_to_limit() {
            let server = MockServer::start();
            let build = server.mock(|when, then| {
                when.method(GET).path("/job/build-api/7/api/json");
                then.status(503).body("Service Unavailable");
            });

            let client = create_test_client(&server);
            let err = client.poll_build("build-api", 7).await.unwrap_err();

            assert!(matches!(err, Error::Http(_)));
            assert_eq!(build.hits(), 3);
        }

        #[tokio::test]
        async fn test_rate_limit_is_retried() {
            let server = MockServer::start();
            let queue = server.mock(|when, then| {
                when.method(GET).path("/queue/item/9/api/json");
                then.status(429).header("Retry-After", "0");
            });

            let client = create_test_client(&server);
            let err = client
                .poll_queue(&QueueHandle::new("build-api", 9))
                .await
                .unwrap_err();

            assert!(matches!(err, Error::RateLimited { .. }));
            assert_eq!(queue.hits(), 3);
        }

        #[tokio::test]
        async fn test_not_found_is_not_retried() {
            let server = MockServer::start();
            let build = server.mock(|when, then| {
                when.method(GET).path("/job/missing/1/api/json");
                then.status(404).body("Not Found");
            });

            let client = create_test_client(&server);
            let err = client.poll_build("missing", 1).await.unwrap_err();

            assert!(matches!(err, Error::NotFound(_)));
            assert_eq!(build.hits(), 1);
        }

        #[tokio::test]
        async fn test_unauthorized_is_not_retried() {
            let server = MockServer::start();
            let jobs = server.mock(|when, then| {
                when.method(GET).path("/api/json");
                then.status(401).body("Unauthorized");
            });

            let client = create_test_client(&server);
            let err = client.list_jobs().await.unwrap_err();

            assert!(matches!(err, Error::Unauthorized(_)));
            assert_eq!(jobs.hits(), 1);
        }

        #[tokio::test]
        async fn test_cancel_build_and_queue_item() {
            let server = MockServer::start();
            mock_crumb(&server);
            let stop = server.mock(|when, then| {
                when.method(POST)
                    .path("/job/build-api/7/stop")
                    .header("Jenkins-Crumb", "c1");
                then.status(302).header("Location", "/job/build-api/7/");
            });
            let cancel_item = server.mock(|when, then| {
                when.method(POST)
                    .path("/queue/cancelItem")
                    .query_param("id", "42");
                then.status(204);
            });

            let client = create_test_client(&server);
            client
                .cancel("build-api", CancelTarget::Build(7))
                .await
                .unwrap();
            client
                .cancel("build-api", CancelTarget::Queue(42))
                .await
                .unwrap();

            assert_eq!(stop.hits(), 1);
            assert_eq!(cancel_item.hits(), 1);
        }

        #[tokio::test]
        async fn test_console_tail() {
            let server = MockServer::start();
            server.mock(|when, then| {
                when.method(GET).path("/job/build-api/7/consoleText");
                then.status(200)
                    .body("Started by user bot\nBuilding...\nTests passed\nFinished: SUCCESS\n");
            });

            let client = create_test_client(&server);
            let tail = client.console_tail("build-api", 7, 2).await.unwrap();
            assert_eq!(tail, "Tests passed\nFinished: SUCCESS");
        }

        #[tokio::test]
        async fn test_list_jobs() {
            let server = MockServer::start();
            server.mock(|when, then| {
                when.method(GET)
                    .path("/api/json")
                    .query_param("tree", "jobs[name,url,color]");
                then.status(200).json_body(serde_json::json!({
                    "jobs": [
                        {"name": "build-api", "url": "http://ci/job/build-api/", "color": "blue"},
                        {"name": "deploy", "color": "red_anime"}
                    ]
                }));
            });

            let client = create_test_client(&server);
            let jobs = client.list_jobs().await.unwrap();
            assert_eq!(jobs.len(), 2);
            assert_eq!(jobs[0].name, "build-api");
            assert_eq!(jobs[1].color.as_deref(), Some("red_anime"));
        }
    }
}
