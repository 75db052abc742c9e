//! Inbound Jenkins notifications.
//!
//! Payloads follow the Notification plugin's JSON format:
//!
//! ```json
//! {"name": "build-api",
//!  "build": {"number": 7, "queue_id": 42, "phase": "COMPLETED",
//!            "status": "SUCCESS", "timestamp": 1700000000000,
//!            "duration": 61000, "full_url": "https://ci/job/build-api/7/"}}
//! ```

use std::sync::Arc;

use hmac::{Hmac, Mac};
use jenkins_mcp_core::{
    BuildOutcome, BuildPhase, Error, Result, WebhookAuth, WebhookEvent, WebhookSettings,
};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

use crate::registry::{CorrelationKey, CorrelationRegistry};

type HmacSha256 = Hmac<Sha256>;

/// Hex HMAC-SHA256 of `body`, the value Jenkins puts in the signature header.
pub fn sign_payload(secret: &[u8], body: &[u8]) -> Result<String> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret)
        .map_err(|e| Error::Config(format!("Invalid webhook secret: {}", e)))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

// =============================================================================
// Wire format
// =============================================================================

#[derive(Debug, Deserialize)]
struct NotificationPayload {
    name: Option<String>,
    build: Option<NotificationBuild>,
}

#[derive(Debug, Deserialize)]
struct NotificationBuild {
    number: Option<u64>,
    queue_id: Option<u64>,
    phase: Option<String>,
    status: Option<String>,
    timestamp: Option<i64>,
    duration: Option<u64>,
    full_url: Option<String>,
    url: Option<String>,
}

// =============================================================================
// Normalizer
// =============================================================================

/// Verifies and parses webhook bodies into [`WebhookEvent`]s.
pub struct WebhookNormalizer {
    auth: WebhookAuth,
    secret: Option<Vec<u8>>,
}

impl WebhookNormalizer {
    pub fn new(settings: &WebhookSettings) -> Self {
        Self::with_auth(settings.auth, settings.secret.as_deref())
    }

    pub fn with_auth(auth: WebhookAuth, secret: Option<&str>) -> Self {
        Self {
            auth,
            secret: secret.map(|s| s.as_bytes().to_vec()),
        }
    }

    /// Authenticate `raw` and parse it.
    ///
    /// The signature is checked before the body is parsed. Payloads missing
    /// any field needed for correlation are rejected as a whole.
    pub fn normalize(&self, raw: &[u8], signature: Option<&str>) -> Result<WebhookEvent> {
        self.verify(raw, signature)?;
        parse_event(raw)
    }

    fn verify(&self, raw: &[u8], signature: Option<&str>) -> Result<()> {
        if self.auth == WebhookAuth::Disabled {
            return Ok(());
        }
        let secret = self.secret.as_deref().ok_or(Error::SignatureInvalid)?;
        let provided = signature.map(str::trim).ok_or(Error::SignatureInvalid)?;

        match self.auth {
            WebhookAuth::HmacSha256 => {
                let digest = provided.strip_prefix("sha256=").unwrap_or(provided);
                let expected = hex::decode(digest).map_err(|_| Error::SignatureInvalid)?;
                let mut mac = <HmacSha256 as Mac>::new_from_slice(secret)
                    .map_err(|_| Error::SignatureInvalid)?;
                mac.update(raw);
                mac.verify_slice(&expected)
                    .map_err(|_| Error::SignatureInvalid)
            }
            WebhookAuth::SharedToken => {
                if bool::from(provided.as_bytes().ct_eq(secret)) {
                    Ok(())
                } else {
                    Err(Error::SignatureInvalid)
                }
            }
            WebhookAuth::Disabled => Ok(()),
        }
    }
}

fn parse_event(raw: &[u8]) -> Result<WebhookEvent> {
    let payload: NotificationPayload =
        serde_json::from_slice(raw).map_err(|e| Error::MalformedPayload(e.to_string()))?;

    let job = payload
        .name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| Error::MalformedPayload("missing job name".into()))?;
    let build = payload
        .build
        .ok_or_else(|| Error::MalformedPayload("missing build object".into()))?;
    let raw_phase = build
        .phase
        .as_deref()
        .ok_or_else(|| Error::MalformedPayload("missing build phase".into()))?;

    let phase = match raw_phase.to_ascii_uppercase().as_str() {
        "QUEUED" => BuildPhase::Queued,
        "STARTED" => BuildPhase::Running,
        "COMPLETED" | "FINALIZED" => BuildPhase::Complete,
        other => {
            return Err(Error::MalformedPayload(format!(
                "unknown build phase '{}'",
                other
            )))
        }
    };

    if build.number.is_none() && build.queue_id.is_none() {
        return Err(Error::MalformedPayload(
            "neither build number nor queue id present".into(),
        ));
    }

    let outcome = match (phase, build.status.as_deref()) {
        (BuildPhase::Complete, Some(status)) => BuildOutcome::from_jenkins(status),
        (BuildPhase::Complete, None) => {
            return Err(Error::MalformedPayload(
                "completed build without status".into(),
            ))
        }
        _ => BuildOutcome::Unknown,
    };

    Ok(WebhookEvent {
        job,
        build_number: build.number,
        queue_id: build.queue_id,
        phase,
        outcome,
        timestamp: build.timestamp,
        duration_ms: build.duration,
        url: build.full_url.or(build.url),
    })
}

// =============================================================================
// Ingestion
// =============================================================================

/// What a webhook did to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Fulfilled a waiting call
    Resolved,
    /// Moved a waiter from its queue id to the build number
    Promoted,
    /// Updated the observed phase of a waiter
    Progress,
    /// No waiter matched; terminal events are kept briefly as orphans
    Unmatched,
}

/// Normalizes webhook bodies and applies them to the registry.
pub struct WebhookIngestor {
    normalizer: WebhookNormalizer,
    registry: Arc<CorrelationRegistry>,
}

impl WebhookIngestor {
    pub fn new(normalizer: WebhookNormalizer, registry: Arc<CorrelationRegistry>) -> Self {
        Self {
            normalizer,
            registry,
        }
    }

    /// Authenticate, parse and apply one push.
    ///
    /// Rejected payloads never touch the registry.
    pub fn ingest(&self, raw: &[u8], signature: Option<&str>) -> Result<IngestOutcome> {
        let event = match self.normalizer.normalize(raw, signature) {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "Webhook rejected");
                return Err(err);
            }
        };
        let outcome = self.apply(&event);
        info!(
            job = %event.job,
            build = ?event.build_number,
            queue_id = ?event.queue_id,
            phase = %event.phase,
            outcome = ?outcome,
            "Webhook received"
        );
        Ok(outcome)
    }

    /// Route a normalized event to the waiter it belongs to.
    pub fn apply(&self, event: &WebhookEvent) -> IngestOutcome {
        let build_key = event
            .build_number
            .map(|n| CorrelationKey::build(&event.job, n));
        let queue_key = event
            .queue_id
            .map(|id| CorrelationKey::queue(&event.job, id));

        let promoted = match (&queue_key, &build_key) {
            (Some(queue), Some(build)) => {
                self.registry.contains(queue) && self.registry.rekey(queue, build.clone())
            }
            _ => false,
        };

        if event.phase.is_terminal() {
            // Prefer whichever key currently holds a waiter; otherwise the
            // build key, so a later rekey can claim the orphan.
            let target = [&build_key, &queue_key]
                .into_iter()
                .flatten()
                .find(|key| self.registry.contains(key))
                .or(build_key.as_ref())
                .or(queue_key.as_ref());
            if let Some(key) = target {
                if self.registry.resolve(key, event.to_build_result()) {
                    return IngestOutcome::Resolved;
                }
            }
            debug!(job = %event.job, "Terminal webhook matched no waiter");
            return if promoted {
                IngestOutcome::Promoted
            } else {
                IngestOutcome::Unmatched
            };
        }

        if promoted {
            if let Some(build) = &build_key {
                self.registry.observe(build, event.phase);
            }
            return IngestOutcome::Promoted;
        }

        let observed = [&build_key, &queue_key]
            .into_iter()
            .flatten()
            .any(|key| self.registry.observe(key, event.phase));
        if observed {
            IngestOutcome::Progress
        } else {
            IngestOutcome::Unmatched
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::Instant;

    const SECRET: &str = "s3cret";

    fn payload(phase: &str, number: Option<u64>, queue_id: Option<u64>, status: Option<&str>) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "name": "build-api",
            "build": {
                "number": number,
                "queue_id": queue_id,
                "phase": phase,
                "status": status,
                "timestamp": 1_700_000_000_000i64,
                "full_url": "https://ci.example.com/job/build-api/7/"
            }
        }))
        .unwrap()
    }

    fn normalizer() -> WebhookNormalizer {
        WebhookNormalizer::with_auth(WebhookAuth::HmacSha256, Some(SECRET))
    }

    fn ingestor() -> (WebhookIngestor, Arc<CorrelationRegistry>) {
        let registry = Arc::new(CorrelationRegistry::new());
        (
            WebhookIngestor::new(normalizer(), Arc::clone(&registry)),
            registry,
        )
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    #[test]
    fn test_valid_signature_with_and_without_prefix() {
        let body = payload("COMPLETED", Some(7), Some(42), Some("SUCCESS"));
        let sig = sign_payload(SECRET.as_bytes(), &body).unwrap();

        let event = normalizer().normalize(&body, Some(&sig)).unwrap();
        assert_eq!(event.job, "build-api");
        assert_eq!(event.build_number, Some(7));
        assert_eq!(event.phase, BuildPhase::Complete);
        assert_eq!(event.outcome, BuildOutcome::Success);
        assert_eq!(
            event.url.as_deref(),
            Some("https://ci.example.com/job/build-api/7/")
        );

        let prefixed = format!("sha256={}", sig);
        assert!(normalizer().normalize(&body, Some(&prefixed)).is_ok());
    }

    #[test]
    fn test_bad_signature_rejected_before_parsing() {
        let garbage = b"{not json at all";
        let err = normalizer()
            .normalize(garbage, Some("deadbeef"))
            .unwrap_err();
        assert!(matches!(err, Error::SignatureInvalid));

        let err = normalizer().normalize(garbage, None).unwrap_err();
        assert!(matches!(err, Error::SignatureInvalid));

        let err = normalizer().normalize(garbage, Some("not-hex")).unwrap_err();
        assert!(matches!(err, Error::SignatureInvalid));
    }

    #[test]
    fn test_shared_token_and_disabled_auth() {
        let body = payload("STARTED", Some(7), None, None);
        let token = WebhookNormalizer::with_auth(WebhookAuth::SharedToken, Some(SECRET));
        assert!(token.normalize(&body, Some(SECRET)).is_ok());
        assert!(matches!(
            token.normalize(&body, Some("guess")).unwrap_err(),
            Error::SignatureInvalid
        ));

        let open = WebhookNormalizer::with_auth(WebhookAuth::Disabled, None);
        assert!(open.normalize(&body, None).is_ok());
    }

    #[test]
    fn test_missing_secret_fails_closed() {
        let body = payload("STARTED", Some(7), None, None);
        let n = WebhookNormalizer::with_auth(WebhookAuth::HmacSha256, None);
        let sig = sign_payload(b"", &body).unwrap();
        assert!(matches!(
            n.normalize(&body, Some(&sig)).unwrap_err(),
            Error::SignatureInvalid
        ));
    }

    #[test]
    fn test_malformed_payloads() {
        let open = WebhookNormalizer::with_auth(WebhookAuth::Disabled, None);
        let cases: Vec<Vec<u8>> = vec![
            b"[]".to_vec(),
            br#"{"build": {"number": 1, "phase": "STARTED"}}"#.to_vec(),
            br#"{"name": "build-api"}"#.to_vec(),
            br#"{"name": "build-api", "build": {"number": 1}}"#.to_vec(),
            br#"{"name": "build-api", "build": {"phase": "STARTED"}}"#.to_vec(),
            br#"{"name": "build-api", "build": {"number": 1, "phase": "EXPLODED"}}"#.to_vec(),
            br#"{"name": "build-api", "build": {"number": 1, "phase": "COMPLETED"}}"#.to_vec(),
        ];
        for body in cases {
            let err = open.normalize(&body, None).unwrap_err();
            assert!(
                matches!(err, Error::MalformedPayload(_)),
                "{} -> {:?}",
                String::from_utf8_lossy(&body),
                err
            );
        }
    }

    #[tokio::test]
    async fn test_tampered_payload_leaves_waiter_pending() {
        let (ingestor, registry) = ingestor();
        let key = CorrelationKey::build("build-api", 7);
        let handle = registry.register(key.clone(), deadline()).unwrap();

        let body = payload("COMPLETED", Some(7), None, Some("SUCCESS"));
        let sig = sign_payload(SECRET.as_bytes(), &body).unwrap();
        let mut tampered = body.clone();
        let pos = tampered.len() - 2;
        tampered[pos] = b' ';

        let err = ingestor.ingest(&tampered, Some(&sig)).unwrap_err();
        assert!(matches!(err, Error::SignatureInvalid));
        assert!(registry.contains(&key));
        assert!(!handle.watcher().is_settled());
    }

    #[tokio::test]
    async fn test_completed_event_resolves_waiter() {
        let (ingestor, registry) = ingestor();
        let key = CorrelationKey::build("build-api", 7);
        let mut handle = registry.register(key, deadline()).unwrap();

        let body = payload("COMPLETED", Some(7), None, Some("UNSTABLE"));
        let sig = sign_payload(SECRET.as_bytes(), &body).unwrap();
        assert_eq!(
            ingestor.ingest(&body, Some(&sig)).unwrap(),
            IngestOutcome::Resolved
        );

        // Jenkins follows up with FINALIZED; it must not be applied twice.
        let finalized = payload("FINALIZED", Some(7), None, Some("UNSTABLE"));
        let sig = sign_payload(SECRET.as_bytes(), &finalized).unwrap();
        assert_eq!(
            ingestor.ingest(&finalized, Some(&sig)).unwrap(),
            IngestOutcome::Unmatched
        );

        let result = registry.wait(&mut handle).await.unwrap();
        assert_eq!(result.outcome, BuildOutcome::Unstable);
    }

    #[tokio::test]
    async fn test_started_event_promotes_queue_waiter() {
        let (ingestor, registry) = ingestor();
        let queue_key = CorrelationKey::queue("build-api", 42);
        let mut handle = registry.register(queue_key.clone(), deadline()).unwrap();

        let started = payload("STARTED", Some(7), Some(42), None);
        let sig = sign_payload(SECRET.as_bytes(), &started).unwrap();
        assert_eq!(
            ingestor.ingest(&started, Some(&sig)).unwrap(),
            IngestOutcome::Promoted
        );
        assert_eq!(handle.key(), CorrelationKey::build("build-api", 7));
        assert_eq!(
            registry
                .lookup(&CorrelationKey::build("build-api", 7))
                .unwrap()
                .phase,
            BuildPhase::Running
        );

        let done = payload("COMPLETED", Some(7), None, Some("SUCCESS"));
        let sig = sign_payload(SECRET.as_bytes(), &done).unwrap();
        assert_eq!(
            ingestor.ingest(&done, Some(&sig)).unwrap(),
            IngestOutcome::Resolved
        );
        assert!(registry.wait(&mut handle).await.is_ok());
    }

    #[tokio::test]
    async fn test_queue_only_completion_falls_back_to_queue_key() {
        let (ingestor, registry) = ingestor();
        let mut handle = registry
            .register(CorrelationKey::queue("build-api", 42), deadline())
            .unwrap();

        let done = payload("COMPLETED", None, Some(42), Some("ABORTED"));
        let sig = sign_payload(SECRET.as_bytes(), &done).unwrap();
        assert_eq!(
            ingestor.ingest(&done, Some(&sig)).unwrap(),
            IngestOutcome::Resolved
        );
        assert_eq!(
            registry.wait(&mut handle).await.unwrap().outcome,
            BuildOutcome::Aborted
        );
    }

    #[tokio::test]
    async fn test_queued_event_is_progress_or_unmatched() {
        let (ingestor, registry) = ingestor();
        let _handle = registry
            .register(CorrelationKey::queue("build-api", 42), deadline())
            .unwrap();

        let queued = payload("QUEUED", None, Some(42), None);
        let sig = sign_payload(SECRET.as_bytes(), &queued).unwrap();
        assert_eq!(
            ingestor.ingest(&queued, Some(&sig)).unwrap(),
            IngestOutcome::Progress
        );

        let other = payload("QUEUED", None, Some(99), None);
        let sig = sign_payload(SECRET.as_bytes(), &other).unwrap();
        assert_eq!(
            ingestor.ingest(&other, Some(&sig)).unwrap(),
            IngestOutcome::Unmatched
        );
    }
}
