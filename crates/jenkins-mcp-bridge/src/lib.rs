//! The bridge between tool calls, the Jenkins build lifecycle and webhook
//! pushes.
//!
//! - [`CorrelationRegistry`] is the rendezvous where pollers and webhooks
//!   race to fulfil a waiting call.
//! - [`BuildOrchestrator`] drives trigger → queue → build for one call.
//! - [`WebhookNormalizer`] and [`WebhookIngestor`] turn raw pushes into
//!   registry updates.

pub mod orchestrator;
pub mod registry;
pub mod webhook;

pub use orchestrator::{BuildOrchestrator, Submission};
pub use registry::{CorrelationKey, CorrelationRegistry, WaitKey, WaiterHandle, WaiterRef};
pub use webhook::{sign_payload, IngestOutcome, WebhookIngestor, WebhookNormalizer};
