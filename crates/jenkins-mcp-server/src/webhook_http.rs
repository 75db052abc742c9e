//! HTTP listener for Jenkins notification webhooks.
//!
//! Routes:
//! - `POST <path>` - verify, normalize and apply a notification
//! - `GET /health` - liveness check

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, ALLOW, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use jenkins_mcp_bridge::{IngestOutcome, WebhookIngestor};
use jenkins_mcp_core::{Error, Result, WebhookSettings};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Largest notification body accepted.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Serves the webhook endpoint for one ingestor.
pub struct WebhookListener {
    ingestor: Arc<WebhookIngestor>,
    path: String,
    signature_header: String,
}

impl WebhookListener {
    pub fn new(ingestor: Arc<WebhookIngestor>, settings: &WebhookSettings) -> Self {
        Self {
            ingestor,
            path: settings.path.clone(),
            signature_header: settings.signature_header.clone(),
        }
    }

    /// Bind the configured listen address.
    pub async fn bind(addr: &str) -> Result<TcpListener> {
        let socket_addr: SocketAddr = addr
            .parse()
            .map_err(|e| Error::Config(format!("Invalid webhook listen address '{}': {}", addr, e)))?;
        TcpListener::bind(socket_addr)
            .await
            .map_err(|e| Error::Config(format!("Failed to bind webhook listener to {}: {}", socket_addr, e)))
    }

    /// Accept connections until `shutdown` fires.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) {
        match listener.local_addr() {
            Ok(addr) => info!("Webhook listener on http://{}{}", addr, self.path),
            Err(e) => warn!("Webhook listener address unknown: {}", e),
        }

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    let (stream, remote_addr) = match accept_result {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!("Webhook accept error: {}", e);
                            continue;
                        }
                    };

                    let io = TokioIo::new(stream);
                    let listener = Arc::clone(&self);

                    tokio::spawn(async move {
                        let service = service_fn(move |req| {
                            let listener = Arc::clone(&listener);
                            async move { listener.handle_request(req).await }
                        });

                        if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                            if !e.is_incomplete_message() {
                                warn!("Webhook connection error from {}: {}", remote_addr, e);
                            }
                        }
                    });
                }

                _ = shutdown.recv() => {
                    info!("Webhook listener shutting down");
                    break;
                }
            }
        }
    }

    async fn handle_request(
        &self,
        req: Request<Incoming>,
    ) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        if method != Method::POST || path != self.path {
            return Ok(self.route(&method, &path, None, &[]));
        }

        let signature = req
            .headers()
            .get(self.signature_header.as_str())
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let body = match Limited::new(req.into_body(), MAX_BODY_BYTES).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                return Ok(json_response(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    json!({"code": "MALFORMED_PAYLOAD", "message": "body too large"}),
                ));
            }
            Err(e) => {
                debug!("Failed to read webhook body: {}", e);
                return Ok(json_response(
                    StatusCode::BAD_REQUEST,
                    json!({"code": "MALFORMED_PAYLOAD", "message": "unreadable body"}),
                ));
            }
        };

        Ok(self.route(&method, &path, signature.as_deref(), &body))
    }

    /// Map one request to a response.
    pub fn route(
        &self,
        method: &Method,
        path: &str,
        signature: Option<&str>,
        body: &[u8],
    ) -> Response<Full<Bytes>> {
        if path == "/health" && method == Method::GET {
            return json_response(StatusCode::OK, json!({"status": "ok"}));
        }
        if path != self.path {
            return json_response(
                StatusCode::NOT_FOUND,
                json!({"code": "NOT_FOUND", "message": format!("no route for {}", path)}),
            );
        }
        if method != Method::POST {
            let mut response = json_response(
                StatusCode::METHOD_NOT_ALLOWED,
                json!({"code": "METHOD_NOT_ALLOWED", "message": "use POST"}),
            );
            response
                .headers_mut()
                .insert(ALLOW, HeaderValue::from_static("POST"));
            return response;
        }

        match self.ingestor.ingest(body, signature) {
            Ok(outcome) => json_response(
                StatusCode::ACCEPTED,
                json!({"status": "accepted", "outcome": outcome_label(outcome)}),
            ),
            Err(err) => {
                let status = match &err {
                    Error::SignatureInvalid => StatusCode::UNAUTHORIZED,
                    Error::MalformedPayload(_) => StatusCode::BAD_REQUEST,
                    other => {
                        error!("Webhook ingestion failed: {}", other);
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                json_response(
                    status,
                    json!({"code": err.code(), "message": err.to_string()}),
                )
            }
        }
    }
}

fn outcome_label(outcome: IngestOutcome) -> &'static str {
    match outcome {
        IngestOutcome::Resolved => "resolved",
        IngestOutcome::Promoted => "promoted",
        IngestOutcome::Progress => "progress",
        IngestOutcome::Unmatched => "unmatched",
    }
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
