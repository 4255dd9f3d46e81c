//! Webhook endpoint handler.
//!
//! Verifies the delivery's signature, parses it and hands any job to the
//! queue. The queue publishes the pending status before this returns, so
//! GitHub shows a failed delivery when a job could not be tracked.

use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::AppState;
use crate::webhooks::{ParseError, WebhookEvent, parse_webhook, verify_signature};
use crate::worker::{EnqueueError, JobSink};

/// Header name for GitHub event type.
const HEADER_EVENT: &str = "x-github-event";
/// Header name for GitHub signature.
const HEADER_SIGNATURE: &str = "x-hub-signature-256";

/// Errors that can occur when processing a webhook.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("invalid altPath {0:?}")]
    InvalidAltPath(String),

    #[error("invalid payload: {0}")]
    Payload(#[from] ParseError),

    #[error("job not queued: {0}")]
    Enqueue(#[from] EnqueueError),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::InvalidSignature => StatusCode::UNAUTHORIZED,
            WebhookError::MissingHeader(_)
            | WebhookError::InvalidQuery(_)
            | WebhookError::InvalidAltPath(_)
            | WebhookError::Payload(_) => StatusCode::BAD_REQUEST,
            WebhookError::Enqueue(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Query arguments a hook URL may carry.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct HookQuery {
    /// Checkout path relative to the cache root, e.g. `example.org/x/cat`,
    /// for repositories imported under another name.
    #[serde(default)]
    pub alt_path: Option<String>,
}

/// Webhook handler.
///
/// # Response
///
/// - 200 OK: job queued, ping acknowledged, or event ignored
/// - 400 Bad Request: missing event header, bad query, malformed payload
/// - 401 Unauthorized: missing or invalid signature
/// - 500 Internal Server Error: the job could not be queued
pub async fn webhook_handler<Q: JobSink>(
    State(app_state): State<AppState<Q>>,
    query: Result<Query<HookQuery>, QueryRejection>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, &'static str), WebhookError> {
    // Signature first: nothing about an unauthenticated request is looked at.
    let signature = get_header(&headers, HEADER_SIGNATURE).unwrap_or_default();
    if !verify_signature(&body, &signature, app_state.webhook_secret()) {
        warn!("invalid webhook signature");
        return Err(WebhookError::InvalidSignature);
    }

    let Query(query) = query.map_err(|e| WebhookError::InvalidQuery(e.body_text()))?;
    let alt_path = validate_alt_path(query.alt_path.as_deref().unwrap_or_default())?;
    let event_type = get_header(&headers, HEADER_EVENT)?;
    debug!(event_type = %event_type, alt_path = ?alt_path, "received webhook");

    match parse_webhook(&event_type, &body)? {
        WebhookEvent::Ping => {
            info!("ping");
        }
        WebhookEvent::Ignored(reason) => {
            debug!(event_type = %event_type, "ignoring {reason}");
        }
        WebhookEvent::Enqueue(request) => {
            let request = request.with_alt_path(alt_path);
            info!(
                repo = %request.repo,
                commit = %request.commit,
                pull = ?request.pull,
                event_type = %event_type,
                "webhook triggers job"
            );
            if let Err(err) = app_state.queue().submit(request).await {
                warn!(error = %err, "failed to queue job");
                return Err(err.into());
            }
        }
    }
    Ok((StatusCode::OK, "{}"))
}

/// Extracts a required header value as a string.
fn get_header(headers: &HeaderMap, name: &'static str) -> Result<String, WebhookError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .ok_or(WebhookError::MissingHeader(name))
}

/// Accepts `host.tld/path...` and nothing that could leave the cache root.
fn validate_alt_path(raw: &str) -> Result<Option<String>, WebhookError> {
    if raw.is_empty() {
        return Ok(None);
    }
    let invalid = || WebhookError::InvalidAltPath(raw.to_string());
    if raw.contains("//") || raw.contains("..") || raw.contains('\\') || raw.ends_with('/') {
        return Err(invalid());
    }
    match raw.split_once('/') {
        Some((host, path)) if host.contains('.') && !path.is_empty() => Ok(Some(raw.to_string())),
        _ => Err(invalid()),
    }
}
