//! HTTP server of the worker.
//!
//! # Endpoints
//!
//! - `POST /` and `POST /webhook` - GitHub webhook deliveries
//! - `GET /` - uptime and version (`HEAD /` for a bare liveness probe)

use std::sync::Arc;
use std::time::Instant;

pub mod health;
pub mod webhook;

pub use health::uptime_handler;
pub use webhook::{WebhookError, webhook_handler};

use crate::worker::JobSink;

/// Shared application state.
///
/// Passed to all handlers via Axum's `State` extractor.
pub struct AppState<Q> {
    inner: Arc<AppStateInner<Q>>,
}

impl<Q> Clone for AppState<Q> {
    fn clone(&self) -> Self {
        AppState {
            inner: self.inner.clone(),
        }
    }
}

struct AppStateInner<Q> {
    /// Where accepted jobs go.
    queue: Q,

    /// Webhook secret for HMAC-SHA256 signature verification.
    webhook_secret: Vec<u8>,

    started: Instant,
}

impl<Q: JobSink> AppState<Q> {
    pub fn new(queue: Q, webhook_secret: impl Into<Vec<u8>>) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                queue,
                webhook_secret: webhook_secret.into(),
                started: Instant::now(),
            }),
        }
    }

    pub fn queue(&self) -> &Q {
        &self.inner.queue
    }

    pub fn webhook_secret(&self) -> &[u8] {
        &self.inner.webhook_secret
    }

    pub fn started(&self) -> Instant {
        self.inner.started
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router<Q: JobSink>(app_state: AppState<Q>) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/", get(uptime_handler::<Q>).post(webhook_handler::<Q>))
        .route("/webhook", post(webhook_handler::<Q>))
        .with_state(app_state)
}
