//! What a verified webhook delivery asks the worker to do.

use crate::worker::EnqueueRequest;

/// Outcome of parsing one webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    /// GitHub checking that the hook is reachable.
    Ping,

    /// A commit to verify.
    Enqueue(EnqueueRequest),

    /// A well-formed event the worker does not act on.
    Ignored(String),
}

impl WebhookEvent {
    pub fn ignored(reason: impl Into<String>) -> Self {
        WebhookEvent::Ignored(reason.into())
    }
}
