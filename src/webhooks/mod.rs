//! Webhook handling for GitHub events.
//!
//! - [`signature`]: HMAC-SHA256 verification of deliveries
//! - [`parser`]: `push` / `pull_request` payloads to [`WebhookEvent`]s

pub mod events;
pub mod parser;
pub mod signature;

pub use events::WebhookEvent;
pub use parser::{ParseError, parse_webhook};
pub use signature::{
    compute_signature, format_signature_header, parse_signature_header, verify_signature,
};
