//! GitHub side of reporting: commit statuses, gists and issues.

mod client;
mod error;

pub use client::GitHubReporter;
pub use error::{GitHubApiError, GitHubErrorKind};
