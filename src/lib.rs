//! CI worker - a self-hosted continuous-integration worker for GitHub.
//!
//! Receives push and pull request webhooks, runs each repository's checks one
//! job at a time in a cached workspace, and reports progress as a commit
//! status linking to a secret gist with every step's output.

pub mod config;
pub mod github;
pub mod pipeline;
pub mod report;
pub mod runner;
pub mod server;
pub mod types;
pub mod watch;
pub mod webhooks;
pub mod worker;
pub mod workspace;

#[cfg(test)]
pub(crate) mod test_utils;
