//! GitHub webhook payload parser.
//!
//! Parses raw webhook JSON payloads into [`WebhookEvent`] values.
//!
//! # Parsing Strategy
//!
//! 1. The event type is determined from the `X-GitHub-Event` header
//! 2. The payload is parsed according to the event type
//! 3. Unknown event types are ignored, not an error
//! 4. Malformed payloads return `Err` with details
//!
//! Only `push` and `pull_request` trigger jobs. Fields the worker does not use
//! are not deserialized, so payload additions never break parsing.

use serde::Deserialize;
use thiserror::Error;

use crate::types::{PrNumber, RepoId, Sha};
use crate::worker::EnqueueRequest;

use super::events::WebhookEvent;

/// Error type for webhook parsing failures.
#[derive(Debug, Error)]
pub enum ParseError {
    /// JSON deserialization failed (includes missing required fields).
    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Field has invalid value.
    #[error("invalid field value for {field}: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// Parses a webhook payload.
///
/// `event_type` is the value of the `X-GitHub-Event` header. Unknown event
/// types parse to [`WebhookEvent::Ignored`].
pub fn parse_webhook(event_type: &str, payload: &[u8]) -> Result<WebhookEvent, ParseError> {
    match event_type {
        "ping" => Ok(WebhookEvent::Ping),
        "push" => parse_push(payload),
        "pull_request" => parse_pull_request(payload),
        other => Ok(WebhookEvent::ignored(format!("event type {other:?}"))),
    }
}

// ─── Raw payload structures ───

/// Repository info present in every payload the worker acts on.
#[derive(Debug, Deserialize)]
struct RawRepository {
    owner: RawOwner,
    name: String,
    #[serde(default)]
    private: bool,
    #[serde(default)]
    default_branch: Option<String>,
}

impl RawRepository {
    fn repo_id(&self) -> Result<RepoId, ParseError> {
        // Push payloads carry the owner's `name`, other events its `login`.
        let owner = self
            .owner
            .login
            .as_deref()
            .or(self.owner.name.as_deref())
            .unwrap_or_default();
        if owner.is_empty() || self.name.is_empty() {
            return Err(ParseError::InvalidField {
                field: "repository",
                value: format!("{owner}/{}", self.name),
            });
        }
        Ok(RepoId::new(owner, &self.name))
    }

    fn full_name(&self) -> String {
        self.repo_id()
            .map(|r| r.to_string())
            .unwrap_or_else(|_| self.name.clone())
    }
}

#[derive(Debug, Deserialize)]
struct RawOwner {
    #[serde(default)]
    login: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPush {
    #[serde(rename = "ref")]
    reference: String,
    head_commit: Option<RawCommit>,
    repository: RawRepository,
}

#[derive(Debug, Deserialize)]
struct RawCommit {
    id: String,
    #[serde(default)]
    author: Option<RawCommitUser>,
    #[serde(default)]
    committer: Option<RawCommitUser>,
}

#[derive(Debug, Deserialize)]
struct RawCommitUser {
    /// GitHub login; absent when the email matches no account.
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPullRequestEvent {
    action: String,
    pull_request: RawPullRequest,
    repository: RawRepository,
}

#[derive(Debug, Deserialize)]
struct RawPullRequest {
    number: u64,
    head: RawHead,
}

#[derive(Debug, Deserialize)]
struct RawHead {
    sha: String,
    /// Null when the head repository was deleted.
    repo: Option<RawHeadRepo>,
}

#[derive(Debug, Deserialize)]
struct RawHeadRepo {
    full_name: String,
}

// ─── Event parsers ───

fn parse_push(payload: &[u8]) -> Result<WebhookEvent, ParseError> {
    let raw: RawPush = serde_json::from_slice(payload)?;
    let repo = raw.repository.repo_id()?;

    let Some(branch) = raw.reference.strip_prefix("refs/heads/") else {
        return Ok(WebhookEvent::ignored(format!("push to {}", raw.reference)));
    };
    let Some(head) = raw.head_commit else {
        return Ok(WebhookEvent::ignored(format!("deletion of {}", raw.reference)));
    };
    if head.id.is_empty() {
        return Err(ParseError::InvalidField {
            field: "head_commit.id",
            value: head.id,
        });
    }

    let default_branch = raw.repository.default_branch.as_deref().unwrap_or("master");
    let blame = if branch == default_branch {
        let mut blame = Vec::new();
        for user in [head.author, head.committer].into_iter().flatten() {
            if let Some(login) = user.username
                && !login.is_empty()
                && !blame.contains(&login)
            {
                blame.push(login);
            }
        }
        blame
    } else {
        Vec::new()
    };

    Ok(WebhookEvent::Enqueue(
        EnqueueRequest::new(repo, Sha::new(head.id))
            .with_ssh(raw.repository.private)
            .with_blame(blame),
    ))
}

fn parse_pull_request(payload: &[u8]) -> Result<WebhookEvent, ParseError> {
    let raw: RawPullRequestEvent = serde_json::from_slice(payload)?;
    let repo = raw.repository.repo_id()?;
    let number = raw.pull_request.number;

    if raw.action != "opened" && raw.action != "synchronize" {
        return Ok(WebhookEvent::ignored(format!(
            "action {:?} on PR #{number}",
            raw.action
        )));
    }
    // Only branches of the repository itself; fork code is never run.
    let head_repo = raw.pull_request.head.repo.map(|r| r.full_name);
    if head_repo.as_deref() != Some(raw.repository.full_name().as_str()) {
        return Ok(WebhookEvent::ignored(format!(
            "PR #{number} from {}",
            head_repo.as_deref().unwrap_or("a deleted repository")
        )));
    }

    Ok(WebhookEvent::Enqueue(
        EnqueueRequest::new(repo, Sha::new(raw.pull_request.head.sha))
            .with_ssh(raw.repository.private)
            .with_pull(Some(PrNumber(number))),
    ))
}
