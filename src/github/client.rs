//! [`ReportTransport`] over the GitHub REST API.
//!
//! Statuses go to `POST /repos/{owner}/{repo}/statuses/{sha}`, notes are
//! secret gists (readable by anyone with the link, so failures can be shared
//! without granting repository access), failures open an issue.

use std::collections::BTreeMap;

use octocrab::Octocrab;
use serde::{Deserialize, Serialize};

use super::error::GitHubApiError;
use crate::report::{NoteFiles, NoteHandle, ReportTransport, Status, StatusState};
use crate::types::{RepoId, Sha};

/// GitHub rejects longer status descriptions.
const MAX_STATUS_DESCRIPTION: usize = 140;

/// Publishes job progress to GitHub.
#[derive(Clone)]
pub struct GitHubReporter {
    client: Octocrab,

    /// Status context, the worker's name.
    context: String,
}

impl GitHubReporter {
    pub fn new(client: Octocrab, context: impl Into<String>) -> Self {
        Self {
            client,
            context: context.into(),
        }
    }

    /// Creates a reporter authenticated with a personal access token.
    pub fn from_token(
        token: impl Into<String>,
        context: impl Into<String>,
    ) -> Result<Self, GitHubApiError> {
        let client = Octocrab::builder()
            .personal_token(token.into())
            .build()
            .map_err(GitHubApiError::from_octocrab)?;
        Ok(Self::new(client, context))
    }
}

impl std::fmt::Debug for GitHubReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubReporter")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize, PartialEq)]
struct StatusRequest<'a> {
    state: &'static str,
    #[serde(skip_serializing_if = "str::is_empty")]
    target_url: &'a str,
    description: String,
    context: &'a str,
}

impl<'a> StatusRequest<'a> {
    fn new(status: &'a Status, context: &'a str) -> Self {
        // GitHub has no "running" state.
        let state = match status.state {
            StatusState::Pending | StatusState::Running => "pending",
            StatusState::Success => "success",
            StatusState::Failure => "failure",
        };
        StatusRequest {
            state,
            target_url: &status.link,
            description: truncate(&status.description, MAX_STATUS_DESCRIPTION),
            context,
        }
    }
}

#[derive(Debug, Serialize)]
struct GistFile<'a> {
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct GistRequest<'a> {
    description: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    public: Option<bool>,
    files: BTreeMap<&'a str, GistFile<'a>>,
}

impl<'a> GistRequest<'a> {
    fn new(description: &'a str, files: &'a NoteFiles, public: Option<bool>) -> Self {
        GistRequest {
            description,
            public,
            files: files
                .iter()
                .map(|(name, content)| (name.as_str(), GistFile { content }))
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GistResponse {
    id: Option<String>,
    html_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct IssueRequest<'a> {
    title: &'a str,
    body: &'a str,
    assignees: &'a [String],
}

impl ReportTransport for GitHubReporter {
    type Error = GitHubApiError;

    async fn create_note(
        &self,
        description: &str,
        files: &NoteFiles,
    ) -> Result<NoteHandle, GitHubApiError> {
        let response: GistResponse = self
            .client
            .post("/gists", Some(&GistRequest::new(description, files, Some(false))))
            .await
            .map_err(GitHubApiError::from_octocrab)?;
        match (response.id, response.html_url) {
            (Some(id), Some(url)) => Ok(NoteHandle { id, url }),
            _ => Err(GitHubApiError::permanent_without_source(
                "gist response lacks id or html_url",
            )),
        }
    }

    async fn update_note(
        &self,
        note: &NoteHandle,
        description: &str,
        files: &NoteFiles,
    ) -> Result<(), GitHubApiError> {
        let url = format!("/gists/{}", note.id);
        let _: serde_json::Value = self
            .client
            .patch(&url, Some(&GistRequest::new(description, files, None)))
            .await
            .map_err(GitHubApiError::from_octocrab)?;
        Ok(())
    }

    async fn publish_status(
        &self,
        repo: &RepoId,
        commit: &Sha,
        status: &Status,
    ) -> Result<(), GitHubApiError> {
        let url = format!("/repos/{}/{}/statuses/{}", repo.owner, repo.repo, commit);
        let _: serde_json::Value = self
            .client
            .post(&url, Some(&StatusRequest::new(status, &self.context)))
            .await
            .map_err(GitHubApiError::from_octocrab)?;
        Ok(())
    }

    async fn report_failure(
        &self,
        repo: &RepoId,
        title: &str,
        body: &str,
        assignees: &[String],
    ) -> Result<(), GitHubApiError> {
        let url = format!("/repos/{}/{}/issues", repo.owner, repo.repo);
        let _: serde_json::Value = self
            .client
            .post(
                &url,
                Some(&IssueRequest {
                    title,
                    body,
                    assignees,
                }),
            )
            .await
            .map_err(GitHubApiError::from_octocrab)?;
        Ok(())
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn running_is_published_as_pending() {
        let status = Status::new(StatusState::Running, "Setting up", "https://gist/1");
        let body = serde_json::to_value(StatusRequest::new(&status, "rpi")).unwrap();
        assert_eq!(
            body,
            json!({
                "state": "pending",
                "target_url": "https://gist/1",
                "description": "Setting up",
                "context": "rpi",
            })
        );
    }

    #[test]
    fn status_without_link_omits_target_url() {
        let status = Status::new(StatusState::Failure, "Ran checks (failed 1 of 2)", "");
        let body = serde_json::to_value(StatusRequest::new(&status, "rpi")).unwrap();
        assert_eq!(body["state"], "failure");
        assert!(body.get("target_url").is_none());
    }

    #[test]
    fn long_descriptions_are_truncated() {
        let long = "é".repeat(200);
        let status = Status::new(StatusState::Success, long, "");
        let request = StatusRequest::new(&status, "rpi");
        assert_eq!(request.description.chars().count(), MAX_STATUS_DESCRIPTION);
    }

    #[test]
    fn gist_body_lists_files() {
        let mut files = NoteFiles::new();
        files.insert("cmd1 in 1s".to_string(), "ok\n".to_string());
        let body =
            serde_json::to_value(GistRequest::new("rpi for octo/cat", &files, Some(false))).unwrap();
        assert_eq!(
            body,
            json!({
                "description": "rpi for octo/cat",
                "public": false,
                "files": { "cmd1 in 1s": { "content": "ok\n" } },
            })
        );

        let update = serde_json::to_value(GistRequest::new("d", &files, None)).unwrap();
        assert!(update.get("public").is_none());
    }
}
