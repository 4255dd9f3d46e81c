//! Reporting: the commit status and the note (paste) holding the transcript.
//!
//! [`Reporter`] consumes pipeline events and decides when to publish;
//! [`ReportTransport`] is the remote side. Publishing is best effort: errors
//! are logged and the job carries on.

mod console;
mod reporter;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::types::{RepoId, Sha};

pub use console::ConsoleTransport;
pub use reporter::{ReportState, Reporter};

/// Placeholder published for a step that printed nothing.
pub const MISSING_CONTENT: &str = "<missing>";

/// Files of a note, keyed by name. Names sort in run order.
pub type NoteFiles = BTreeMap<String, String>;

/// State of the commit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusState {
    Pending,
    Running,
    Success,
    Failure,
}

impl fmt::Display for StatusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatusState::Pending => "pending",
            StatusState::Running => "running",
            StatusState::Success => "success",
            StatusState::Failure => "failure",
        };
        f.write_str(s)
    }
}

/// A commit status update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub state: StatusState,
    pub description: String,
    /// Link shown next to the status, the note's URL.
    pub link: String,
}

impl Status {
    pub fn new(state: StatusState, description: impl Into<String>, link: impl Into<String>) -> Self {
        Status {
            state,
            description: description.into(),
            link: link.into(),
        }
    }
}

/// A published note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteHandle {
    pub id: String,
    pub url: String,
}

/// Remote side of reporting.
///
/// Calls are fire-and-forget from the job's point of view: callers log the
/// error and move on.
pub trait ReportTransport: Send + Sync + 'static {
    /// The error type returned by this transport.
    type Error: fmt::Display + Send;

    /// Creates a note with an initial set of files.
    fn create_note(
        &self,
        description: &str,
        files: &NoteFiles,
    ) -> impl Future<Output = Result<NoteHandle, Self::Error>> + Send;

    /// Updates the description and adds or replaces `files`; other files are
    /// left as they are.
    fn update_note(
        &self,
        note: &NoteHandle,
        description: &str,
        files: &NoteFiles,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Sets the status of `commit`.
    fn publish_status(
        &self,
        repo: &RepoId,
        commit: &Sha,
        status: &Status,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Tells people about a failed build (e.g. by opening an issue).
    fn report_failure(
        &self,
        repo: &RepoId,
        title: &str,
        body: &str,
        assignees: &[String],
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}
