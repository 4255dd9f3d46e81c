//! Transport that prints the transcript instead of publishing it.
//!
//! Used by `ci-worker run --local` to try a repository's checks without
//! touching GitHub.

use std::convert::Infallible;
use std::io::Write;

use tracing::info;

use super::{NoteFiles, NoteHandle, ReportTransport, Status};
use crate::types::{RepoId, Sha};

#[derive(Debug, Default)]
pub struct ConsoleTransport;

impl ConsoleTransport {
    fn print(files: &NoteFiles) {
        let mut out = std::io::stdout().lock();
        for (name, content) in files {
            let _ = write!(out, "--- {name}\n{content}");
            if !content.ends_with('\n') {
                let _ = writeln!(out);
            }
        }
        let _ = out.flush();
    }
}

impl ReportTransport for ConsoleTransport {
    type Error = Infallible;

    async fn create_note(&self, description: &str, files: &NoteFiles) -> Result<NoteHandle, Infallible> {
        info!(%description, "local run");
        Self::print(files);
        Ok(NoteHandle {
            id: "local".to_string(),
            url: String::new(),
        })
    }

    async fn update_note(
        &self,
        _note: &NoteHandle,
        _description: &str,
        files: &NoteFiles,
    ) -> Result<(), Infallible> {
        Self::print(files);
        Ok(())
    }

    async fn publish_status(&self, repo: &RepoId, commit: &Sha, status: &Status) -> Result<(), Infallible> {
        info!(%repo, %commit, state = %status.state, description = %status.description, "status");
        Ok(())
    }

    async fn report_failure(
        &self,
        repo: &RepoId,
        title: &str,
        _body: &str,
        assignees: &[String],
    ) -> Result<(), Infallible> {
        info!(%repo, %title, ?assignees, "build failed");
        Ok(())
    }
}
