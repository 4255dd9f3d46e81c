//! Reporting State Machine.
//!
//! One control loop owns the [`ReportState`] of a job and selects between the
//! pipeline's events and a debounce timer:
//!
//! - the first failure of a job is published at once;
//! - any other update arms the timer if it is idle, so results arriving within
//!   the window are published together;
//! - when the events channel closes, anything still pending is published.
//!
//! Statuses and notes cost an API request each and are rate limited; the
//! window bounds the request volume on jobs with many checks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{MISSING_CONTENT, NoteFiles, NoteHandle, ReportTransport, Status, StatusState};
use crate::pipeline::PipelineEvent;
use crate::runner::{format_duration, round_duration};
use crate::types::{RepoId, Sha};

/// Everything published about one job, plus what is not published yet.
#[derive(Debug, Clone)]
pub struct ReportState {
    status: Status,
    note: NoteHandle,
    prefix: String,
    pending: NoteFiles,
    check_num: usize,
    total: Option<usize>,
    failures: usize,
    finished: bool,
    started: Instant,
}

impl ReportState {
    /// State of a job that just started: running, setting up.
    pub fn new(note: NoteHandle, prefix: impl Into<String>, started: Instant) -> Self {
        ReportState {
            status: Status::new(StatusState::Running, "Setting up", note.url.clone()),
            note,
            prefix: prefix.into(),
            pending: NoteFiles::new(),
            check_num: 0,
            total: None,
            failures: 0,
            finished: false,
            started,
        }
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn note(&self) -> &NoteHandle {
        &self.note
    }

    /// Files not published yet.
    pub fn pending(&self) -> &NoteFiles {
        &self.pending
    }

    pub fn failed(&self) -> bool {
        self.failures > 0
    }

    /// Whether every check ran and passed.
    pub fn succeeded(&self) -> bool {
        self.finished && self.failures == 0
    }

    pub fn note_description(&self) -> String {
        format!("{}: {}", self.prefix, self.status.description)
    }

    /// Records one event. Returns true if it is the job's first failure.
    pub fn apply(&mut self, event: &PipelineEvent, now: Instant) -> bool {
        let step = event.step();
        let first_failure = !step.success && self.failures == 0;

        let mut name = step.name.clone();
        if !step.success {
            name.push_str(" (failed)");
            self.failures += 1;
            self.status.state = StatusState::Failure;
        }
        name.push_str(" in ");
        name.push_str(&format_duration(round_duration(step.elapsed)));
        let content = if step.content.is_empty() {
            MISSING_CONTENT.to_string()
        } else {
            step.content.clone()
        };
        self.pending.insert(name, content);

        let progress = match event {
            PipelineEvent::Setup(_) => self.with_failure_marker("Setting up".to_string()),
            PipelineEvent::Plan { total, .. } => {
                self.total = Some(*total);
                self.progress(0)
            }
            PipelineEvent::Check { index, .. } => self.progress(*index),
        };
        self.status.description = format!(
            "{progress} in {}",
            format_duration(round_duration(now - self.started))
        );
        first_failure
    }

    /// Records the end of the event stream. Returns true if the state changed.
    pub fn close(&mut self, now: Instant) -> bool {
        if self.finished || self.failed() {
            return false;
        }
        // The pipeline stopped without a failure or a last check.
        self.failures += 1;
        self.status.state = StatusState::Failure;
        self.status.description = format!(
            "Aborted in {}",
            format_duration(round_duration(now - self.started))
        );
        true
    }

    fn progress(&mut self, done: usize) -> String {
        self.check_num = done;
        let total = self.total.unwrap_or(0);
        if done < total {
            return self.with_failure_marker(format!("Running ({done}/{total})"));
        }
        self.finished = true;
        if self.failures == 0 {
            self.status.state = StatusState::Success;
            "Ran checks (success!)".to_string()
        } else {
            format!("Ran checks (failed {} of {total})", self.failures)
        }
    }

    fn with_failure_marker(&self, mut text: String) -> String {
        if self.failed() {
            text.push_str(" (failed)");
        }
        text
    }
}

/// Drives the [`ReportState`] of one job.
pub struct Reporter<T: ReportTransport> {
    transport: Arc<T>,
    repo: RepoId,
    commit: Sha,
    debounce: Duration,
    state: ReportState,
}

impl<T: ReportTransport> Reporter<T> {
    pub fn new(
        transport: Arc<T>,
        repo: RepoId,
        commit: Sha,
        note: NoteHandle,
        prefix: impl Into<String>,
        debounce: Duration,
    ) -> Self {
        Reporter {
            transport,
            repo,
            commit,
            debounce,
            state: ReportState::new(note, prefix, Instant::now()),
        }
    }

    /// Publishes the running status, then follows `events` until the pipeline
    /// drops its sender.
    ///
    /// Returns the final state.
    pub async fn run(mut self, mut events: mpsc::Receiver<PipelineEvent>) -> ReportState {
        self.publish_status().await;

        let timer = tokio::time::sleep(self.debounce);
        tokio::pin!(timer);
        let mut armed = false;

        loop {
            tokio::select! {
                () = &mut timer, if armed => {
                    armed = false;
                    self.flush().await;
                }
                event = events.recv() => match event {
                    Some(event) => {
                        if self.state.apply(&event, Instant::now()) {
                            debug!(step = %event.step().name, "first failure, publishing now");
                            armed = false;
                            self.flush().await;
                        } else if !armed {
                            armed = true;
                            timer.as_mut().reset(Instant::now() + self.debounce);
                        }
                    }
                    None => {
                        let changed = self.state.close(Instant::now());
                        if armed || changed {
                            self.flush().await;
                        }
                        return self.state;
                    }
                },
            }
        }
    }

    async fn flush(&mut self) {
        let description = self.state.note_description();
        match self
            .transport
            .update_note(&self.state.note, &description, &self.state.pending)
            .await
        {
            // Published files are carried over by the note; only send new ones.
            Ok(()) => self.state.pending.clear(),
            Err(err) => warn!(error = %err, note = %self.state.note.id, "failed to update note"),
        }
        self.publish_status().await;
    }

    async fn publish_status(&self) {
        if let Err(err) = self
            .transport
            .publish_status(&self.repo, &self.commit, &self.state.status)
            .await
        {
            warn!(error = %err, repo = %self.repo, commit = %self.commit, "failed to update status");
        }
    }
}
