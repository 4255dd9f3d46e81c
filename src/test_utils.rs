//! Shared test doubles: a recording report transport and scripted jobs.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::CheckPlan;
use crate::pipeline::JobExecutor;
use crate::report::{NoteFiles, NoteHandle, ReportTransport, Status, StatusState};
use crate::runner::CommandOutput;
use crate::types::{Check, JobRequest, RepoId, Sha};
use crate::worker::{EnqueueRequest, JobProvisioner};

// ─── Recording Transport ───

/// One call made on a [`RecordingTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    CreateNote {
        description: String,
        files: NoteFiles,
    },
    UpdateNote {
        id: String,
        description: String,
        files: NoteFiles,
        /// False if the update was made to fail.
        accepted: bool,
    },
    Status {
        repo: RepoId,
        commit: Sha,
        state: StatusState,
        description: String,
        link: String,
    },
    Failure {
        repo: RepoId,
        title: String,
        body: String,
        assignees: Vec<String>,
    },
}

/// A [`ReportTransport`] that records every call and fails on request.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<RecordedCall>>,
    notes: AtomicUsize,
    failing_note_updates: AtomicUsize,
    failing_note_creations: AtomicUsize,
    failing_statuses: AtomicUsize,
}

impl RecordingTransport {
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Files of every accepted note update, in order.
    pub fn note_updates(&self) -> Vec<NoteFiles> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::UpdateNote {
                    files,
                    accepted: true,
                    ..
                } => Some(files),
                _ => None,
            })
            .collect()
    }

    /// Every status published, in order.
    pub fn statuses(&self) -> Vec<Status> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::Status {
                    state,
                    description,
                    link,
                    ..
                } => Some(Status::new(state, description, link)),
                _ => None,
            })
            .collect()
    }

    pub fn last_status(&self) -> Option<Status> {
        self.statuses().pop()
    }

    /// Names of every file published to notes, creation included.
    pub fn published_files(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .flat_map(|call| match call {
                RecordedCall::CreateNote { files, .. }
                | RecordedCall::UpdateNote {
                    files,
                    accepted: true,
                    ..
                } => files.into_keys().collect(),
                _ => Vec::new(),
            })
            .collect()
    }

    /// Makes the next `n` note updates fail.
    pub fn fail_note_updates(&self, n: usize) {
        self.failing_note_updates.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` note creations fail.
    pub fn fail_note_creations(&self, n: usize) {
        self.failing_note_creations.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` status updates fail.
    pub fn fail_statuses(&self, n: usize) {
        self.failing_statuses.store(n, Ordering::SeqCst);
    }

    fn record(&self, call: RecordedCall) {
        self.calls.lock().unwrap().push(call);
    }
}

/// Decrements `counter` if it is positive. Returns true if it was.
fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl ReportTransport for RecordingTransport {
    type Error = String;

    async fn create_note(&self, description: &str, files: &NoteFiles) -> Result<NoteHandle, String> {
        if take_failure(&self.failing_note_creations) {
            return Err("note creation refused".to_string());
        }
        self.record(RecordedCall::CreateNote {
            description: description.to_string(),
            files: files.clone(),
        });
        let n = self.notes.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(NoteHandle {
            id: format!("note-{n}"),
            url: format!("https://notes.example/note-{n}"),
        })
    }

    async fn update_note(
        &self,
        note: &NoteHandle,
        description: &str,
        files: &NoteFiles,
    ) -> Result<(), String> {
        let accepted = !take_failure(&self.failing_note_updates);
        self.record(RecordedCall::UpdateNote {
            id: note.id.clone(),
            description: description.to_string(),
            files: files.clone(),
            accepted,
        });
        if accepted {
            Ok(())
        } else {
            Err("note update refused".to_string())
        }
    }

    async fn publish_status(&self, repo: &RepoId, commit: &Sha, status: &Status) -> Result<(), String> {
        if take_failure(&self.failing_statuses) {
            return Err("status refused".to_string());
        }
        self.record(RecordedCall::Status {
            repo: repo.clone(),
            commit: commit.clone(),
            state: status.state,
            description: status.description.clone(),
            link: status.link.clone(),
        });
        Ok(())
    }

    async fn report_failure(
        &self,
        repo: &RepoId,
        title: &str,
        body: &str,
        assignees: &[String],
    ) -> Result<(), String> {
        self.record(RecordedCall::Failure {
            repo: repo.clone(),
            title: title.to_string(),
            body: body.to_string(),
            assignees: assignees.to_vec(),
        });
        Ok(())
    }
}

// ─── Scripted Jobs ───

/// Tracks how many scripted jobs run at once.
#[derive(Debug, Default)]
pub struct JobProbe {
    active: AtomicUsize,
    max_active: AtomicUsize,
    started: Mutex<Vec<String>>,
}

impl JobProbe {
    /// Highest number of jobs seen running together.
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Commits of the jobs started so far, in start order.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    fn enter(&self, label: &str) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.started.lock().unwrap().push(label.to_string());
    }

    fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A [`JobExecutor`] with canned results.
///
/// A check fails if its command is `false`; anything else passes.
#[derive(Debug)]
pub struct ScriptedExecutor {
    checks: Vec<Check>,
    fail_sync: bool,
    fail_checkout: bool,
    check_delay: Duration,
    label: String,
    probe: Option<Arc<JobProbe>>,
    entered: AtomicBool,
    checkouts: AtomicUsize,
    checks_run: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new(checks: Vec<Check>) -> Self {
        ScriptedExecutor {
            checks,
            fail_sync: false,
            fail_checkout: false,
            check_delay: Duration::ZERO,
            label: String::new(),
            probe: None,
            entered: AtomicBool::new(false),
            checkouts: AtomicUsize::new(0),
            checks_run: AtomicUsize::new(0),
        }
    }

    pub fn failing_sync(mut self) -> Self {
        self.fail_sync = true;
        self
    }

    pub fn failing_checkout(mut self) -> Self {
        self.fail_checkout = true;
        self
    }

    /// Each check takes `delay` (of tokio time).
    pub fn with_check_delay(mut self, delay: Duration) -> Self {
        self.check_delay = delay;
        self
    }

    /// Reports to `probe` as `label` from sync until the executor is dropped.
    pub fn with_probe(mut self, label: impl Into<String>, probe: Arc<JobProbe>) -> Self {
        self.label = label.into();
        self.probe = Some(probe);
        self
    }

    pub fn checkouts(&self) -> usize {
        self.checkouts.load(Ordering::SeqCst)
    }

    pub fn checks_run(&self) -> usize {
        self.checks_run.load(Ordering::SeqCst)
    }
}

impl Drop for ScriptedExecutor {
    fn drop(&mut self) {
        if let Some(probe) = &self.probe
            && self.entered.load(Ordering::SeqCst)
        {
            probe.exit();
        }
    }
}

impl JobExecutor for ScriptedExecutor {
    async fn sync(&self) -> CommandOutput {
        if let Some(probe) = &self.probe
            && !self.entered.swap(true, Ordering::SeqCst)
        {
            probe.enter(&self.label);
        }
        CommandOutput::new("synced\n", !self.fail_sync)
    }

    async fn checkout(&self) -> CommandOutput {
        self.checkouts.fetch_add(1, Ordering::SeqCst);
        CommandOutput::new("checked out\n", !self.fail_checkout)
    }

    async fn resolve_checks(&self) -> CheckPlan {
        CheckPlan {
            checks: self.checks.clone(),
            source: "scripted checks".to_string(),
        }
    }

    async fn run_check(&self, check: &Check) -> CommandOutput {
        self.checks_run.fetch_add(1, Ordering::SeqCst);
        if !self.check_delay.is_zero() {
            tokio::time::sleep(self.check_delay).await;
        }
        let success = check.command.first().map(String::as_str) != Some("false");
        CommandOutput::new(format!("ran {}\n", check.display()), success)
    }
}

/// A [`JobProvisioner`] handing out [`ScriptedExecutor`]s.
#[derive(Debug, Default)]
pub struct ScriptedProvisioner {
    checks: Vec<Check>,
    /// What commit resolution finds; `None` means nothing.
    resolved: Option<Sha>,
    check_delay: Duration,
    probe: Arc<JobProbe>,
}

impl ScriptedProvisioner {
    pub fn new(checks: Vec<Check>) -> Self {
        ScriptedProvisioner {
            checks,
            ..Default::default()
        }
    }

    pub fn resolving_to(mut self, commit: impl Into<Sha>) -> Self {
        self.resolved = Some(commit.into());
        self
    }

    pub fn with_check_delay(mut self, delay: Duration) -> Self {
        self.check_delay = delay;
        self
    }

    pub fn probe(&self) -> Arc<JobProbe> {
        self.probe.clone()
    }
}

impl JobProvisioner for ScriptedProvisioner {
    type Executor = ScriptedExecutor;

    fn job(&self, request: &EnqueueRequest) -> JobRequest {
        JobRequest::new(
            request.repo.clone(),
            request.commit.clone(),
            Path::new("/nonexistent/ci-work"),
        )
        .with_pull(request.pull)
    }

    async fn resolve_commit(&self, _job: &JobRequest) -> Option<Sha> {
        self.resolved.clone()
    }

    async fn metadata(&self, job: &JobRequest) -> String {
        format!("Commit: {}\n", job.commit)
    }

    fn executor(&self, job: JobRequest) -> ScriptedExecutor {
        ScriptedExecutor::new(self.checks.clone())
            .with_check_delay(self.check_delay)
            .with_probe(job.commit.to_string(), self.probe.clone())
    }
}
