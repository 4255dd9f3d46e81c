//! The queue of one worker process.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio_util::task::TaskTracker;
use tracing::{Instrument, info, info_span, instrument, warn};

use super::{EnqueueError, EnqueueRequest, JobProvisioner, JobSink};
use crate::config::WorkerConfig;
use crate::pipeline::run_pipeline;
use crate::report::{NoteFiles, NoteHandle, ReportTransport, Reporter, Status, StatusState};
use crate::types::JobRequest;
use crate::workspace::METADATA_STEP;

/// Reporting behavior of a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSettings {
    /// Worker display name, the status context.
    pub name: String,
    pub debounce: Duration,
    /// Open an issue for the blame list when a job fails.
    pub create_issues: bool,
}

impl QueueSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        QueueSettings {
            name: config.name.clone(),
            debounce: config.debounce(),
            create_issues: config.create_issues,
        }
    }
}

/// Accepts jobs and runs them one at a time.
///
/// Cheap to clone; clones share the same queue.
pub struct WorkerQueue<T, P> {
    inner: Arc<Inner<T, P>>,
}

impl<T, P> Clone for WorkerQueue<T, P> {
    fn clone(&self) -> Self {
        WorkerQueue {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<T, P> {
    settings: QueueSettings,
    transport: Arc<T>,
    provisioner: P,
    /// Held for the whole run of a job. Tokio's mutex is fair, so waiting jobs
    /// run in arrival order.
    job_lock: Mutex<()>,
    /// Every enqueue call and every job in flight.
    tracker: TaskTracker,
}

impl<T: ReportTransport, P: JobProvisioner> WorkerQueue<T, P> {
    pub fn new(settings: QueueSettings, transport: Arc<T>, provisioner: P) -> Self {
        WorkerQueue {
            inner: Arc::new(Inner {
                settings,
                transport,
                provisioner,
                job_lock: Mutex::new(()),
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Queues a job.
    ///
    /// Returns once the commit is marked pending; the job runs later, after
    /// every job queued before it.
    #[instrument(skip_all, fields(repo = %request.repo, pull = ?request.pull))]
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<(), EnqueueError> {
        // Counts as outstanding work for `wait` from the very start.
        let _token = self.inner.tracker.token();
        let inner = &self.inner;

        let mut job = inner.provisioner.job(&request);
        if job.commit.is_empty() {
            job.commit = inner.provisioner.resolve_commit(&job).await.ok_or_else(|| {
                EnqueueError::UnresolvedCommit {
                    repo: job.repo.clone(),
                    reference: job
                        .pull
                        .map(|p| format!("refs/{}", p.head_ref()))
                        .unwrap_or_else(|| "HEAD".to_string()),
                }
            })?;
        }
        info!(repo = %job.repo, commit = %job.commit, pull = ?job.pull, "enqueuing job");

        let prefix = format!("{} for {}", inner.settings.name, job);
        let mut files = NoteFiles::new();
        files.insert(
            METADATA_STEP.to_string(),
            inner.provisioner.metadata(&job).await,
        );
        let note = inner
            .transport
            .create_note(&prefix, &files)
            .await
            .map_err(|e| EnqueueError::Note(e.to_string()))?;
        info!(url = %note.url, "created job note");

        let pending = Status::new(StatusState::Pending, "Pending", note.url.clone());
        inner
            .transport
            .publish_status(&job.repo, &job.commit, &pending)
            .await
            .map_err(|e| EnqueueError::Status(e.to_string()))?;

        let span = info_span!("job", repo = %job.repo, commit = %job.commit.short());
        let inner = self.inner.clone();
        self.inner
            .tracker
            .spawn(async move { inner.run_job(job, note, prefix, request.blame).await }.instrument(span));
        Ok(())
    }

    /// Waits until every enqueued job, and every enqueue call in progress, is
    /// done.
    pub async fn wait(&self) {
        let tracker = &self.inner.tracker;
        tracker.close();
        tracker.wait().await;
        tracker.reopen();
    }

    /// Number of jobs queued or running.
    pub fn outstanding(&self) -> usize {
        self.inner.tracker.len()
    }
}

impl<T: ReportTransport, P: JobProvisioner> JobSink for WorkerQueue<T, P> {
    async fn submit(&self, request: EnqueueRequest) -> Result<(), EnqueueError> {
        self.enqueue(request).await
    }
}

impl<T: ReportTransport, P: JobProvisioner> Inner<T, P> {
    async fn run_job(&self, job: JobRequest, note: NoteHandle, prefix: String, blame: Vec<String>) {
        let _running = self.job_lock.lock().await;
        info!("running job");

        let reporter = Reporter::new(
            self.transport.clone(),
            job.repo.clone(),
            job.commit.clone(),
            note.clone(),
            prefix,
            self.settings.debounce,
        );
        let repo = job.repo.clone();
        let commit = job.commit.clone();
        let executor = self.provisioner.executor(job);

        let (events_tx, events_rx) = mpsc::channel(1);
        let (pipeline_ok, state) =
            tokio::join!(run_pipeline(&executor, events_tx), reporter.run(events_rx));
        let failed = !pipeline_ok || !state.succeeded();

        if failed && self.settings.create_issues && !blame.is_empty() {
            let title = format!("Build \"{}\" failed on {}", self.settings.name, commit);
            if let Err(err) = self
                .transport
                .report_failure(&repo, &title, &note.url, &blame)
                .await
            {
                warn!(error = %err, "failed to report build failure");
            }
        }
        info!(success = !failed, "job done: {}", repo.commit_url(&commit));
    }
}
