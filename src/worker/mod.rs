//! Worker Queue: accepts jobs and runs them one at a time.
//!
//! Enqueueing is synchronous up to the pending status: the commit is resolved,
//! the metadata note is created and the commit is marked pending before the
//! call returns. If any of that fails the job is not queued, so no work runs
//! untracked. The job itself runs in the background, serialized with every
//! other job of this worker by a single mutex.
//!
//! # Module Structure
//!
//! - [`queue`]: [`WorkerQueue`], enqueue and drain

mod queue;


use std::future::Future;

use thiserror::Error;

use crate::pipeline::JobExecutor;
use crate::types::{JobRequest, PrNumber, RepoId, Sha};

pub use queue::{QueueSettings, WorkerQueue};

/// A request to verify one commit, as received from a trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueRequest {
    pub repo: RepoId,
    pub alt_path: Option<String>,
    /// Empty when only the branch or pull request is known.
    pub commit: Sha,
    pub use_ssh: bool,
    pub pull: Option<PrNumber>,
    /// GitHub logins to assign an issue to when the job fails.
    pub blame: Vec<String>,
}

impl EnqueueRequest {
    pub fn new(repo: RepoId, commit: Sha) -> Self {
        EnqueueRequest {
            repo,
            alt_path: None,
            commit,
            use_ssh: false,
            pull: None,
            blame: Vec::new(),
        }
    }

    pub fn with_alt_path(mut self, alt_path: Option<String>) -> Self {
        self.alt_path = alt_path;
        self
    }

    pub fn with_ssh(mut self, use_ssh: bool) -> Self {
        self.use_ssh = use_ssh;
        self
    }

    pub fn with_pull(mut self, pull: Option<PrNumber>) -> Self {
        self.pull = pull;
        self
    }

    pub fn with_blame(mut self, blame: Vec<String>) -> Self {
        self.blame = blame;
        self
    }
}

/// Why a job was not queued.
#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("could not find the head commit of {repo} ({reference})")]
    UnresolvedCommit { repo: RepoId, reference: String },

    #[error("failed to create the job note: {0}")]
    Note(String),

    #[error("failed to publish the pending status: {0}")]
    Status(String),
}

/// Builds what a queued job needs.
///
/// The production implementation is
/// [`WorkspaceProvisioner`](crate::workspace::WorkspaceProvisioner); tests
/// script it.
pub trait JobProvisioner: Send + Sync + 'static {
    type Executor: JobExecutor + 'static;

    /// Turns a request into a job with its workspace layout.
    fn job(&self, request: &EnqueueRequest) -> JobRequest;

    /// Looks up the head commit of the job's pull request or default branch.
    fn resolve_commit(&self, job: &JobRequest) -> impl Future<Output = Option<Sha>> + Send;

    /// Text of the `setup-0-metadata` note file.
    fn metadata(&self, job: &JobRequest) -> impl Future<Output = String> + Send;

    /// The executor that runs the job's phases.
    fn executor(&self, job: JobRequest) -> Self::Executor;
}

/// Where triggers hand their jobs to.
///
/// Implemented by [`WorkerQueue`]; the HTTP layer only needs this.
pub trait JobSink: Clone + Send + Sync + 'static {
    fn submit(&self, request: EnqueueRequest) -> impl Future<Output = Result<(), EnqueueError>> + Send;
}
