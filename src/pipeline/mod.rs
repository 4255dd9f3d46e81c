//! Job Pipeline: sync, checkout, resolve checks, run checks.
//!
//! Phases run strictly in order. A failed sync or checkout stops the job
//! before any check runs; a failed check does not, so one broken lint step
//! never hides unrelated test failures. Every phase emits its result on the
//! events channel, and dropping the sender when the pipeline returns tells the
//! reporter the job is over.
//!
//! The work itself is behind [`JobExecutor`], so the control flow can be
//! exercised without git or a network.

use std::future::Future;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::debug;

use crate::config::CheckPlan;
use crate::runner::CommandOutput;
use crate::types::{Check, StepResult, check_name};

pub const SYNC_STEP: &str = "setup-1-sync";
pub const CHECKOUT_STEP: &str = "setup-2-checkout";
pub const PLAN_STEP: &str = "setup-3-checks";

/// What the pipeline reports while it progresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// A setup phase finished (sync or checkout).
    Setup(StepResult),
    /// The checks were resolved; `total` of them will follow.
    Plan { step: StepResult, total: usize },
    /// Check number `index` (1-based) finished.
    Check { step: StepResult, index: usize },
}

impl PipelineEvent {
    pub fn step(&self) -> &StepResult {
        match self {
            PipelineEvent::Setup(step)
            | PipelineEvent::Plan { step, .. }
            | PipelineEvent::Check { step, .. } => step,
        }
    }
}

/// Performs the phases of one job.
///
/// Phases never return `Err`: failures are part of the output, flagged by
/// `success`.
pub trait JobExecutor: Send + Sync {
    /// Brings the primary and every secondary checkout up to date.
    fn sync(&self) -> impl Future<Output = CommandOutput> + Send;

    /// Puts the primary checkout at the job's commit and prepares it.
    fn checkout(&self) -> impl Future<Output = CommandOutput> + Send;

    /// Decides which checks to run.
    fn resolve_checks(&self) -> impl Future<Output = CheckPlan> + Send;

    /// Runs one check from the primary checkout.
    fn run_check(&self, check: &Check) -> impl Future<Output = CommandOutput> + Send;
}

/// Runs every phase of a job, emitting one event per phase or check.
///
/// Returns whether the whole job succeeded.
pub async fn run_pipeline<E: JobExecutor>(executor: &E, events: mpsc::Sender<PipelineEvent>) -> bool {
    for (name, is_sync) in [(SYNC_STEP, true), (CHECKOUT_STEP, false)] {
        let start = Instant::now();
        let out = if is_sync {
            executor.sync().await
        } else {
            executor.checkout().await
        };
        let success = out.success;
        emit(
            &events,
            PipelineEvent::Setup(StepResult::new(name, out.text, success, start.elapsed())),
        )
        .await;
        if !success {
            debug!(step = name, "setup failed, skipping checks");
            return false;
        }
    }

    let start = Instant::now();
    let plan = executor.resolve_checks().await;
    let total = plan.checks.len();
    emit(
        &events,
        PipelineEvent::Plan {
            step: StepResult::new(PLAN_STEP, plan.describe(), true, start.elapsed()),
            total,
        },
    )
    .await;

    let mut success = true;
    for (i, check) in plan.checks.iter().enumerate() {
        let index = i + 1;
        let start = Instant::now();
        let out = executor.run_check(check).await;
        // Keep going: later checks still run after a failure.
        success &= out.success;
        let step = StepResult::new(check_name(index, total), out.text, out.success, start.elapsed());
        emit(&events, PipelineEvent::Check { step, index }).await;
    }
    success
}

async fn emit(events: &mpsc::Sender<PipelineEvent>, event: PipelineEvent) {
    if events.send(event).await.is_err() {
        debug!("results consumer is gone");
    }
}
