//! Checkout phase: put the primary checkout at the job's commit.

use tracing::instrument;

use super::sync::{clone_primary, fetch_primary};
use crate::runner::{CommandOutput, CommandRunner};
use crate::types::JobRequest;

/// Local branch recreated at the job's commit on every run.
///
/// Dependency tooling commonly refuses to operate on a detached HEAD, so the
/// checkout is kept on a named branch.
pub const CI_BRANCH: &str = "_ci";

/// Second branch tracking [`CI_BRANCH`], for tools that need an upstream.
pub const CI_TRACKING_BRANCH: &str = "_ci2";

/// Checks out the job's commit and runs the setup commands.
///
/// Stops at the first failing command; the result holds every transcript up to
/// and including that one.
#[instrument(skip_all, fields(repo = %job.repo, commit = %job.commit))]
pub async fn checkout(
    runner: &CommandRunner,
    job: &JobRequest,
    clone_depth: Option<u32>,
    setup_commands: &[Vec<String>],
) -> CommandOutput {
    let mut result = CommandOutput::new(String::new(), true);

    // Sync may have deleted a broken checkout.
    match tokio::fs::try_exists(job.checkout_dir()).await {
        Ok(true) => {}
        Ok(false) => {
            result.append(clone_primary(runner, job, clone_depth).await);
            if result.success && job.pull.is_some() {
                result.append(fetch_primary(runner, job).await);
            }
            if !result.success {
                return result;
            }
        }
        Err(err) => return CommandOutput::failure(err),
    }

    let branch_commands = [
        vec!["git", "checkout", "--quiet", "-B", CI_BRANCH, job.commit.as_str()],
        vec!["git", "checkout", "--quiet", "-B", CI_TRACKING_BRANCH, CI_BRANCH],
    ];
    let commands = branch_commands
        .iter()
        .map(|argv| argv.iter().map(|s| s.to_string()).collect::<Vec<_>>())
        .chain(setup_commands.iter().cloned());

    let checkout_rel = job.checkout_rel();
    for argv in commands {
        let use_job_path = !argv.first().is_some_and(|p| p == "git");
        result.append(runner.run(&checkout_rel, &[], &argv, use_job_path).await);
        if !result.success {
            break;
        }
    }
    result
}
