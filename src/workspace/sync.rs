//! Workspace Synchronizer.
//!
//! The primary repository is cloned or fetched while every other checkout
//! found under the cache root is fetched concurrently: fetches are bound by
//! network latency, not CPU. All outcomes funnel through one channel into a
//! single consumer that concatenates the text and ANDs the success flags.
//!
//! A fetch failure is never fatal. The broken checkout is deleted so that a
//! later clone can repair it, and the failure is reported as recovered.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use crate::runner::{CommandOutput, CommandRunner};
use crate::types::JobRequest;

/// Aggregate of every sync sub-result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub text: String,
    pub success: bool,
}

impl Default for SyncOutcome {
    fn default() -> Self {
        SyncOutcome {
            text: String::new(),
            success: true,
        }
    }
}

impl SyncOutcome {
    fn fold(&mut self, item: CommandOutput) {
        self.text.push_str(&item.text);
        self.success &= item.success;
    }
}

impl From<SyncOutcome> for CommandOutput {
    fn from(outcome: SyncOutcome) -> Self {
        CommandOutput::new(outcome.text, outcome.success)
    }
}

/// Synchronizes the job's cache root.
#[instrument(skip_all, fields(repo = %job.repo))]
pub async fn sync(
    runner: &CommandRunner,
    job: &JobRequest,
    clone_depth: Option<u32>,
) -> CommandOutput {
    let (tx, mut rx) = mpsc::channel(1);
    let producer = tokio::spawn(sync_parallel(
        runner.clone(),
        Arc::new(job.clone()),
        clone_depth,
        tx,
    ));

    let mut outcome = SyncOutcome::default();
    while let Some(item) = rx.recv().await {
        outcome.fold(item);
    }
    if let Err(err) = producer.await {
        outcome.fold(CommandOutput::failure(err));
    }
    debug!(success = outcome.success, "sync done");
    outcome.into()
}

async fn sync_parallel(
    runner: CommandRunner,
    job: Arc<JobRequest>,
    clone_depth: Option<u32>,
    tx: mpsc::Sender<CommandOutput>,
) {
    // git clone races with the walk below if the parent is missing.
    if let Err(err) = ensure_parent(&job.checkout_dir()).await {
        let _ = tx.send(CommandOutput::failure(err)).await;
        return;
    }

    let mut tasks = JoinSet::new();
    {
        let (runner, job, tx) = (runner.clone(), job.clone(), tx.clone());
        tasks.spawn(async move { clone_or_fetch(&runner, &job, clone_depth, &tx).await });
    }

    let cache_root = job.cache_root();
    let primary = job.checkout_dir();
    let walked =
        tokio::task::spawn_blocking(move || find_checkouts(&cache_root, &primary)).await;
    let (checkouts, walk_errors) = match walked {
        Ok(found) => found,
        Err(err) => (Vec::new(), vec![err.to_string()]),
    };
    for dir in checkouts {
        let (runner, job, tx) = (runner.clone(), job.clone(), tx.clone());
        tasks.spawn(async move {
            let out = fetch_secondary(&runner, &job, &dir).await;
            let _ = tx.send(out).await;
        });
    }

    // A stale binary from a previous run must not mask a failed install.
    let _ = tx.send(remove_bin(&job.bin_dir()).await).await;

    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined {
            let _ = tx.send(CommandOutput::failure(err)).await;
        }
    }
    for err in walk_errors {
        let _ = tx
            .send(CommandOutput::new(
                format!("<directory walking failure>\n{err}\n"),
                false,
            ))
            .await;
    }
}

/// Clones the primary repository if missing, then fetches it.
async fn clone_or_fetch(
    runner: &CommandRunner,
    job: &JobRequest,
    clone_depth: Option<u32>,
    tx: &mpsc::Sender<CommandOutput>,
) {
    match tokio::fs::metadata(job.checkout_dir()).await {
        Ok(_) => {}
        Err(err) if err.kind() != std::io::ErrorKind::NotFound => {
            let _ = tx.send(CommandOutput::failure(err)).await;
            return;
        }
        Err(_) => {
            let out = clone_primary(runner, job, clone_depth).await;
            let cloned = out.success;
            let _ = tx.send(out).await;
            // A fresh clone is current; only a pull request ref needs fetching.
            if job.pull.is_none() || !cloned {
                return;
            }
        }
    }

    let out = fetch_primary(runner, job).await;
    let out = if out.success {
        out
    } else {
        recover(out, &job.checkout_dir()).await
    };
    let _ = tx.send(out).await;
}

/// Clones the primary repository into its checkout directory.
pub(crate) async fn clone_primary(
    runner: &CommandRunner,
    job: &JobRequest,
    clone_depth: Option<u32>,
) -> CommandOutput {
    let checkout = job.checkout_rel();
    let parent = checkout.parent().unwrap_or(Path::new(""));
    let target = checkout
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| job.repo.repo.clone());

    let mut argv = vec!["git".to_string(), "clone".to_string(), "--quiet".to_string()];
    if let Some(depth) = clone_depth {
        argv.push(format!("--depth={depth}"));
    }
    argv.push(job.clone_url());
    argv.push(target);
    runner.run(parent, &[], &argv, false).await
}

/// Fetches the primary repository, including the pull request ref if any.
pub(crate) async fn fetch_primary(runner: &CommandRunner, job: &JobRequest) -> CommandOutput {
    let mut argv: Vec<String> = ["git", "fetch", "--prune", "--quiet", "origin"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    if let Some(pull) = job.pull {
        argv.push(pull.head_ref());
    }
    runner.run(&job.checkout_rel(), &[], &argv, false).await
}

/// Fetches a dependency checkout and moves its working tree to the remote
/// default branch.
async fn fetch_secondary(runner: &CommandRunner, job: &JobRequest, dir: &Path) -> CommandOutput {
    let relwd = dir.strip_prefix(job.root()).unwrap_or(dir);
    let commands: [&[&str]; 2] = [
        &["git", "fetch", "--quiet", "--prune", "--all"],
        &["git", "reset", "--quiet", "--hard", "origin/HEAD"],
    ];
    let mut out = CommandOutput::new(String::new(), true);
    for argv in commands {
        let argv: Vec<String> = argv.iter().map(|s| s.to_string()).collect();
        out.append(runner.run(relwd, &[], &argv, false).await);
        if !out.success {
            return recover(out, dir).await;
        }
    }
    out
}

/// Deletes a checkout whose fetch failed so the next clone starts clean.
async fn recover(mut out: CommandOutput, dir: &Path) -> CommandOutput {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {
            warn!(dir = %dir.display(), "deleted checkout after failed fetch");
            out.text
                .push_str(&format!("<recovered failure>\nrm -rf {}\n", dir.display()));
            out.success = true;
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            out.success = true;
        }
        Err(err) => {
            out.text.push_str(&format!("<failure>\n{err}\n"));
            out.success = false;
        }
    }
    out
}

async fn remove_bin(bin: &Path) -> CommandOutput {
    match tokio::fs::remove_dir_all(bin).await {
        Ok(()) => CommandOutput::new("Removed $CI_WORKSPACE/bin\n", true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            CommandOutput::new("Removed $CI_WORKSPACE/bin\n", true)
        }
        Err(err) => CommandOutput::new(format!("Removed $CI_WORKSPACE/bin: {err}\n"), false),
    }
}

async fn ensure_parent(checkout: &Path) -> std::io::Result<()> {
    match checkout.parent() {
        Some(parent) => tokio::fs::create_dir_all(parent).await,
        None => Ok(()),
    }
}

/// Finds every git checkout under `cache_root` except `primary`.
fn find_checkouts(cache_root: &Path, primary: &Path) -> (Vec<PathBuf>, Vec<String>) {
    let mut found = Vec::new();
    let mut errors = Vec::new();
    let mut walker = WalkDir::new(cache_root).into_iter();
    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                errors.push(err.to_string());
                continue;
            }
        };
        let is_dir = entry.file_type().is_dir();
        if entry.path() == primary {
            if is_dir {
                walker.skip_current_dir();
            }
            continue;
        }
        if entry.file_name() == ".git" {
            if let Some(parent) = entry.path().parent() {
                found.push(parent.to_path_buf());
            }
            if is_dir {
                walker.skip_current_dir();
            }
        }
    }
    (found, errors)
}
