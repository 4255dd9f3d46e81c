//! On-disk side of a job: sync, checkout, commit resolution and metadata.
//!
//! [`Workspace`] is the production [`JobExecutor`]; [`WorkspaceProvisioner`]
//! builds one per queued job from the worker's settings.

mod checkout;
mod metadata;
mod remote;
mod sync;

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{CheckPlan, WorkerConfig, resolve_checks};
use crate::pipeline::JobExecutor;
use crate::runner::{CommandOutput, CommandRunner};
use crate::types::{Check, JobRequest, Sha};
use crate::worker::{EnqueueRequest, JobProvisioner};

pub use checkout::{CI_BRANCH, CI_TRACKING_BRANCH, checkout};
pub use metadata::{METADATA_STEP, metadata};
pub use remote::{find_ref, resolve_commit};
pub use sync::{SyncOutcome, sync};

/// Worker-wide settings every job's workspace is derived from.
#[derive(Debug, Clone)]
pub struct WorkspaceSettings {
    /// Directory holding one workspace root per repository.
    pub work_dir: PathBuf,
    pub worker_name: String,
    pub default_checks: Vec<Check>,
    pub setup_commands: Vec<Vec<String>>,
    pub workspace_vars: Vec<String>,
    pub clone_depth: Option<u32>,
}

impl WorkspaceSettings {
    pub fn from_config(config: &WorkerConfig, work_dir: PathBuf) -> Self {
        WorkspaceSettings {
            work_dir,
            worker_name: config.name.clone(),
            default_checks: config.default_checks.clone(),
            setup_commands: config.setup_commands.clone(),
            workspace_vars: config.workspace_vars.clone(),
            clone_depth: config.clone_depth,
        }
    }
}

/// Runs a job's phases against its workspace on disk.
#[derive(Debug)]
pub struct Workspace {
    job: JobRequest,
    runner: CommandRunner,
    settings: Arc<WorkspaceSettings>,
}

impl Workspace {
    pub fn new(job: JobRequest, settings: Arc<WorkspaceSettings>) -> Self {
        let runner = CommandRunner::new(&job);
        Workspace {
            job,
            runner,
            settings,
        }
    }

    pub fn job(&self) -> &JobRequest {
        &self.job
    }
}

impl JobExecutor for Workspace {
    async fn sync(&self) -> CommandOutput {
        sync(&self.runner, &self.job, self.settings.clone_depth).await
    }

    async fn checkout(&self) -> CommandOutput {
        checkout(
            &self.runner,
            &self.job,
            self.settings.clone_depth,
            &self.settings.setup_commands,
        )
        .await
    }

    async fn resolve_checks(&self) -> CheckPlan {
        resolve_checks(
            &self.job.checkout_dir(),
            &self.settings.worker_name,
            &self.settings.default_checks,
        )
    }

    async fn run_check(&self, check: &Check) -> CommandOutput {
        let mut relwd = self.job.checkout_rel();
        if !check.dir.is_empty() {
            relwd.push(check.dir.trim_start_matches('/'));
        }
        self.runner.run(&relwd, &check.env, &check.command, true).await
    }
}

/// Builds [`Workspace`] executors for queued jobs.
#[derive(Debug, Clone)]
pub struct WorkspaceProvisioner {
    settings: Arc<WorkspaceSettings>,
}

impl WorkspaceProvisioner {
    pub fn new(settings: WorkspaceSettings) -> Self {
        WorkspaceProvisioner {
            settings: Arc::new(settings),
        }
    }
}

impl JobProvisioner for WorkspaceProvisioner {
    type Executor = Workspace;

    fn job(&self, request: &EnqueueRequest) -> JobRequest {
        JobRequest::new(
            request.repo.clone(),
            request.commit.clone(),
            &self.settings.work_dir,
        )
        .with_alt_path(request.alt_path.clone())
        .with_pull(request.pull)
        .with_ssh(request.use_ssh)
        .with_workspace_vars(&self.settings.workspace_vars)
    }

    async fn resolve_commit(&self, job: &JobRequest) -> Option<Sha> {
        resolve_commit(&CommandRunner::new(job), job).await
    }

    async fn metadata(&self, job: &JobRequest) -> String {
        metadata(job).await
    }

    fn executor(&self, job: JobRequest) -> Workspace {
        Workspace::new(job, self.settings.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::path::Path;
    use std::process::Command;

    use crate::types::{PrNumber, RepoId};

    fn git(dir: &Path, args: &[&str]) -> String {
        let out = Command::new("git")
            .args(["-c", "user.name=ci", "-c", "user.email=ci@example.com"])
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(out.status.success(), "git {args:?}: {out:?}");
        String::from_utf8(out.stdout).unwrap().trim().to_string()
    }

    /// A workspace whose primary checkout is a clone of a local origin, so no
    /// network is needed.
    fn local_workspace(tmp: &Path) -> (Workspace, String) {
        let origin = tmp.join("origin");
        std::fs::create_dir_all(&origin).unwrap();
        git(&origin, &["init", "--quiet"]);
        git(&origin, &["commit", "--quiet", "--allow-empty", "-m", "first"]);
        std::fs::create_dir_all(origin.join("sub")).unwrap();
        std::fs::write(origin.join("sub/file.txt"), "content\n").unwrap();
        git(&origin, &["add", "."]);
        git(&origin, &["commit", "--quiet", "-m", "second"]);
        let head = git(&origin, &["rev-parse", "HEAD"]);

        let settings = WorkspaceSettings {
            work_dir: tmp.join("work"),
            worker_name: "tester".to_string(),
            default_checks: vec![Check::new(["true"])],
            setup_commands: Vec::new(),
            workspace_vars: Vec::new(),
            clone_depth: None,
        };
        let provisioner = WorkspaceProvisioner::new(settings);
        let request = EnqueueRequest::new(RepoId::new("octo", "cat"), Sha::new(head.clone()));
        let job = provisioner.job(&request);

        let checkout = job.checkout_dir();
        std::fs::create_dir_all(checkout.parent().unwrap()).unwrap();
        git(
            tmp,
            &["clone", "--quiet", origin.to_str().unwrap(), checkout.to_str().unwrap()],
        );
        (provisioner.executor(job), head)
    }

    #[tokio::test]
    async fn sync_fetches_primary_and_recovers_broken_secondary() {
        let tmp = tempfile::tempdir().unwrap();
        let (workspace, _) = local_workspace(tmp.path());
        let broken = workspace.job().cache_root().join("example.org/broken");
        std::fs::create_dir_all(broken.join(".git")).unwrap();
        std::fs::create_dir_all(workspace.job().bin_dir()).unwrap();

        let out = workspace.sync().await;

        assert!(out.success, "{}", out.text);
        assert!(out.text.contains("git fetch --prune --quiet origin"));
        assert!(out.text.contains("<recovered failure>\nrm -rf "));
        assert!(out.text.contains("Removed $CI_WORKSPACE/bin\n"));
        assert!(!broken.exists());
        assert!(!workspace.job().bin_dir().exists());
    }

    /// Rebuilds `workspace` so that clones of `https://github.com/octo/cat`
    /// are served from the local `origin`.
    fn redirected(workspace: Workspace, origin: &Path, pull: Option<PrNumber>) -> Workspace {
        let path = std::env::var_os("PATH").unwrap_or_default();
        let env: Vec<(OsString, OsString)> = vec![
            ("PATH".into(), path),
            ("GIT_CONFIG_COUNT".into(), "1".into()),
            (
                "GIT_CONFIG_KEY_0".into(),
                format!("url.{}.insteadOf", origin.display()).into(),
            ),
            ("GIT_CONFIG_VALUE_0".into(), "https://github.com/octo/cat".into()),
        ];
        let job = workspace.job.with_pull(pull).with_inherited_env(env);
        Workspace::new(job, workspace.settings)
    }

    /// Replaces the primary checkout's `.git` with one git cannot open.
    fn break_primary(workspace: &Workspace) {
        let checkout = workspace.job().checkout_dir();
        std::fs::remove_dir_all(checkout.join(".git")).unwrap();
        std::fs::write(checkout.join(".git"), "gitdir: /nonexistent/ci-broken\n").unwrap();
    }

    #[tokio::test]
    async fn sync_moves_secondary_to_upstream_head() {
        let tmp = tempfile::tempdir().unwrap();
        let (workspace, _) = local_workspace(tmp.path());

        let upstream = tmp.path().join("upstream");
        std::fs::create_dir_all(&upstream).unwrap();
        git(&upstream, &["init", "--quiet"]);
        git(&upstream, &["commit", "--quiet", "--allow-empty", "-m", "v1"]);
        let dep = workspace.job().cache_root().join("example.org/dep");
        std::fs::create_dir_all(dep.parent().unwrap()).unwrap();
        git(
            tmp.path(),
            &["clone", "--quiet", upstream.to_str().unwrap(), dep.to_str().unwrap()],
        );
        git(&upstream, &["commit", "--quiet", "--allow-empty", "-m", "v2"]);
        let latest = git(&upstream, &["rev-parse", "HEAD"]);

        let out = workspace.sync().await;

        assert!(out.success, "{}", out.text);
        assert!(out.text.contains("git fetch --quiet --prune --all"));
        assert!(out.text.contains("git reset --quiet --hard origin/HEAD"));
        assert_eq!(git(&dep, &["rev-parse", "HEAD"]), latest);
    }

    #[tokio::test]
    async fn broken_primary_is_recovered_then_recloned() {
        let tmp = tempfile::tempdir().unwrap();
        let (workspace, head) = local_workspace(tmp.path());
        let workspace = redirected(workspace, &tmp.path().join("origin"), None);
        break_primary(&workspace);
        let checkout = workspace.job().checkout_dir();

        let out = workspace.sync().await;
        assert!(out.success, "{}", out.text);
        assert!(out.text.contains("<recovered failure>\nrm -rf "));
        assert!(!checkout.exists());

        let out = workspace.checkout().await;
        assert!(out.success, "{}", out.text);
        assert!(out.text.contains("git clone --quiet https://github.com/octo/cat cat"));
        assert!(!out.text.contains("git fetch"));
        assert_eq!(git(&checkout, &["rev-parse", "--abbrev-ref", "HEAD"]), "_ci2");
        assert_eq!(git(&checkout, &["rev-parse", "HEAD"]), head);
    }

    #[tokio::test]
    async fn recloned_pull_request_fetches_its_head() {
        let tmp = tempfile::tempdir().unwrap();
        let origin = tmp.path().join("origin");
        let (mut workspace, _) = local_workspace(tmp.path());

        // A pull request head reachable only through refs/pull/7/head.
        git(&origin, &["checkout", "--quiet", "-b", "feature"]);
        git(&origin, &["commit", "--quiet", "--allow-empty", "-m", "feature"]);
        let pr_head = git(&origin, &["rev-parse", "HEAD"]);
        git(&origin, &["update-ref", "refs/pull/7/head", "HEAD"]);
        git(&origin, &["checkout", "--quiet", "-"]);
        git(&origin, &["branch", "--quiet", "-D", "feature"]);

        workspace.job.commit = Sha::new(pr_head.clone());
        let workspace = redirected(workspace, &origin, Some(PrNumber(7)));
        break_primary(&workspace);
        let checkout = workspace.job().checkout_dir();

        let out = workspace.sync().await;
        assert!(out.success, "{}", out.text);
        assert!(!checkout.exists());

        let out = workspace.checkout().await;
        assert!(out.success, "{}", out.text);
        assert!(out.text.contains("git clone --quiet https://github.com/octo/cat cat"));
        assert!(out.text.contains("git fetch --prune --quiet origin pull/7/head"));
        assert_eq!(git(&checkout, &["rev-parse", "HEAD"]), pr_head);
    }

    #[tokio::test]
    async fn unreadable_checkout_path_fails_without_cloning() {
        let tmp = tempfile::tempdir().unwrap();
        let (workspace, _) = local_workspace(tmp.path());
        // The checkout's parent is a regular file, so its existence cannot be
        // determined.
        let owner = workspace.job().cache_root().join("github.com/octo");
        std::fs::remove_dir_all(&owner).unwrap();
        std::fs::write(&owner, "").unwrap();

        let out = workspace.checkout().await;
        assert!(!out.success);
        assert!(out.text.starts_with("<failure>\n"), "{}", out.text);
        assert!(!out.text.contains("git clone"));
    }

    #[tokio::test]
    async fn checkout_lands_on_ci_branch_at_commit() {
        let tmp = tempfile::tempdir().unwrap();
        let (workspace, head) = local_workspace(tmp.path());

        let out = workspace.checkout().await;
        assert!(out.success, "{}", out.text);
        assert!(out.text.contains(&format!("git checkout --quiet -B _ci {head}")));

        let checkout = workspace.job().checkout_dir();
        assert_eq!(git(&checkout, &["rev-parse", "--abbrev-ref", "HEAD"]), "_ci2");
        assert_eq!(git(&checkout, &["rev-parse", "HEAD"]), head);
    }

    #[tokio::test]
    async fn checkout_fails_on_unknown_commit() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut workspace, _) = local_workspace(tmp.path());
        workspace.job.commit = Sha::new("0000000000000000000000000000000000000000");

        let out = workspace.checkout().await;
        assert!(!out.success);
        assert!(!out.text.contains("_ci2"));
    }

    #[tokio::test]
    async fn checks_run_from_checkout_or_subdirectory() {
        let tmp = tempfile::tempdir().unwrap();
        let (workspace, _) = local_workspace(tmp.path());

        let plan = workspace.resolve_checks().await;
        assert_eq!(plan.checks, vec![Check::new(["true"])]);

        let out = workspace
            .run_check(&Check::new(["cat", "file.txt"]).with_dir("sub"))
            .await;
        assert!(out.success, "{}", out.text);
        assert!(
            out.text
                .starts_with("$CI_WORKSPACE/src/github.com/octo/cat/sub $ cat file.txt  (exit:0")
        );
        assert!(out.text.ends_with("content\n"));

        let out = workspace
            .run_check(&Check::new(["sh", "-c", "exit 2"]).with_env("A=1"))
            .await;
        assert!(!out.success);
        assert!(out.text.contains("$ A=1 sh -c exit 2  (exit:2"));
    }
}
