//! One verification run: which repository, which commit, and where it lives
//! on disk.
//!
//! Each job owns a private workspace root derived from `org_repo` under the
//! worker's working directory:
//!
//! ```text
//! <work_dir>/<org>_<repo>/
//!   bin/                      job-local binaries, first in PATH
//!   src/                      cache root, may hold dependency checkouts
//!     github.com/<org>/<repo> primary checkout (or the alternate path)
//! ```

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};

use super::ids::{PrNumber, RepoId, Sha};

/// Variable pointing at the job's workspace root in every command's environment.
pub const WORKSPACE_VAR: &str = "CI_WORKSPACE";

/// The details to run a verification job.
///
/// Immutable once queued; only the commit may be filled in before that, when
/// a trigger named a pull request without its head commit.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub repo: RepoId,
    /// Alternative checkout path below the cache root, `/`-separated.
    pub alt_path: Option<String>,
    pub commit: Sha,
    pub use_ssh: bool,
    pub pull: Option<PrNumber>,

    root: PathBuf,
    workspace_vars: Vec<String>,
    inherited: Vec<(OsString, OsString)>,
}

impl JobRequest {
    /// Creates a job for `repo` rooted under `work_dir`, inheriting the
    /// process environment.
    pub fn new(repo: RepoId, commit: Sha, work_dir: &Path) -> Self {
        // GitHub organization names cannot contain an underscore.
        let root = work_dir.join(format!("{}_{}", repo.owner, repo.repo));
        JobRequest {
            repo,
            alt_path: None,
            commit,
            use_ssh: false,
            pull: None,
            root,
            workspace_vars: Vec::new(),
            inherited: std::env::vars_os().collect(),
        }
    }

    pub fn with_alt_path(mut self, alt_path: Option<String>) -> Self {
        self.alt_path = alt_path.filter(|p| !p.is_empty());
        self
    }

    pub fn with_pull(mut self, pull: Option<PrNumber>) -> Self {
        self.pull = pull.filter(|p| p.0 != 0);
        self
    }

    pub fn with_ssh(mut self, use_ssh: bool) -> Self {
        self.use_ssh = use_ssh;
        self
    }

    /// Extra variable names that are pointed at the workspace root.
    pub fn with_workspace_vars(mut self, vars: &[String]) -> Self {
        self.workspace_vars = vars.to_vec();
        self
    }

    /// Replaces the inherited environment; used to build deterministic jobs.
    pub fn with_inherited_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        self.inherited = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    /// Private workspace root of this job.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the primary checkout and any dependency checkouts.
    pub fn cache_root(&self) -> PathBuf {
        self.root.join("src")
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.root.join("bin")
    }

    /// Checkout path relative to the cache root.
    pub fn repo_path(&self) -> PathBuf {
        match &self.alt_path {
            Some(alt) => alt.split('/').filter(|c| !c.is_empty()).collect(),
            None => ["github.com", &self.repo.owner, &self.repo.repo]
                .iter()
                .collect(),
        }
    }

    /// Checkout path relative to the workspace root.
    pub fn checkout_rel(&self) -> PathBuf {
        Path::new("src").join(self.repo_path())
    }

    pub fn checkout_dir(&self) -> PathBuf {
        self.root.join(self.checkout_rel())
    }

    pub fn clone_url(&self) -> String {
        self.repo.clone_url(self.use_ssh)
    }

    /// Binary search path for checks: the job's `bin/` first, then the
    /// inherited PATH.
    pub fn search_path(&self) -> OsString {
        let inherited = self.inherited_var("PATH").unwrap_or_default();
        let dirs = std::iter::once(self.bin_dir()).chain(std::env::split_paths(&inherited));
        std::env::join_paths(dirs).unwrap_or_else(|_| self.bin_dir().into_os_string())
    }

    /// Search path the worker itself was started with.
    pub fn inherited_search_path(&self) -> OsString {
        self.inherited_var("PATH").unwrap_or_default()
    }

    /// Base environment for every command of this job.
    ///
    /// The inherited environment minus PATH and the workspace variables, with
    /// job-local values injected instead.
    pub fn environment(&self) -> Vec<(OsString, OsString)> {
        let is_replaced = |key: &OsStr| {
            key == "PATH"
                || key == WORKSPACE_VAR
                || key == "GIT_SHA"
                || key == "GIT_TERMINAL_PROMPT"
                || self.workspace_vars.iter().any(|v| key == v.as_str())
        };
        let mut env: Vec<(OsString, OsString)> = self
            .inherited
            .iter()
            .filter(|(k, _)| !is_replaced(k))
            .cloned()
            .collect();
        env.push((WORKSPACE_VAR.into(), self.root.clone().into_os_string()));
        for var in &self.workspace_vars {
            env.push((var.into(), self.root.clone().into_os_string()));
        }
        env.push(("PATH".into(), self.search_path()));
        env.push(("GIT_TERMINAL_PROMPT".into(), "0".into()));
        if !self.commit.is_empty() {
            env.push(("GIT_SHA".into(), self.commit.as_str().into()));
        }
        env
    }

    fn inherited_var(&self, key: &str) -> Option<OsString> {
        self.inherited
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }
}

impl fmt::Display for JobRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pull {
            Some(pr) => write!(
                f,
                "https://github.com/{}/pull/{} at {}",
                self.repo,
                pr.0,
                self.repo.commit_url(&self.commit)
            ),
            None => write!(f, "{}", self.repo.commit_url(&self.commit)),
        }
    }
}
