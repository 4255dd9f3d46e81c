//! Command Runner: launches one process for a job and renders its transcript.
//!
//! Every command runs with the job's base environment plus an optional
//! `KEY=VALUE` overlay, from a directory relative to the job's workspace root.
//! Stdout and stderr are merged in arrival order and decoded leniently; the
//! rendered text always starts with a header naming the directory, the command
//! line, the exit code and the duration:
//!
//! ```text
//! $CI_WORKSPACE/src/github.com/octo/cat $ make test  (exit:0 in 2.031s)
//! ...output...
//! ```
//!
//! Program lookup uses an explicit search path (the job's `bin/` first when
//! requested) resolved before spawning, so concurrent runs never race on the
//! process-wide PATH.

pub mod format;

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::debug;

use crate::types::{JobRequest, WORKSPACE_VAR};

pub use format::{format_duration, normalize_utf8, round_duration};

/// Text and success flag produced by a command or a whole phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub text: String,
    pub success: bool,
}

impl CommandOutput {
    pub fn new(text: impl Into<String>, success: bool) -> Self {
        CommandOutput {
            text: text.into(),
            success,
        }
    }

    /// A failure caused before or around a command, rendered like one.
    pub fn failure(err: impl std::fmt::Display) -> Self {
        CommandOutput::new(format!("<failure>\n{err}\n"), false)
    }

    /// Appends another output, keeping the conjunction of both flags.
    pub fn append(&mut self, other: CommandOutput) {
        self.text.push_str(&other.text);
        self.success &= other.success;
    }
}

/// Why a command could not produce an exit status.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("empty command line")]
    EmptyCommand,

    #[error("exec: {0:?}: executable file not found in $PATH")]
    NotFound(String),

    #[error("{program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Runs commands on behalf of one job.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    root: PathBuf,
    job_path: OsString,
    process_path: OsString,
    env: Vec<(OsString, OsString)>,
}

impl CommandRunner {
    pub fn new(job: &JobRequest) -> Self {
        CommandRunner {
            root: job.root().to_path_buf(),
            job_path: job.search_path(),
            process_path: job.inherited_search_path(),
            env: job.environment(),
        }
    }

    /// Runs `argv` from `relwd` (relative to the workspace root).
    ///
    /// `overlay` entries are `KEY=VALUE` and replace inherited variables of the
    /// same name. With `use_job_path` the program is looked up in the job's
    /// search path, otherwise in the path the worker was started with.
    pub async fn run(
        &self,
        relwd: &Path,
        overlay: &[String],
        argv: &[String],
        use_job_path: bool,
    ) -> CommandOutput {
        let cmdline = overlay
            .iter()
            .chain(argv.iter())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ");
        debug!(relwd = %relwd.display(), %cmdline, "running command");

        let env = overlay_env(&self.env, overlay);
        let start = Instant::now();
        let (exit, success, out) = match self.execute(relwd, &env, argv, use_job_path).await {
            Ok((code, out)) => {
                let success = code == 0;
                if !success && out.is_empty() {
                    let err = format!("exit status {code}");
                    (code, false, format!("<failure>\n{err}\n").into_bytes())
                } else {
                    (code, success, out)
                }
            }
            Err(err) => (-1, false, format!("<failure>\n{err}\n").into_bytes()),
        };
        let elapsed = round_duration(start.elapsed());

        let mut shown_dir = PathBuf::from(format!("${WORKSPACE_VAR}"));
        if !relwd.as_os_str().is_empty() {
            shown_dir.push(relwd);
        }
        let text = format!(
            "{} $ {}  (exit:{} in {})\n{}",
            shown_dir.display(),
            cmdline,
            exit,
            format_duration(elapsed),
            normalize_utf8(&out)
        );
        CommandOutput { text, success }
    }

    async fn execute(
        &self,
        relwd: &Path,
        env: &[(OsString, OsString)],
        argv: &[String],
        use_job_path: bool,
    ) -> Result<(i32, Vec<u8>), RunnerError> {
        let (program, args) = argv.split_first().ok_or(RunnerError::EmptyCommand)?;
        let program = expand_vars(program, env).to_string_lossy().into_owned();
        let search_path = if use_job_path {
            &self.job_path
        } else {
            &self.process_path
        };
        let resolved = resolve_program(&program, search_path)
            .ok_or_else(|| RunnerError::NotFound(program.clone()))?;
        let args: Vec<OsString> = args.iter().map(|a| expand_vars(a, env)).collect();

        let mut child = Command::new(&resolved)
            .args(&args)
            .current_dir(self.root.join(relwd))
            .env_clear()
            .envs(env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| RunnerError::Spawn {
                program: program.clone(),
                source,
            })?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump(stderr, tx.clone()));
        }
        drop(tx);

        let mut out = Vec::new();
        while let Some(chunk) = rx.recv().await {
            out.extend_from_slice(&chunk);
        }

        let status = child.wait().await.map_err(|source| RunnerError::Wait {
            program: program.clone(),
            source,
        })?;
        Ok((status.code().unwrap_or(-1), out))
    }
}

/// Forwards everything read from `reader` as chunks, in arrival order.
async fn pump<R>(mut reader: R, tx: mpsc::UnboundedSender<Vec<u8>>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
        }
    }
}

/// Applies `KEY=VALUE` overlays on top of `base`, replacing existing keys.
fn overlay_env(base: &[(OsString, OsString)], overlay: &[String]) -> Vec<(OsString, OsString)> {
    let mut env = base.to_vec();
    for entry in overlay {
        let (key, value) = entry.split_once('=').unwrap_or((entry.as_str(), ""));
        env.retain(|(k, _)| k != key);
        env.push((key.into(), value.into()));
    }
    env
}

/// Finds the executable for `program`.
///
/// Names containing a path separator are used as is; bare names are looked up
/// in `search_path` in order.
pub fn resolve_program(program: &str, search_path: &OsStr) -> Option<PathBuf> {
    if program.contains(std::path::MAIN_SEPARATOR) {
        return Some(PathBuf::from(program));
    }
    std::env::split_paths(search_path)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Expands `$VAR` and `${VAR}` against `env`; unknown variables expand to
/// nothing.
pub fn expand_vars(arg: &str, env: &[(OsString, OsString)]) -> OsString {
    let lookup = |name: &str| {
        env.iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.to_string_lossy().into_owned())
            .unwrap_or_default()
    };

    let mut out = String::with_capacity(arg.len());
    let mut rest = arg;
    while let Some(idx) = rest.find('$') {
        out.push_str(&rest[..idx]);
        let after = &rest[idx + 1..];
        if let Some(braced) = after.strip_prefix('{')
            && let Some(end) = braced.find('}')
        {
            out.push_str(&lookup(&braced[..end]));
            rest = &braced[end + 1..];
            continue;
        }
        let len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after.len());
        if len == 0 {
            out.push('$');
        } else {
            out.push_str(&lookup(&after[..len]));
        }
        rest = &after[len..];
    }
    out.push_str(rest);
    out.into()
}
