//! The `setup-0-metadata` note describing the worker a job runs on.

use tokio::process::Command;

use crate::runner::normalize_utf8;
use crate::types::JobRequest;

pub const METADATA_STEP: &str = "setup-0-metadata";

/// Describes the host and the job's workspace.
pub async fn metadata(job: &JobRequest) -> String {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let mut out = format!(
        "Commit:  {}\nCPUs:    {}\nVersion: {} {}\nRoot:    {}\nPATH:    {}\n",
        job.commit,
        cpus,
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        job.root().display(),
        job.search_path().to_string_lossy(),
    );
    if cfg!(unix)
        && let Ok(uname) = Command::new("uname").arg("-a").output().await
        && uname.status.success()
    {
        out.push_str(&format!(
            "uname:   {}\n",
            normalize_utf8(&uname.stdout).trim()
        ));
    }
    out
}
