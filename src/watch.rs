//! Exit-on-change watcher.
//!
//! The worker never reloads anything in place: when its config file or its
//! own executable changes, it drains its queue and exits so the supervisor
//! starts the new version with the new config.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info};

/// How often [`watch_files`] looks at the files in production.
pub const POLL_PERIOD: Duration = Duration::from_secs(2);

/// Waits until one of `paths` is modified, replaced or deleted.
///
/// Returns the path that changed. Fails if a path cannot be examined at the
/// start.
pub async fn watch_files(paths: &[PathBuf], period: Duration) -> io::Result<PathBuf> {
    let mut seen = Vec::with_capacity(paths.len());
    for path in paths {
        seen.push((path.clone(), modified(path).await?));
    }
    debug!(files = ?paths, "watching for changes");

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        for (path, mtime) in &seen {
            // A file that vanished counts as changed.
            let now = modified(path).await.ok();
            if now != Some(*mtime) {
                info!(path = %path.display(), "file changed");
                return Ok(path.clone());
            }
        }
    }
}

async fn modified(path: &Path) -> io::Result<SystemTime> {
    tokio::fs::metadata(path).await?.modified()
}
