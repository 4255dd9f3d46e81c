//! Worker configuration and per-repository check lists.
//!
//! Two files are involved:
//! - the worker config (`ci-worker.yml` by default), owned by the operator;
//! - `.ci.yml` at the root of a tested repository, owned by its maintainers.

mod project;
mod worker;

use std::path::PathBuf;

use thiserror::Error;

pub use project::{CheckPlan, PROJECT_CONFIG_FILE, ProjectConfig, WorkerChecks, resolve_checks};
pub use worker::{DEFAULT_DEBOUNCE_MILLIS, DEFAULT_PORT, WorkerConfig};

/// Errors from loading or writing configuration files.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A fresh or completed config was written; the operator must review it.
    #[error("wrote new {}; edit it and restart", .0.display())]
    WroteTemplate(PathBuf),

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[source] serde_yaml::Error),

    #[error("unsupported {} version {found}, expected 1", PROJECT_CONFIG_FILE)]
    UnsupportedVersion { found: u32 },

    #[error("failed to generate webhook secret: {0}")]
    Random(String),
}
