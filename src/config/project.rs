//! Repository-side check configuration, `.ci.yml`.
//!
//! ```yaml
//! version: 1
//! workers:
//!   - name: raspberrypi     # only for the worker with this name
//!     checks:
//!       - command: [make, test-arm]
//!   - checks:               # any other worker
//!       - command: [make, test]
//!         env: [VERBOSE=1]
//!         dir: sub
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::types::Check;

pub const PROJECT_CONFIG_FILE: &str = ".ci.yml";

/// Parsed `.ci.yml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub version: u32,
    #[serde(default)]
    pub workers: Vec<WorkerChecks>,
}

/// Checks for one worker, or for every worker when `name` is empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerChecks {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub checks: Vec<Check>,
}

impl ProjectConfig {
    /// Reads `.ci.yml` from `dir`, rejecting unknown versions.
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let path = dir.join(PROJECT_CONFIG_FILE);
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config: ProjectConfig =
            serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse { path, source })?;
        if config.version != 1 {
            return Err(ConfigError::UnsupportedVersion {
                found: config.version,
            });
        }
        Ok(config)
    }

    /// Checks for `worker`: its own entry first, then the unnamed entry.
    pub fn checks_for(&self, worker: &str) -> Option<(&WorkerChecks, bool)> {
        self.workers
            .iter()
            .find(|w| w.name == worker)
            .map(|w| (w, true))
            .or_else(|| {
                self.workers
                    .iter()
                    .find(|w| w.name.is_empty())
                    .map(|w| (w, false))
            })
    }
}

/// The checks a job will run and where they came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckPlan {
    pub checks: Vec<Check>,
    pub source: String,
}

impl CheckPlan {
    /// Human-readable plan: the source, then one indented command per line.
    pub fn describe(&self) -> String {
        let mut out = format!("{}\n", self.source);
        for check in &self.checks {
            out.push_str("  ");
            out.push_str(&check.display());
            if !check.dir.is_empty() {
                out.push_str(&format!("  (in {})", check.dir));
            }
            out.push('\n');
        }
        out
    }
}

/// Picks the checks for `worker` in `checkout`.
///
/// Order: the entry named after this worker, then the unnamed entry, then
/// `defaults`. A missing, unreadable or malformed `.ci.yml` counts as absent.
pub fn resolve_checks(checkout: &Path, worker: &str, defaults: &[Check]) -> CheckPlan {
    let fallback = |source: String| CheckPlan {
        checks: defaults.to_vec(),
        source,
    };
    let config = match ProjectConfig::load(checkout) {
        Ok(config) => config,
        Err(ConfigError::Read { .. }) => {
            return fallback(format!(
                "No {PROJECT_CONFIG_FILE} found; using the worker's default checks."
            ));
        }
        Err(err) => {
            tracing::warn!(error = %err, "ignoring {PROJECT_CONFIG_FILE}");
            return fallback(format!("{err}; using the worker's default checks."));
        }
    };

    match config.checks_for(worker) {
        Some((entry, true)) => CheckPlan {
            checks: entry.checks.clone(),
            source: format!("Using checks for \"{worker}\" from {PROJECT_CONFIG_FILE}."),
        },
        Some((entry, false)) => CheckPlan {
            checks: entry.checks.clone(),
            source: format!("Using default checks from {PROJECT_CONFIG_FILE}."),
        },
        None => fallback(format!(
            "No entry for \"{worker}\" in {PROJECT_CONFIG_FILE}; using the worker's default checks."
        )),
    }
}
