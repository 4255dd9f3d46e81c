//! Operator-side worker configuration.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{TryRngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::types::Check;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_DEBOUNCE_MILLIS: u64 = 1000;

/// Configuration of one worker process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// TCP port of the webhook server.
    pub port: u16,

    /// Shared secret configured on the GitHub webhook.
    pub webhook_secret: String,

    /// Token with `repo:status` and `gist` scopes.
    pub oauth2_access_token: String,

    /// Display name; used as the status context and to pick checks in `.ci.yml`.
    pub name: String,

    /// Checks run when a repository has no `.ci.yml` entry for this worker.
    pub default_checks: Vec<Check>,

    /// Commands run in the checkout after the commit is checked out, typically
    /// to pull dependencies.
    pub setup_commands: Vec<Vec<String>>,

    /// Environment variables pointed at the job's workspace root.
    pub workspace_vars: Vec<String>,

    /// Shallow-clone depth for the primary repository.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clone_depth: Option<u32>,

    /// Debounce window for status and note updates.
    pub debounce_millis: u64,

    /// Open an issue assigned to the blame list when a build fails.
    pub create_issues: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            port: DEFAULT_PORT,
            webhook_secret: String::new(),
            oauth2_access_token: String::new(),
            name: String::new(),
            default_checks: vec![Check::new(["make", "test"])],
            setup_commands: Vec::new(),
            workspace_vars: Vec::new(),
            clone_depth: None,
            debounce_millis: DEFAULT_DEBOUNCE_MILLIS,
            create_issues: false,
        }
    }
}

impl WorkerConfig {
    /// Loads the config at `path`.
    ///
    /// When the file is missing, or lacks a name or a webhook secret, the
    /// missing values are generated, the file is (re)written and
    /// [`ConfigError::WroteTemplate`] is returned so the operator can review it.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut config = WorkerConfig::default();
                config.fill_missing()?;
                config.save(path)?;
                return Err(ConfigError::WroteTemplate(path.to_path_buf()));
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let mut config: WorkerConfig =
            serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        if config.name.is_empty() || config.webhook_secret.is_empty() {
            config.fill_missing()?;
            config.save(path)?;
            return Err(ConfigError::WroteTemplate(path.to_path_buf()));
        }
        Ok(config)
    }

    /// Writes the config as YAML, readable by the owner only.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = serde_yaml::to_string(self).map_err(ConfigError::Serialize)?;
        let write_err = |source: std::io::Error| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path).map_err(write_err)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))
                .map_err(write_err)?;
        }
        file.write_all(text.as_bytes()).map_err(write_err)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_millis)
    }

    fn fill_missing(&mut self) -> Result<(), ConfigError> {
        if self.webhook_secret.is_empty() {
            let mut bytes = [0u8; 32];
            OsRng
                .try_fill_bytes(&mut bytes)
                .map_err(|e| ConfigError::Random(e.to_string()))?;
            self.webhook_secret = URL_SAFE_NO_PAD.encode(bytes);
        }
        if self.name.is_empty() {
            self.name = host_name();
        }
        Ok(())
    }
}

fn host_name() -> String {
    ["/proc/sys/kernel/hostname", "/etc/hostname"]
        .iter()
        .filter_map(|p| std::fs::read_to_string(p).ok())
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
        .unwrap_or_else(|| "ci-worker".to_string())
}
