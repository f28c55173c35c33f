//! Global configuration model for rootsmith tools.
//!
//! Stored on disk as JSON. Every field has a default, so a partial file
//! (or no file at all) is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{Result, RootsmithError};
use crate::types::RetryPolicy;

/// Root configuration for rootsmith tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RootsmithConfig {
    /// Directory under which relative chroot roots are created.
    pub work_dir: PathBuf,
    /// Minimum log level (`error`, `warn`, `info`, `debug`, `trace`).
    pub log_level: String,
    /// Optional file receiving a copy of all log output.
    pub log_file: Option<PathBuf>,
    /// Attempts per mount point when tearing a chroot down.
    pub unmount_attempts: u32,
    /// Pause between unmount attempts, in milliseconds.
    pub unmount_retry_delay_ms: u64,
    /// `PATH` exported inside chroots.
    pub chroot_path_env: String,
}

impl Default for RootsmithConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from(constants::DEFAULT_WORK_DIR),
            log_level: "info".into(),
            log_file: None,
            unmount_attempts: constants::DEFAULT_UNMOUNT_ATTEMPTS,
            unmount_retry_delay_ms: u64::try_from(
                constants::DEFAULT_UNMOUNT_RETRY_DELAY.as_millis(),
            )
            .unwrap_or(u64::MAX),
            chroot_path_env: constants::CHROOT_PATH_ENV.into(),
        }
    }
}

impl RootsmithConfig {
    /// Loads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON,
    /// or fails [`RootsmithConfig::validate`].
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| RootsmithError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for values no tool can work with.
    ///
    /// # Errors
    ///
    /// Returns [`RootsmithError::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.unmount_attempts == 0 {
            return Err(RootsmithError::Config {
                message: "unmount_attempts must be at least 1".into(),
            });
        }
        if !self.work_dir.is_absolute() {
            return Err(RootsmithError::Config {
                message: format!("work_dir must be absolute: {}", self.work_dir.display()),
            });
        }
        if !matches!(
            self.log_level.as_str(),
            "error" | "warn" | "info" | "debug" | "trace"
        ) {
            return Err(RootsmithError::Config {
                message: format!("unknown log level: {}", self.log_level),
            });
        }
        Ok(())
    }

    /// Retry policy applied to unmounts during chroot teardown.
    #[must_use]
    pub const fn unmount_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.unmount_attempts,
            Duration::from_millis(self.unmount_retry_delay_ms),
        )
    }

    /// Resolves a chroot root: relative paths land under `work_dir`.
    #[must_use]
    pub fn resolve_root(&self, root: &Path) -> PathBuf {
        if root.is_absolute() {
            root.to_path_buf()
        } else {
            self.work_dir.join(root)
        }
    }
}
