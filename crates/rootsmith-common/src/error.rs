//! Unified error type for the rootsmith workspace.
//!
//! Every filesystem failure carries the path it happened on. Mount and
//! unmount failures wrap the raw OS error so callers can inspect `EBUSY`
//! and friends.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum RootsmithError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A chroot that must own its root directory found it already present.
    #[error("chroot directory ({path}) already exists")]
    AlreadyExists {
        /// The pre-existing root directory.
        path: PathBuf,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// Extracting a root filesystem archive failed.
    #[error("failed to extract {archive} into {target}: {source}")]
    ArchiveExtractFailed {
        /// Archive being extracted.
        archive: PathBuf,
        /// Extraction destination.
        target: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A `mount(2)` call failed.
    #[error("mount failed on ({target}): {source}")]
    MountFailed {
        /// Absolute mount target.
        target: PathBuf,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// An `umount(2)` call kept failing after all retries.
    #[error("failed to unmount ({target}) after {attempts} attempt(s): {source}")]
    UnmountFailed {
        /// Absolute mount target.
        target: PathBuf,
        /// Number of attempts made.
        attempts: u32,
        /// Error returned by the last attempt.
        source: std::io::Error,
    },

    /// Copying a file into a chroot failed.
    #[error("failed to copy {src} to {dst}: {source}")]
    CopyFailed {
        /// Copy source on the host.
        src: PathBuf,
        /// Copy destination.
        dst: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Work executed inside a chroot reported its own failure.
    #[error("chroot work failed: {0}")]
    WorkFailed(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Switching the process root into a chroot failed.
    #[error("failed to switch process root to {root}: {source}")]
    RootSwitchFailed {
        /// Root the process tried to enter.
        root: PathBuf,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// An external command exited unsuccessfully.
    #[error("command `{program}` failed with status {status:?}: {stderr}")]
    CommandFailed {
        /// Program that was run.
        program: String,
        /// Exit code, if the process exited normally.
        status: Option<i32>,
        /// Captured standard error (may be empty when streamed).
        stderr: String,
    },

    /// The process tracker was permanently stopped by a shutdown.
    #[error("process launches are disabled: shutdown in progress")]
    ProcessesStopped,

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl RootsmithError {
    /// Wraps an arbitrary error raised by work running inside a chroot.
    pub fn work<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::WorkFailed(err.into())
    }

    /// Builds an [`RootsmithError::Io`] for the given path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, RootsmithError>;
