//! Domain primitive types used across the rootsmith workspace.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_UNMOUNT_ATTEMPTS, DEFAULT_UNMOUNT_RETRY_DELAY};

/// A host file to place inside a chroot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileToCopy {
    /// Path of the file on the host.
    pub src: PathBuf,
    /// Destination, relative to the chroot root.
    pub dest: PathBuf,
}

impl FileToCopy {
    /// Creates a new copy request.
    pub fn new(src: impl Into<PathBuf>, dest: impl Into<PathBuf>) -> Self {
        Self {
            src: src.into(),
            dest: dest.into(),
        }
    }
}

/// Bounded retry policy: a fixed number of attempts with a fixed pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub attempts: u32,
    /// Pause between two consecutive attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy with the given attempts and delay.
    #[must_use]
    pub const fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_UNMOUNT_ATTEMPTS, DEFAULT_UNMOUNT_RETRY_DELAY)
    }
}
