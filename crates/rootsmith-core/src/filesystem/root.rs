//! Switching the process root into and out of a chroot.
//!
//! The process root and working directory are process-wide: switching them
//! affects every thread. Callers must guarantee no other thread switches
//! roots concurrently. [`run_inside`] runs the whole enter/work/restore
//! sequence synchronously on the calling OS thread.

use std::fs::File;
use std::io;
use std::path::Path;

use rootsmith_common::error::{Result, RootsmithError};

use crate::host::HostOps;

/// Handles to the root and working directory in effect before a switch.
///
/// Kept as open directories rather than paths: once inside the chroot the
/// original paths no longer resolve.
#[derive(Debug)]
pub struct SavedRoot {
    root: File,
    cwd: File,
}

impl SavedRoot {
    /// Opens the current root and working directory.
    ///
    /// # Errors
    ///
    /// Returns an error if either directory cannot be opened.
    pub fn capture() -> Result<Self> {
        let root = File::open("/").map_err(|e| RootsmithError::io("/", e))?;
        let cwd_path = std::env::current_dir().map_err(|e| RootsmithError::io(".", e))?;
        let cwd = File::open(&cwd_path).map_err(|e| RootsmithError::Io {
            path: cwd_path,
            source: e,
        })?;
        Ok(Self { root, cwd })
    }

    /// Returns the process to the captured root and working directory.
    ///
    /// # Errors
    ///
    /// Returns the OS error of the first step that failed. The process root
    /// is indeterminate afterwards.
    pub fn restore(&self, host: &dyn HostOps) -> io::Result<()> {
        tracing::debug!("exiting chroot");
        host.fchdir(&self.root)?;
        host.chroot(Path::new("."))?;
        host.fchdir(&self.cwd)
    }
}

/// Restores a [`SavedRoot`] when dropped, including during unwinding.
struct Inside<'a> {
    host: &'a dyn HostOps,
    saved: SavedRoot,
    root: &'a Path,
}

impl Drop for Inside<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.saved.restore(self.host) {
            tracing::error!(
                root = %self.root.display(),
                error = %e,
                "failed to restore the original process root, aborting"
            );
            std::process::abort();
        }
    }
}

/// Runs `work` with the process root switched to `new_root`.
///
/// The original root and working directory are restored whether `work`
/// succeeds, fails or panics, and `work`'s error is returned unchanged.
///
/// If restoring fails the process no longer has a predictable root and
/// there is nothing meaningful left to return to: the failure is logged
/// and the process aborts.
///
/// # Errors
///
/// Returns an error if the current root cannot be captured,
/// [`RootsmithError::RootSwitchFailed`] if entering `new_root` fails, or
/// whatever `work` returns.
pub fn run_inside<T, E, F>(host: &dyn HostOps, new_root: &Path, work: F) -> std::result::Result<T, E>
where
    F: FnOnce() -> std::result::Result<T, E>,
    E: From<RootsmithError>,
{
    let saved = SavedRoot::capture()?;
    let switch_failed = |e: io::Error| RootsmithError::RootSwitchFailed {
        root: new_root.to_path_buf(),
        source: e,
    };

    tracing::debug!(root = %new_root.display(), "entering chroot");
    host.chroot(new_root).map_err(switch_failed)?;
    let _inside = Inside {
        host,
        saved,
        root: new_root,
    };

    host.chdir(Path::new("/")).map_err(switch_failed)?;
    work()
}
