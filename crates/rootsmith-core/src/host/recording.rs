//! A [`HostOps`] backend that records calls instead of making them.

use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use nix::mount::MsFlags;

use super::HostOps;

/// One recorded host operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    /// A successful mount at the given absolute target.
    Mount(PathBuf),
    /// A successful unmount of the given absolute target.
    Unmount(PathBuf),
    /// A root change to the given path.
    Chroot(PathBuf),
    /// A working-directory change through a directory handle.
    Fchdir,
    /// A working-directory change by path.
    Chdir(PathBuf),
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<HostCall>,
    mounted: Vec<PathBuf>,
    failing_mounts: Vec<PathBuf>,
    failing_unmounts: HashMap<PathBuf, u32>,
    fail_chroot: bool,
}

/// Records every operation and tracks which targets are mounted.
///
/// Failures can be injected per target. Root and working-directory changes
/// are recorded but never performed, so the calling process is unaffected.
#[derive(Debug, Default)]
pub struct RecordingHost {
    state: Mutex<State>,
}

impl RecordingHost {
    /// Creates a host with no recorded calls and no injected failures.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every mount at `target` fail with `EPERM`.
    pub fn fail_mount(&self, target: impl Into<PathBuf>) {
        self.state().failing_mounts.push(target.into());
    }

    /// Makes the next `times` unmounts of `target` fail with `EBUSY`.
    pub fn fail_unmount(&self, target: impl Into<PathBuf>, times: u32) {
        let _ = self.state().failing_unmounts.insert(target.into(), times);
    }

    /// Makes every `chroot` call fail with `EPERM`.
    pub fn fail_chroot(&self) {
        self.state().fail_chroot = true;
    }

    /// All calls recorded so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<HostCall> {
        self.state().calls.clone()
    }

    /// Targets of successful mounts, in order.
    #[must_use]
    pub fn mount_order(&self) -> Vec<PathBuf> {
        self.filter_calls(|call| match call {
            HostCall::Mount(p) => Some(p.clone()),
            _ => None,
        })
    }

    /// Targets of successful unmounts, in order.
    #[must_use]
    pub fn unmount_order(&self) -> Vec<PathBuf> {
        self.filter_calls(|call| match call {
            HostCall::Unmount(p) => Some(p.clone()),
            _ => None,
        })
    }

    /// Targets that are currently mounted.
    #[must_use]
    pub fn mounted(&self) -> Vec<PathBuf> {
        self.state().mounted.clone()
    }

    fn filter_calls(&self, f: impl Fn(&HostCall) -> Option<PathBuf>) -> Vec<PathBuf> {
        self.state().calls.iter().filter_map(f).collect()
    }
}

impl HostOps for RecordingHost {
    fn mount(
        &self,
        _source: Option<&Path>,
        target: &Path,
        _fstype: Option<&str>,
        _flags: MsFlags,
        _options: Option<&str>,
    ) -> io::Result<()> {
        let mut state = self.state();
        if state.failing_mounts.iter().any(|p| p == target) {
            return Err(io::Error::from_raw_os_error(libc::EPERM));
        }
        state.calls.push(HostCall::Mount(target.to_path_buf()));
        state.mounted.push(target.to_path_buf());
        Ok(())
    }

    fn unmount(&self, target: &Path) -> io::Result<()> {
        let mut state = self.state();
        if let Some(remaining) = state.failing_unmounts.get_mut(target) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(io::Error::from_raw_os_error(libc::EBUSY));
            }
        }
        let Some(pos) = state.mounted.iter().position(|p| p == target) else {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        };
        let _ = state.mounted.remove(pos);
        state.calls.push(HostCall::Unmount(target.to_path_buf()));
        Ok(())
    }

    fn chroot(&self, root: &Path) -> io::Result<()> {
        let mut state = self.state();
        if state.fail_chroot {
            return Err(io::Error::from_raw_os_error(libc::EPERM));
        }
        state.calls.push(HostCall::Chroot(root.to_path_buf()));
        Ok(())
    }

    fn fchdir(&self, _dir: &File) -> io::Result<()> {
        self.state().calls.push(HostCall::Fchdir);
        Ok(())
    }

    fn chdir(&self, dir: &Path) -> io::Result<()> {
        self.state().calls.push(HostCall::Chdir(dir.to_path_buf()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_mounted_targets() {
        let host = RecordingHost::new();
        host.mount(None, Path::new("/r/dev"), Some("devtmpfs"), MsFlags::empty(), None)
            .unwrap();
        assert_eq!(host.mounted(), vec![PathBuf::from("/r/dev")]);
        host.unmount(Path::new("/r/dev")).unwrap();
        assert!(host.mounted().is_empty());
    }

    #[test]
    fn unmounting_unknown_target_fails() {
        let host = RecordingHost::new();
        let err = host.unmount(Path::new("/r/proc")).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EINVAL));
    }

    #[test]
    fn injected_unmount_failures_run_out() {
        let host = RecordingHost::new();
        host.mount(None, Path::new("/r/sys"), None, MsFlags::empty(), None)
            .unwrap();
        host.fail_unmount("/r/sys", 1);
        assert_eq!(
            host.unmount(Path::new("/r/sys")).unwrap_err().raw_os_error(),
            Some(libc::EBUSY)
        );
        host.unmount(Path::new("/r/sys")).unwrap();
    }

    #[test]
    fn injected_mount_failure_is_not_recorded() {
        let host = RecordingHost::new();
        host.fail_mount("/r/run");
        assert!(host
            .mount(None, Path::new("/r/run"), None, MsFlags::empty(), None)
            .is_err());
        assert!(host.calls().is_empty());
    }
}
