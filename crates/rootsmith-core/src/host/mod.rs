//! Host operations that change process-wide or system-wide state.
//!
//! [`HostOps`] is the seam between chroot bookkeeping and the kernel.
//! [`LinuxHost`] issues the real syscalls; [`RecordingHost`] only records
//! what would have happened, so lifecycle logic can be exercised without
//! `CAP_SYS_ADMIN`.

mod recording;

use std::fs::File;
use std::io;
use std::path::Path;

pub use nix::mount::MsFlags;
pub use recording::{HostCall, RecordingHost};

/// Syscalls a chroot needs from the host.
pub trait HostOps: Send + Sync + std::fmt::Debug {
    /// Attaches a filesystem at `target` (an absolute host path).
    ///
    /// # Errors
    ///
    /// Returns the OS error reported by `mount(2)`.
    fn mount(
        &self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        options: Option<&str>,
    ) -> io::Result<()>;

    /// Detaches the filesystem mounted at `target`.
    ///
    /// # Errors
    ///
    /// Returns the OS error reported by `umount(2)`, e.g. `EBUSY`.
    fn unmount(&self, target: &Path) -> io::Result<()>;

    /// Changes the root directory of the whole process.
    ///
    /// # Errors
    ///
    /// Returns the OS error reported by `chroot(2)`.
    fn chroot(&self, root: &Path) -> io::Result<()>;

    /// Changes the working directory to an already-open directory handle.
    ///
    /// # Errors
    ///
    /// Returns the OS error reported by `fchdir(2)`.
    fn fchdir(&self, dir: &File) -> io::Result<()>;

    /// Changes the working directory by path.
    ///
    /// # Errors
    ///
    /// Returns the OS error reported by `chdir(2)`.
    fn chdir(&self, dir: &Path) -> io::Result<()>;
}

/// Real Linux syscalls via `nix`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxHost;

impl HostOps for LinuxHost {
    fn mount(
        &self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        options: Option<&str>,
    ) -> io::Result<()> {
        nix::mount::mount(source, target, fstype, flags, options).map_err(io::Error::from)
    }

    fn unmount(&self, target: &Path) -> io::Result<()> {
        nix::mount::umount(target).map_err(io::Error::from)
    }

    fn chroot(&self, root: &Path) -> io::Result<()> {
        nix::unistd::chroot(root).map_err(io::Error::from)
    }

    fn fchdir(&self, dir: &File) -> io::Result<()> {
        nix::unistd::fchdir(dir).map_err(io::Error::from)
    }

    fn chdir(&self, dir: &Path) -> io::Result<()> {
        std::env::set_current_dir(dir)
    }
}
