//! `OverlayFS` mounts inside a chroot.
//!
//! Stacks a read-only host directory under a writable upper directory that
//! lives inside the chroot, so work in the chroot can write "into" a host
//! directory without modifying it.

use std::path::{Path, PathBuf};

use nix::mount::MsFlags;
use rootsmith_common::constants::OVERLAY_FSTYPE;

use super::mount::{MountSpec, join_under};

/// Builds an overlay mount and the directories it needs.
///
/// `upper_dir` and `work_dir` are relative to `chroot_root`; `lower_dir` is
/// a host path. The returned directories (`upper_dir`, `work_dir`) must
/// exist before the mount is applied, so pass them as extra directories
/// when initializing the chroot.
pub fn new_overlay_mount(
    chroot_root: &Path,
    source: impl Into<PathBuf>,
    target: impl Into<PathBuf>,
    lower_dir: &Path,
    upper_dir: &Path,
    work_dir: &Path,
) -> (MountSpec, Vec<PathBuf>) {
    let options = format!(
        "lowerdir={},upperdir={},workdir={}",
        lower_dir.display(),
        join_under(chroot_root, upper_dir).display(),
        join_under(chroot_root, work_dir).display()
    );

    let spec = MountSpec::new(
        Some(source.into()),
        target,
        Some(OVERLAY_FSTYPE),
        MsFlags::empty(),
        Some(&options),
    );

    (spec, vec![upper_dir.to_path_buf(), work_dir.to_path_buf()])
}
