//! Filesystem management for chroot roots.
//!
//! Provides mount specifications and the default pseudo-filesystem set,
//! overlay mount construction, and switching the process root in and out
//! of a chroot.

pub mod mount;
pub mod overlayfs;
pub mod root;
