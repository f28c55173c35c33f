//! Chroot lifecycle management for rootsmith.
//!
//! A [`Chroot`](chroot::Chroot) owns a root directory and the mounts inside
//! it. Every chroot belongs to a [`Registry`](registry::Registry), which
//! serializes execution inside chroots (the process root is process-wide)
//! and can tear every live chroot down on shutdown. Child processes started
//! through the registry's [`ProcessTracker`](process::ProcessTracker) are
//! killed before that teardown so nothing keeps a mount point busy.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod chroot;
pub mod process;
pub mod registry;

pub use chroot::Chroot;
pub use process::{ExecOutput, ProcessTracker};
pub use registry::Registry;
