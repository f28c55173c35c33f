//! # rootsmith-core
//!
//! Low-level Linux primitives behind rootsmith's chroot manager.
//!
//! This crate provides:
//! - **Host operations**: the [`host::HostOps`] seam over `mount(2)`,
//!   `umount(2)`, `chroot(2)` and `fchdir(2)`, with a real Linux backend and
//!   a recording backend for unprivileged tests and dry runs.
//! - **Filesystem**: mount specifications, the default pseudo-filesystem
//!   set, overlay mounts, and process-root switching.
//! - **Environment**: capture and replacement of the process environment.
//! - **Retry**: bounded retry with a fixed pause.
//!
//! Everything here is Linux-only. Nothing in this crate takes a lock:
//! callers are responsible for serializing root switches and environment
//! swaps, which affect the whole process.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod environment;
pub mod filesystem;
pub mod host;
pub mod retry;
