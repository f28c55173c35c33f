//! # rootsmith-image
//!
//! Populating chroot roots from the host.
//!
//! Handles:
//! - **Archives**: extracting `.tar` and gzip-compressed root filesystem
//!   skeletons into a chroot directory.
//! - **Files**: copying individual host files into a chroot.
//! - **Hashing**: SHA-256 digests recorded for every extracted archive.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod archive;
pub mod file;
pub mod hash;
