//! Process environment swapping for work run inside a chroot.
//!
//! The host environment (`LD_LIBRARY_PATH`, `PYTHONPATH`, a host `PATH`
//! with directories that do not exist in the chroot, ...) must not leak
//! into the chroot, so the whole environment is replaced by a small fixed
//! set and put back afterwards.

use std::ffi::OsString;

use rootsmith_common::constants::{CHROOT_HOME, CHROOT_INHERITED_VARS, CHROOT_USER};

/// A full copy of the process environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvSnapshot(Vec<(OsString, OsString)>);

impl EnvSnapshot {
    /// Copies the current process environment.
    pub fn capture() -> Self {
        Self(std::env::vars_os().collect())
    }

    /// Variables in this snapshot.
    pub fn vars(&self) -> &[(OsString, OsString)] {
        &self.0
    }
}

/// Builds the environment exported to work inside a chroot.
///
/// `USER` and `HOME` are fixed, `SHELL` and `TERM` are inherited from the
/// host (empty if unset), and `PATH` is `path_env`.
pub fn chroot_environment(path_env: &str) -> EnvSnapshot {
    let mut vars = vec![
        (OsString::from("USER"), OsString::from(CHROOT_USER)),
        (OsString::from("HOME"), OsString::from(CHROOT_HOME)),
    ];
    for name in CHROOT_INHERITED_VARS {
        let value = std::env::var_os(name).unwrap_or_default();
        vars.push((OsString::from(name), value));
    }
    vars.push((OsString::from("PATH"), OsString::from(path_env)));
    EnvSnapshot(vars)
}

/// Replaces the entire process environment with `snapshot`.
///
/// # Safety
///
/// No other thread may read or write the process environment while this
/// runs (see [`std::env::set_var`]). Callers serialize through the same
/// lock that guards chroot execution.
#[allow(unsafe_code)]
pub unsafe fn apply(snapshot: &EnvSnapshot) {
    for (name, _) in std::env::vars_os() {
        // SAFETY: upheld by the caller.
        unsafe { std::env::remove_var(name) };
    }
    for (name, value) in &snapshot.0 {
        // SAFETY: upheld by the caller.
        unsafe { std::env::set_var(name, value) };
    }
}
