//! Mount specifications for chroot roots.
//!
//! A [`MountSpec`] describes one `mount(2)` call relative to a chroot root
//! and remembers whether it is live. Specs are applied in caller order so
//! parents exist before children, and torn down in descending target order
//! so children (`/dev/pts`) go before parents (`/dev`).

use std::path::{Component, Path, PathBuf};

use nix::mount::MsFlags;
use rootsmith_common::constants::DEVPTS_OPTIONS;
use rootsmith_common::error::{Result, RootsmithError};
use rootsmith_common::types::RetryPolicy;

use crate::host::HostOps;

/// Flags for a bind mount.
pub const BIND_FLAGS: MsFlags = MsFlags::MS_BIND;

/// One mount to create inside a chroot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    source: Option<PathBuf>,
    target: PathBuf,
    fstype: Option<String>,
    flags: MsFlags,
    options: Option<String>,
    succeeded: bool,
}

impl MountSpec {
    /// Describes a mount. Nothing happens until it is applied.
    ///
    /// `target` is interpreted relative to the chroot root and stored in
    /// canonical form (see [`canonical_target`]), so `var`, `/var/` and
    /// `/./var` all name the same mount point.
    pub fn new(
        source: Option<PathBuf>,
        target: impl Into<PathBuf>,
        fstype: Option<&str>,
        flags: MsFlags,
        options: Option<&str>,
    ) -> Self {
        Self {
            source,
            target: canonical_target(&target.into()),
            fstype: fstype.map(str::to_owned),
            flags,
            options: options.map(str::to_owned),
            succeeded: false,
        }
    }

    /// Describes a bind mount of a host path into the chroot.
    pub fn bind(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self::new(Some(source.into()), target, None, BIND_FLAGS, None)
    }

    fn pseudo(target: &str, fstype: &str, options: Option<&str>) -> Self {
        Self::new(None, target, Some(fstype), MsFlags::empty(), options)
    }

    /// Mount source, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Target relative to the chroot root.
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Filesystem type, if any.
    pub fn fstype(&self) -> Option<&str> {
        self.fstype.as_deref()
    }

    /// Mount flags.
    pub const fn flags(&self) -> MsFlags {
        self.flags
    }

    /// Filesystem-specific options string, if any.
    pub fn options(&self) -> Option<&str> {
        self.options.as_deref()
    }

    /// Whether this mount is currently live.
    ///
    /// Set once `mount(2)` succeeds and cleared again after a successful
    /// unmount. A spec that never succeeded is never unmounted.
    pub const fn succeeded(&self) -> bool {
        self.succeeded
    }

    /// Absolute host path of the target under `root`.
    pub fn full_path(&self, root: &Path) -> PathBuf {
        join_under(root, &self.target)
    }

    /// Creates the target directory under `root` and mounts.
    ///
    /// # Errors
    ///
    /// Returns [`RootsmithError::Io`] if the target directory cannot be
    /// created, or [`RootsmithError::MountFailed`] with the untouched OS
    /// error if the mount itself fails.
    pub fn apply(&mut self, host: &dyn HostOps, root: &Path) -> Result<()> {
        let full_path = self.full_path(root);
        tracing::debug!(
            source = ?self.source,
            target = %full_path.display(),
            fstype = ?self.fstype,
            flags = ?self.flags,
            options = ?self.options,
            "mounting"
        );

        std::fs::create_dir_all(&full_path).map_err(|e| RootsmithError::Io {
            path: full_path.clone(),
            source: e,
        })?;

        host.mount(
            self.source.as_deref(),
            &full_path,
            self.fstype.as_deref(),
            self.flags,
            self.options.as_deref(),
        )
        .map_err(|e| {
            tracing::error!(target = %full_path.display(), error = %e, "mount failed");
            RootsmithError::MountFailed {
                target: full_path.clone(),
                source: e,
            }
        })?;

        self.succeeded = true;
        Ok(())
    }

    /// Unmounts this spec from under `root`, retrying per `policy`.
    ///
    /// Specs that are not live are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`RootsmithError::UnmountFailed`] carrying the last OS error
    /// once every attempt has failed. The spec stays marked as live.
    pub fn unmount(&mut self, host: &dyn HostOps, root: &Path, policy: RetryPolicy) -> Result<()> {
        if !self.succeeded {
            return Ok(());
        }
        let full_path = self.full_path(root);
        tracing::debug!(target = %full_path.display(), "unmounting");

        crate::retry::run(|| host.unmount(&full_path), policy).map_err(|e| {
            tracing::warn!(target = %full_path.display(), error = %e, "failed to unmount");
            RootsmithError::UnmountFailed {
                target: full_path.clone(),
                attempts: policy.attempts.max(1),
                source: e,
            }
        })?;

        self.succeeded = false;
        Ok(())
    }
}

/// Rewrites a chroot-relative target as `/`-rooted with `.`, `..` and
/// trailing slashes resolved lexically.
///
/// `..` never climbs above the chroot root. Teardown ordering compares
/// targets byte-wise, which is only sound when every target shares this
/// one spelling.
pub fn canonical_target(target: &Path) -> PathBuf {
    let mut canonical = PathBuf::from("/");
    for component in target.components() {
        match component {
            Component::Normal(part) => canonical.push(part),
            Component::ParentDir => {
                let _ = canonical.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    canonical
}

/// Joins `path` under `root`, treating an absolute `path` as relative.
pub fn join_under(root: &Path, path: &Path) -> PathBuf {
    root.join(path.strip_prefix("/").unwrap_or(path))
}

/// The pseudo-filesystems every functional chroot needs.
///
/// Order matters: `/dev` is mounted before `/dev/pts`.
pub fn default_mounts() -> Vec<MountSpec> {
    vec![
        MountSpec::pseudo("/dev", "devtmpfs", None),
        MountSpec::pseudo("/proc", "proc", None),
        MountSpec::pseudo("/sys", "sysfs", None),
        MountSpec::pseudo("/run", "tmpfs", None),
        MountSpec::pseudo("/dev/pts", "devpts", Some(DEVPTS_OPTIONS)),
    ]
}

/// Sorts mounts into teardown order: descending lexicographic target.
///
/// Nested targets always sort after their parents, so the descending order
/// unravels them child first regardless of how they were created.
pub fn sort_for_teardown(mounts: &mut [MountSpec]) {
    mounts.sort_by(|a, b| b.target.as_os_str().cmp(a.target.as_os_str()));
}
