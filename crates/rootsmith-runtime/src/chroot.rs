//! A managed chroot: its directory, its mounts, and work run inside it.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rootsmith_common::error::{Result, RootsmithError};
use rootsmith_common::types::{FileToCopy, RetryPolicy};
use rootsmith_core::environment::{self, EnvSnapshot};
use rootsmith_core::filesystem::mount::{self, MountSpec};
use rootsmith_core::filesystem::root;
use rootsmith_core::host::HostOps;

use crate::registry::{Registry, lock};

/// State shared between a [`Chroot`] handle and its [`Registry`].
#[derive(Debug)]
pub(crate) struct ChrootState {
    root_dir: PathBuf,
    /// Teardown list, deepest target first.
    mounts: Mutex<Vec<MountSpec>>,
    initialized: AtomicBool,
}

impl ChrootState {
    pub(crate) fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Unmounts every live mount in teardown order, then deletes the root
    /// unless `leave_on_disk`.
    ///
    /// Stops at the first mount that cannot be unmounted: the shallower
    /// mounts stay in place and nothing is deleted, so a later call can
    /// pick up where this one left off.
    pub(crate) fn unmount_and_remove(
        &self,
        host: &dyn HostOps,
        policy: RetryPolicy,
        leave_on_disk: bool,
    ) -> Result<()> {
        let mut mounts = lock(&self.mounts);
        for mount in mounts.iter_mut() {
            mount.unmount(host, &self.root_dir, policy)?;
        }

        if !leave_on_disk {
            tracing::debug!(root = %self.root_dir.display(), "removing chroot directory");
            remove_dir_tree(&self.root_dir)?;
        }
        Ok(())
    }
}

/// One step of a partially completed [`Chroot::initialize`].
#[derive(Debug)]
enum Undo {
    CreatedDir(PathBuf),
    Mounted(usize),
}

/// Puts the process environment back when dropped.
struct EnvGuard(EnvSnapshot);

impl EnvGuard {
    /// Swaps in the chroot environment.
    ///
    /// Must only be created while the registry's execution lock is held.
    #[allow(unsafe_code)]
    fn enter(path_env: &str) -> Self {
        let original = EnvSnapshot::capture();
        // SAFETY: the execution lock serializes every environment swap.
        unsafe { environment::apply(&environment::chroot_environment(path_env)) };
        Self(original)
    }
}

impl Drop for EnvGuard {
    #[allow(unsafe_code)]
    fn drop(&mut self) {
        // SAFETY: dropped before the execution lock is released.
        unsafe { environment::apply(&self.0) };
    }
}

/// A chroot directory managed through its whole lifecycle.
///
/// With `exists_already == false` the chroot takes exclusive ownership of
/// its root: the directory must not exist when [`Chroot::initialize`] runs
/// and is deleted by [`Chroot::close`]. That is what makes deleting it
/// safe.
///
/// Never call [`Chroot::initialize`] or [`Chroot::close`] from inside
/// [`Chroot::run`]: `run` holds the execution lock and a concurrent
/// [`Registry::shutdown`] takes the registry lock first, then waits for it.
#[derive(Debug)]
pub struct Chroot {
    state: Arc<ChrootState>,
    exists_already: bool,
    registry: Arc<Registry>,
}

impl Chroot {
    /// Describes a chroot rooted at `root_dir`. Nothing touches the disk
    /// until [`Chroot::initialize`].
    ///
    /// A relative `root_dir` is made absolute against the current directory.
    pub fn new(root_dir: impl Into<PathBuf>, exists_already: bool, registry: Arc<Registry>) -> Self {
        let root_dir = root_dir.into();
        let root_dir = std::path::absolute(&root_dir).unwrap_or(root_dir);
        Self {
            state: Arc::new(ChrootState {
                root_dir,
                mounts: Mutex::new(Vec::new()),
                initialized: AtomicBool::new(false),
            }),
            exists_already,
            registry,
        }
    }

    /// Absolute root directory of this chroot.
    pub fn root_dir(&self) -> &Path {
        self.state.root_dir()
    }

    /// Whether the directory was handed over by the caller rather than
    /// created (and later deleted) by this chroot.
    pub const fn exists_already(&self) -> bool {
        self.exists_already
    }

    /// Snapshot of the teardown list, deepest target first.
    pub fn mounts(&self) -> Vec<MountSpec> {
        lock(&self.state.mounts).clone()
    }

    /// Whether this chroot is currently in its registry's active list.
    pub fn is_registered(&self) -> bool {
        self.registry
            .lock_active()
            .iter()
            .any(|state| Arc::ptr_eq(state, &self.state))
    }

    /// Creates the chroot: the root directory, the optional root filesystem
    /// `archive`, `extra_dirs` (relative to the root), then the default
    /// pseudo-filesystem mounts followed by `extra_mounts`, applied in that
    /// order. On success the chroot is registered for shutdown cleanup.
    ///
    /// On failure everything created so far is undone, newest first, and the
    /// original error is returned.
    ///
    /// # Errors
    ///
    /// - [`RootsmithError::AlreadyExists`] if the root exists and the chroot
    ///   was not told it would. Nothing is touched in that case.
    /// - [`RootsmithError::NotFound`] if the root was expected but missing.
    /// - [`RootsmithError::Config`] if the chroot is already initialized.
    /// - [`RootsmithError::ArchiveExtractFailed`],
    ///   [`RootsmithError::MountFailed`] or [`RootsmithError::Io`] from the
    ///   failing step.
    pub fn initialize(
        &self,
        archive: Option<&Path>,
        extra_dirs: &[PathBuf],
        extra_mounts: Vec<MountSpec>,
    ) -> Result<()> {
        let root_dir = self.root_dir();
        let exists = root_dir
            .try_exists()
            .map_err(|e| RootsmithError::io(root_dir, e))?;
        if exists && !self.exists_already {
            return Err(RootsmithError::AlreadyExists {
                path: root_dir.to_path_buf(),
            });
        }
        if !exists && self.exists_already {
            return Err(RootsmithError::NotFound {
                kind: "chroot directory",
                id: root_dir.display().to_string(),
            });
        }
        if self.state.initialized.swap(true, Ordering::SeqCst) {
            return Err(RootsmithError::Config {
                message: format!("chroot ({}) is already initialized", root_dir.display()),
            });
        }

        tracing::info!(root = %root_dir.display(), "initializing chroot");
        let mut mounts = mount::default_mounts();
        mounts.extend(extra_mounts);

        let mut undo = Vec::new();
        if let Err(e) = self.build(archive, extra_dirs, &mut mounts, &mut undo) {
            tracing::warn!(root = %root_dir.display(), error = %e, "chroot initialization failed, cleaning up");
            self.unwind(undo, &mut mounts);
            self.state.initialized.store(false, Ordering::SeqCst);
            return Err(e);
        }

        mount::sort_for_teardown(&mut mounts);
        *lock(&self.state.mounts) = mounts;

        self.registry.lock_active().push(Arc::clone(&self.state));
        tracing::info!(root = %root_dir.display(), "chroot initialized");
        Ok(())
    }

    fn build(
        &self,
        archive: Option<&Path>,
        extra_dirs: &[PathBuf],
        mounts: &mut [MountSpec],
        undo: &mut Vec<Undo>,
    ) -> Result<()> {
        let root_dir = self.root_dir();
        if !self.exists_already {
            create_root_dir(root_dir, undo)?;
        }

        if let Some(archive) = archive {
            let extracted = rootsmith_image::archive::extract_archive(archive, root_dir)?;
            tracing::info!(
                archive = %archive.display(),
                digest = %extracted.digest,
                size_bytes = extracted.size_bytes,
                "extracted root filesystem archive"
            );
        }

        for dir in extra_dirs {
            create_dir_recorded(&mount::join_under(root_dir, dir), undo)?;
        }

        let host = self.registry.host();
        for (index, spec) in mounts.iter_mut().enumerate() {
            if let Some(created) = topmost_missing(&spec.full_path(root_dir)) {
                undo.push(Undo::CreatedDir(created));
            }
            spec.apply(host, root_dir)?;
            undo.push(Undo::Mounted(index));
        }
        Ok(())
    }

    /// Replays `undo` newest first, continuing past errors.
    ///
    /// Once an unmount has failed, directory removal is skipped: deleting a
    /// tree with a live mount inside would delete through the mount.
    fn unwind(&self, undo: Vec<Undo>, mounts: &mut [MountSpec]) {
        let root_dir = self.root_dir();
        let host = self.registry.host();
        let policy = self.registry.unmount_policy();
        let mut mounts_left = false;

        for step in undo.into_iter().rev() {
            match step {
                Undo::Mounted(index) => {
                    if let Err(e) = mounts[index].unmount(host, root_dir, policy) {
                        tracing::error!(error = %e, "failed to unmount during cleanup");
                        mounts_left = true;
                    }
                }
                Undo::CreatedDir(dir) => {
                    if mounts_left {
                        tracing::warn!(dir = %dir.display(), "leaving directory in place, mounts remain below it");
                        continue;
                    }
                    if let Err(e) = remove_dir_tree(&dir) {
                        tracing::warn!(error = %e, "failed to remove directory during cleanup");
                    }
                }
            }
        }
    }

    /// Copies each file to its destination under the root, creating parent
    /// directories.
    ///
    /// # Errors
    ///
    /// Returns [`RootsmithError::CopyFailed`] for the first file that cannot
    /// be copied; the remaining files are not attempted.
    pub fn add_files(&self, files: &[FileToCopy]) -> Result<()> {
        for file in files {
            let dest = mount::join_under(self.root_dir(), &file.dest);
            tracing::debug!(src = %file.src.display(), dest = %dest.display(), "copying into chroot");
            rootsmith_image::file::copy(&file.src, &dest).inspect_err(|_| {
                tracing::error!(src = %file.src.display(), "failed to provision chroot");
            })?;
        }
        Ok(())
    }

    /// Runs `work` inside the chroot with the chroot environment.
    ///
    /// Holds the registry's execution lock throughout, so at most one `run`
    /// is in progress per registry regardless of which chroot it targets.
    /// The process environment is replaced by a minimal fixed one and put
    /// back afterwards, as are the process root and working directory.
    ///
    /// # Errors
    ///
    /// Returns `work`'s error unchanged, or an error from entering the root
    /// (see [`Chroot::unsafe_run`]).
    pub fn run<T, E, F>(&self, work: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        E: From<RootsmithError>,
    {
        let _execution = self.registry.lock_execution();
        let _env = EnvGuard::enter(self.registry.path_env());
        self.unsafe_run(work)
    }

    /// Runs `work` inside the chroot without taking the execution lock or
    /// touching the environment.
    ///
    /// The process root is process-wide. Only call this where exclusion is
    /// already established, such as from within [`Chroot::run`]. If the
    /// original root cannot be restored afterwards the process aborts.
    ///
    /// # Errors
    ///
    /// Returns [`RootsmithError::RootSwitchFailed`] if the root cannot be
    /// entered, or `work`'s error unchanged.
    pub fn unsafe_run<T, E, F>(&self, work: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        E: From<RootsmithError>,
    {
        root::run_inside(self.registry.host(), self.root_dir(), work)
    }

    /// Unmounts everything, deletes the root unless `leave_on_disk`, and
    /// deregisters the chroot.
    ///
    /// Closing a chroot that is not registered (never initialized, or
    /// already closed) does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`RootsmithError::UnmountFailed`] if a mount stays busy after
    /// every retry. The chroot then stays registered with its root on disk,
    /// and `close` may be called again to resume.
    pub fn close(&self, leave_on_disk: bool) -> Result<()> {
        let mut active = self.registry.lock_active();
        let Some(position) = active
            .iter()
            .position(|state| Arc::ptr_eq(state, &self.state))
        else {
            tracing::debug!(root = %self.root_dir().display(), "chroot is not registered, nothing to close");
            return Ok(());
        };

        self.state.unmount_and_remove(
            self.registry.host(),
            self.registry.unmount_policy(),
            leave_on_disk,
        )?;

        let _ = active.remove(position);
        self.state.initialized.store(false, Ordering::SeqCst);
        tracing::info!(root = %self.root_dir().display(), leave_on_disk, "chroot closed");
        Ok(())
    }
}

/// Creates `dir` and its missing parents, recording the topmost one created.
fn create_dir_recorded(dir: &Path, undo: &mut Vec<Undo>) -> Result<()> {
    if let Some(created) = topmost_missing(dir) {
        undo.push(Undo::CreatedDir(created));
    }
    std::fs::create_dir_all(dir).map_err(|e| RootsmithError::io(dir, e))
}

/// Creates an owned root directory. The final component is created with a
/// single `mkdir`, so a directory that appears after the existence check
/// still yields [`RootsmithError::AlreadyExists`] and is never recorded.
fn create_root_dir(root: &Path, undo: &mut Vec<Undo>) -> Result<()> {
    let recorded = undo.len();
    if let Some(parent) = root.parent() {
        create_dir_recorded(parent, undo)?;
    }
    match std::fs::create_dir(root) {
        Ok(()) => {
            if undo.len() == recorded {
                undo.push(Undo::CreatedDir(root.to_path_buf()));
            }
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(RootsmithError::AlreadyExists {
            path: root.to_path_buf(),
        }),
        Err(e) => Err(RootsmithError::io(root, e)),
    }
}

/// The outermost ancestor of `path` (possibly `path` itself) that does not
/// exist yet.
fn topmost_missing(path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .take_while(|p| !p.exists())
        .last()
        .map(Path::to_path_buf)
}

fn remove_dir_tree(dir: &Path) -> Result<()> {
    match std::fs::remove_dir_all(dir) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(RootsmithError::io(dir, e)),
        _ => Ok(()),
    }
}
