//! The set of live chroots and the locks that guard them.
//!
//! Two locks, always taken in this order when both are needed:
//!
//! 1. the **registry lock** over the list of active chroots, held by
//!    [`Chroot::initialize`](crate::Chroot::initialize) while registering,
//!    by [`Chroot::close`](crate::Chroot::close) for its whole duration, and
//!    by [`Registry::shutdown`];
//! 2. the **execution lock**, held by [`Chroot::run`](crate::Chroot::run)
//!    for the whole time the process root and environment are switched.
//!
//! Only [`Registry::shutdown`] takes both, and it never gives them back.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rootsmith_common::config::RootsmithConfig;
use rootsmith_common::constants::CHROOT_PATH_ENV;
use rootsmith_common::types::RetryPolicy;
use rootsmith_core::host::{HostOps, LinuxHost};

use crate::chroot::ChrootState;
use crate::process::ProcessTracker;

/// Locks a mutex, recovering the data if a previous holder panicked.
///
/// A panic inside chroot work still restores the root and environment
/// before the guard drops, so the protected state stays consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owner of every live [`Chroot`](crate::Chroot) in a process.
///
/// Share it as `Arc<Registry>`. A process normally has exactly one, wired
/// to signal delivery by the binary; tests build as many isolated ones as
/// they like.
#[derive(Debug)]
pub struct Registry {
    active: Mutex<Vec<Arc<ChrootState>>>,
    execution: Mutex<()>,
    host: Arc<dyn HostOps>,
    processes: Arc<ProcessTracker>,
    unmount_policy: RetryPolicy,
    path_env: String,
}

impl Registry {
    /// Creates an empty registry issuing syscalls through `host`.
    pub fn new(host: Arc<dyn HostOps>) -> Self {
        Self {
            active: Mutex::new(Vec::new()),
            execution: Mutex::new(()),
            host,
            processes: Arc::new(ProcessTracker::new()),
            unmount_policy: RetryPolicy::default(),
            path_env: CHROOT_PATH_ENV.to_owned(),
        }
    }

    /// Creates an empty registry backed by real Linux syscalls.
    pub fn linux() -> Self {
        Self::new(Arc::new(LinuxHost))
    }

    /// Creates an empty registry with the unmount policy and chroot `PATH`
    /// taken from `config`.
    pub fn from_config(host: Arc<dyn HostOps>, config: &RootsmithConfig) -> Self {
        Self::new(host)
            .with_unmount_policy(config.unmount_policy())
            .with_path_env(config.chroot_path_env.clone())
    }

    /// Overrides how unmounts are retried.
    #[must_use]
    pub const fn with_unmount_policy(mut self, policy: RetryPolicy) -> Self {
        self.unmount_policy = policy;
        self
    }

    /// Overrides the `PATH` exported inside chroots.
    #[must_use]
    pub fn with_path_env(mut self, path_env: impl Into<String>) -> Self {
        self.path_env = path_env.into();
        self
    }

    /// Host backend used for mounts and root switches.
    pub fn host(&self) -> &dyn HostOps {
        self.host.as_ref()
    }

    /// Tracker for external commands. Anything that should be killed on
    /// shutdown must be launched through it.
    pub fn processes(&self) -> &Arc<ProcessTracker> {
        &self.processes
    }

    /// Retry policy applied to every unmount.
    pub const fn unmount_policy(&self) -> RetryPolicy {
        self.unmount_policy
    }

    /// `PATH` exported inside chroots.
    pub fn path_env(&self) -> &str {
        &self.path_env
    }

    /// Root directories of the registered chroots, in registration order.
    ///
    /// Blocks forever once [`Registry::shutdown`] has run.
    pub fn active_roots(&self) -> Vec<PathBuf> {
        lock(&self.active)
            .iter()
            .map(|state| state.root_dir().to_path_buf())
            .collect()
    }

    pub(crate) fn lock_active(&self) -> MutexGuard<'_, Vec<Arc<ChrootState>>> {
        lock(&self.active)
    }

    pub(crate) fn lock_execution(&self) -> MutexGuard<'_, ()> {
        lock(&self.execution)
    }

    /// Tears down every registered chroot before the process exits.
    ///
    /// Waits for in-progress initialization and cleanup, kills every
    /// tracked child process, waits for in-progress chroot work, then
    /// unmounts and deletes each chroot, newest first. A chroot that fails
    /// to tear down is logged and skipped so the rest still get cleaned.
    ///
    /// Both locks stay held afterwards: every later
    /// [`initialize`](crate::Chroot::initialize),
    /// [`run`](crate::Chroot::run) or [`close`](crate::Chroot::close) on this
    /// registry blocks forever, and so does a second call to `shutdown`.
    /// The caller is expected to exit right after this returns.
    pub fn shutdown(&self) {
        tracing::info!("waiting for outstanding chroot initialization and cleanup to finish");
        let mut active = self.lock_active();

        tracing::info!("waiting for outstanding chroot commands to finish");
        self.processes.permanently_stop_all();
        let execution = self.lock_execution();

        tracing::info!(count = active.len(), "cleaning up all active chroots");
        let mut remaining = Vec::new();
        for state in active.drain(..).rev() {
            let root = state.root_dir().display().to_string();
            tracing::info!(root = %root, "cleaning up chroot");
            if let Err(e) = state.unmount_and_remove(self.host(), self.unmount_policy, false) {
                tracing::error!(root = %root, error = %e, "failed to clean up chroot");
                remaining.push(state);
            }
        }
        remaining.reverse();
        *active = remaining;
        tracing::info!("cleanup finished");

        std::mem::forget(execution);
        std::mem::forget(active);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rootsmith_core::host::RecordingHost;

    use super::*;

    #[test]
    fn new_registry_is_empty() {
        let registry = Registry::new(Arc::new(RecordingHost::new()));
        assert!(registry.active_roots().is_empty());
        assert_eq!(registry.unmount_policy(), RetryPolicy::default());
        assert_eq!(registry.path_env(), CHROOT_PATH_ENV);
    }

    #[test]
    fn builder_overrides_policy_and_path() {
        let policy = RetryPolicy::new(7, Duration::from_millis(5));
        let registry = Registry::new(Arc::new(RecordingHost::new()))
            .with_unmount_policy(policy)
            .with_path_env("/bin");
        assert_eq!(registry.unmount_policy(), policy);
        assert_eq!(registry.path_env(), "/bin");
    }

    #[test]
    fn from_config_reads_unmount_settings() {
        let config = RootsmithConfig {
            unmount_attempts: 5,
            unmount_retry_delay_ms: 250,
            chroot_path_env: "/usr/bin".into(),
            ..RootsmithConfig::default()
        };
        let registry = Registry::from_config(Arc::new(RecordingHost::new()), &config);
        assert_eq!(
            registry.unmount_policy(),
            RetryPolicy::new(5, Duration::from_millis(250))
        );
        assert_eq!(registry.path_env(), "/usr/bin");
    }

    #[test]
    fn shutdown_stops_process_launches() {
        let registry = Registry::new(Arc::new(RecordingHost::new()));
        registry.shutdown();
        assert!(registry.processes().is_stopped());
        assert!(registry.active.try_lock().is_err());
        assert!(registry.execution.try_lock().is_err());
    }
}
