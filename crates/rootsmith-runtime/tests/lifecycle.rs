//! End-to-end lifecycle tests for managed chroots.
//!
//! Mount and root-switch syscalls go through a `RecordingHost`, so these
//! run unprivileged against temporary directories:
//! 1. Initialize (preconditions, mount order, archives, failure cleanup)
//! 2. Close (teardown order, deletion, stuck unmounts, retries)
//! 3. Run (mutual exclusion, environment swap, error propagation)
//! 4. Shutdown (LIFO sweep, best effort, permanent locking)

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::time::Duration;

use rootsmith_common::error::RootsmithError;
use rootsmith_common::types::RetryPolicy;
use rootsmith_core::filesystem::mount::MountSpec;
use rootsmith_core::filesystem::overlayfs::new_overlay_mount;
use rootsmith_core::host::{HostCall, RecordingHost};
use rootsmith_runtime::{Chroot, Registry};
use serial_test::serial;

const FAST: RetryPolicy = RetryPolicy::new(3, Duration::ZERO);

fn setup() -> (Arc<RecordingHost>, Arc<Registry>) {
    let host = Arc::new(RecordingHost::new());
    let registry = Arc::new(Registry::new(host.clone()).with_unmount_policy(FAST));
    (host, registry)
}

fn under(root: &Path, targets: &[&str]) -> Vec<PathBuf> {
    targets.iter().map(|t| root.join(t)).collect()
}

// ── Initialize ───────────────────────────────────────────────────────

#[test]
fn initialize_and_close_default_mounts() {
    let (host, registry) = setup();
    let scratch = tempfile::tempdir().unwrap();
    let root = scratch.path().join("t1");

    let chroot = Chroot::new(&root, false, registry.clone());
    chroot.initialize(None, &[], Vec::new()).unwrap();

    assert_eq!(
        host.mount_order(),
        under(&root, &["dev", "proc", "sys", "run", "dev/pts"])
    );
    assert!(chroot.mounts().iter().all(MountSpec::succeeded));
    assert_eq!(registry.active_roots(), vec![root.clone()]);

    chroot.close(false).unwrap();

    assert_eq!(
        host.unmount_order(),
        under(&root, &["sys", "run", "proc", "dev/pts", "dev"])
    );
    assert!(host.mounted().is_empty());
    assert!(!root.exists());
    assert!(registry.active_roots().is_empty());
}

#[test]
fn initialize_rejects_existing_dir_without_touching_it() {
    let (host, registry) = setup();
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("keep.txt"), "precious").unwrap();

    let chroot = Chroot::new(root.path(), false, registry.clone());
    let err = chroot.initialize(None, &[], Vec::new()).unwrap_err();

    assert!(matches!(err, RootsmithError::AlreadyExists { .. }));
    assert!(host.calls().is_empty());
    assert_eq!(
        std::fs::read_to_string(root.path().join("keep.txt")).unwrap(),
        "precious"
    );
    assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 1);
    assert!(!chroot.is_registered());
}

#[test]
fn initialize_requires_existing_dir_when_told_so() {
    let (host, registry) = setup();
    let scratch = tempfile::tempdir().unwrap();
    let root = scratch.path().join("missing");

    let chroot = Chroot::new(&root, true, registry);
    let err = chroot.initialize(None, &[], Vec::new()).unwrap_err();

    assert!(matches!(err, RootsmithError::NotFound { .. }));
    assert!(!root.exists());
    assert!(host.calls().is_empty());
}

#[test]
fn extra_mounts_follow_defaults_in_caller_order() {
    let (host, registry) = setup();
    let scratch = tempfile::tempdir().unwrap();
    let root = scratch.path().join("root");
    let (overlay, needed) = new_overlay_mount(
        &root,
        "overlay",
        "/work/merged",
        Path::new("/lower"),
        Path::new("/upper"),
        Path::new("/scratch"),
    );

    let chroot = Chroot::new(&root, false, registry);
    chroot
        .initialize(
            None,
            &needed,
            vec![MountSpec::bind("/srv/repo", "/repo"), overlay],
        )
        .unwrap();

    assert!(root.join("upper").is_dir());
    assert!(root.join("scratch").is_dir());
    assert_eq!(
        host.mount_order(),
        under(&root, &["dev", "proc", "sys", "run", "dev/pts", "repo", "work/merged"])
    );

    let teardown: Vec<_> = chroot
        .mounts()
        .iter()
        .map(|m| m.target().to_path_buf())
        .collect();
    assert_eq!(
        teardown,
        ["/work/merged", "/sys", "/run", "/repo", "/proc", "/dev/pts", "/dev"]
            .map(PathBuf::from)
    );
}

#[test]
fn nested_mounts_close_child_first_whatever_the_spelling() {
    let (host, registry) = setup();
    let scratch = tempfile::tempdir().unwrap();
    let root = scratch.path().join("root");

    let chroot = Chroot::new(&root, false, registry);
    chroot
        .initialize(
            None,
            &[],
            vec![
                MountSpec::bind("/srv/var", "var/"),
                MountSpec::bind("/srv/cache", "/var/./cache"),
            ],
        )
        .unwrap();

    chroot.close(false).unwrap();

    assert_eq!(
        host.unmount_order(),
        under(
            &root,
            &["var/cache", "var", "sys", "run", "proc", "dev/pts", "dev"]
        )
    );
    assert!(!root.exists());
}

#[test]
fn initialize_extracts_archive_before_mounting() {
    let (host, registry) = setup();
    let scratch = tempfile::tempdir().unwrap();
    let archive = scratch.path().join("rootfs.tar");
    {
        let mut builder = tar::Builder::new(std::fs::File::create(&archive).unwrap());
        let data = b"ID=rootsmith\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "etc/os-release", &data[..])
            .unwrap();
        builder.finish().unwrap();
    }
    let root = scratch.path().join("root");

    let chroot = Chroot::new(&root, false, registry);
    chroot.initialize(Some(&archive), &[], Vec::new()).unwrap();

    assert_eq!(
        std::fs::read_to_string(root.join("etc/os-release")).unwrap(),
        "ID=rootsmith\n"
    );
    assert_eq!(host.mounted().len(), 5);
}

#[test]
fn failed_archive_removes_created_root() {
    let (host, registry) = setup();
    let scratch = tempfile::tempdir().unwrap();
    let root = scratch.path().join("root");

    let chroot = Chroot::new(&root, false, registry);
    let err = chroot
        .initialize(Some(&scratch.path().join("nope.tar")), &[], Vec::new())
        .unwrap_err();

    assert!(matches!(err, RootsmithError::ArchiveExtractFailed { .. }));
    assert!(!root.exists());
    assert!(host.calls().is_empty());
}

#[test]
fn failed_mount_unwinds_everything() {
    let (host, registry) = setup();
    let scratch = tempfile::tempdir().unwrap();
    let root = scratch.path().join("root");
    host.fail_mount(root.join("run"));

    let chroot = Chroot::new(&root, false, registry.clone());
    let err = chroot.initialize(None, &[], Vec::new()).unwrap_err();

    assert!(matches!(err, RootsmithError::MountFailed { .. }));
    assert_eq!(
        host.unmount_order(),
        under(&root, &["sys", "proc", "dev"])
    );
    assert!(host.mounted().is_empty());
    assert!(!root.exists());
    assert!(registry.active_roots().is_empty());
}

#[test]
fn failed_mount_in_existing_dir_keeps_the_dir() {
    let (host, registry) = setup();
    let root = tempfile::tempdir().unwrap();
    host.fail_mount(root.path().join("mnt/data"));

    let chroot = Chroot::new(root.path(), true, registry);
    let err = chroot
        .initialize(
            None,
            &[PathBuf::from("/var/cache")],
            vec![MountSpec::bind("/srv/data", "/mnt/data")],
        )
        .unwrap_err();

    assert!(matches!(err, RootsmithError::MountFailed { .. }));
    assert!(root.path().exists());
    assert!(!root.path().join("var").exists());
    assert!(!root.path().join("mnt").exists());
    assert!(!root.path().join("dev").exists());
    assert!(host.mounted().is_empty());
}

#[test]
fn failed_initialize_can_be_retried() {
    let (host, registry) = setup();
    let scratch = tempfile::tempdir().unwrap();
    let root = scratch.path().join("root");
    host.fail_mount(root.join("extra"));

    let chroot = Chroot::new(&root, false, registry.clone());
    let _ = chroot
        .initialize(None, &[], vec![MountSpec::bind("/srv", "/extra")])
        .unwrap_err();

    chroot.initialize(None, &[], Vec::new()).unwrap();
    assert!(chroot.is_registered());
}

#[test]
fn double_initialize_is_rejected() {
    let (_host, registry) = setup();
    let root = tempfile::tempdir().unwrap();

    let chroot = Chroot::new(root.path(), true, registry.clone());
    chroot.initialize(None, &[], Vec::new()).unwrap();
    let err = chroot.initialize(None, &[], Vec::new()).unwrap_err();

    assert!(matches!(err, RootsmithError::Config { .. }));
    assert_eq!(registry.active_roots().len(), 1);
}

// ── Close ────────────────────────────────────────────────────────────

#[test]
fn close_leave_on_disk_unmounts_but_keeps_root() {
    let (host, registry) = setup();
    let scratch = tempfile::tempdir().unwrap();
    let root = scratch.path().join("root");

    let chroot = Chroot::new(&root, false, registry.clone());
    chroot.initialize(None, &[], Vec::new()).unwrap();
    chroot.close(true).unwrap();

    assert!(root.is_dir());
    assert!(host.mounted().is_empty());
    assert!(!chroot.is_registered());
}

#[test]
fn stuck_unmount_stops_close_and_keeps_root() {
    let (host, registry) = setup();
    let scratch = tempfile::tempdir().unwrap();
    let root = scratch.path().join("root");

    let chroot = Chroot::new(&root, false, registry.clone());
    chroot.initialize(None, &[], Vec::new()).unwrap();
    host.fail_unmount(root.join("proc"), 3);

    let err = chroot.close(false).unwrap_err();

    match err {
        RootsmithError::UnmountFailed {
            target, attempts, ..
        } => {
            assert_eq!(target, root.join("proc"));
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(host.unmount_order(), under(&root, &["sys", "run"]));
    assert_eq!(host.mounted(), under(&root, &["dev", "proc", "dev/pts"]));
    assert!(root.is_dir());
    assert!(chroot.is_registered());

    chroot.close(false).unwrap();

    assert_eq!(
        host.unmount_order(),
        under(&root, &["sys", "run", "proc", "dev/pts", "dev"])
    );
    assert!(!root.exists());
    assert!(!chroot.is_registered());
}

#[test]
fn transient_busy_unmount_is_retried() {
    let (host, registry) = setup();
    let scratch = tempfile::tempdir().unwrap();
    let root = scratch.path().join("root");

    let chroot = Chroot::new(&root, false, registry);
    chroot.initialize(None, &[], Vec::new()).unwrap();
    host.fail_unmount(root.join("dev/pts"), 2);

    chroot.close(false).unwrap();
    assert!(host.mounted().is_empty());
}

// ── Run ──────────────────────────────────────────────────────────────

#[test]
#[serial]
fn run_switches_root_and_restores_it() {
    let (host, registry) = setup();
    let root = tempfile::tempdir().unwrap();
    let chroot = Chroot::new(root.path(), true, registry);

    let answer = chroot.run(|| Ok::<_, RootsmithError>(42)).unwrap();

    assert_eq!(answer, 42);
    assert_eq!(
        host.calls(),
        vec![
            HostCall::Chroot(root.path().to_path_buf()),
            HostCall::Chdir(PathBuf::from("/")),
            HostCall::Fchdir,
            HostCall::Chroot(PathBuf::from(".")),
            HostCall::Fchdir,
        ]
    );
}

#[test]
#[serial]
#[allow(unsafe_code)]
fn run_swaps_environment_and_restores_it() {
    let (_host, registry) = setup();
    let root = tempfile::tempdir().unwrap();
    let chroot = Chroot::new(root.path(), true, registry);

    // SAFETY: serialized with every other environment-touching test.
    unsafe { std::env::set_var("ROOTSMITH_HOST_ONLY", "1") };

    let inside = chroot
        .run(|| {
            Ok::<_, RootsmithError>((
                std::env::var("USER").ok(),
                std::env::var("HOME").ok(),
                std::env::var("PATH").ok(),
                std::env::var_os("ROOTSMITH_HOST_ONLY"),
            ))
        })
        .unwrap();

    assert_eq!(inside.0.as_deref(), Some("root"));
    assert_eq!(inside.1.as_deref(), Some("/root"));
    assert_eq!(
        inside.2.as_deref(),
        Some(rootsmith_common::constants::CHROOT_PATH_ENV)
    );
    assert!(inside.3.is_none());
    assert_eq!(std::env::var("ROOTSMITH_HOST_ONLY").as_deref(), Ok("1"));

    // SAFETY: as above.
    unsafe { std::env::remove_var("ROOTSMITH_HOST_ONLY") };
}

#[test]
#[serial]
fn run_returns_work_error_after_restoring() {
    let (host, registry) = setup();
    let root = tempfile::tempdir().unwrap();
    let chroot = Chroot::new(root.path(), true, registry);

    let err = chroot
        .run(|| -> Result<(), RootsmithError> {
            Err(RootsmithError::work("rpm transaction failed"))
        })
        .unwrap_err();

    assert_eq!(err.to_string(), "chroot work failed: rpm transaction failed");
    assert_eq!(host.calls().last(), Some(&HostCall::Fchdir));
    assert_eq!(
        host.calls()
            .iter()
            .filter(|c| matches!(c, HostCall::Chroot(_)))
            .count(),
        2
    );
}

#[test]
#[serial]
fn failed_root_switch_skips_work() {
    let (host, registry) = setup();
    host.fail_chroot();
    let root = tempfile::tempdir().unwrap();
    let chroot = Chroot::new(root.path(), true, registry);

    let mut ran = false;
    let err = chroot
        .run(|| {
            ran = true;
            Ok::<_, RootsmithError>(())
        })
        .unwrap_err();

    assert!(matches!(err, RootsmithError::RootSwitchFailed { .. }));
    assert!(!ran);
}

#[test]
#[serial]
fn concurrent_runs_never_overlap() {
    let (_host, registry) = setup();
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    let chroots = [
        Arc::new(Chroot::new(first.path(), true, registry.clone())),
        Arc::new(Chroot::new(second.path(), true, registry)),
    ];

    let inside = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..8)
        .map(|i| {
            let chroot = Arc::clone(&chroots[i % 2]);
            let inside = Arc::clone(&inside);
            let peak = Arc::clone(&peak);
            std::thread::spawn(move || {
                chroot
                    .run(|| {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        let _ = peak.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(10));
                        let _ = inside.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, RootsmithError>(())
                    })
                    .unwrap();
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[test]
#[serial]
fn unsafe_run_can_nest_inside_run() {
    let (host, registry) = setup();
    let outer_root = tempfile::tempdir().unwrap();
    let inner_root = tempfile::tempdir().unwrap();
    let outer = Chroot::new(outer_root.path(), true, registry.clone());
    let inner = Chroot::new(inner_root.path(), true, registry);

    outer
        .run(|| inner.unsafe_run(|| Ok::<_, RootsmithError>(())))
        .unwrap();

    let roots: Vec<_> = host
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            HostCall::Chroot(p) => Some(p),
            _ => None,
        })
        .collect();
    assert_eq!(
        roots,
        vec![
            outer_root.path().to_path_buf(),
            inner_root.path().to_path_buf(),
            PathBuf::from("."),
            PathBuf::from("."),
        ]
    );
}

// ── Shutdown ─────────────────────────────────────────────────────────

#[test]
fn shutdown_sweeps_newest_first() {
    let (host, registry) = setup();
    let scratch = tempfile::tempdir().unwrap();
    let older = scratch.path().join("older");
    let newer = scratch.path().join("newer");

    Chroot::new(&older, false, registry.clone())
        .initialize(None, &[], Vec::new())
        .unwrap();
    Chroot::new(&newer, false, registry.clone())
        .initialize(None, &[], Vec::new())
        .unwrap();

    registry.shutdown();

    let order = host.unmount_order();
    assert_eq!(order.len(), 10);
    assert!(order[..5].iter().all(|p| p.starts_with(&newer)));
    assert!(order[5..].iter().all(|p| p.starts_with(&older)));
    assert!(!older.exists());
    assert!(!newer.exists());
}

#[test]
fn shutdown_skips_closed_chroots() {
    let (host, registry) = setup();
    let scratch = tempfile::tempdir().unwrap();
    let closed_root = scratch.path().join("closed");
    let open_root = scratch.path().join("open");

    let closed = Chroot::new(&closed_root, false, registry.clone());
    closed.initialize(None, &[], Vec::new()).unwrap();
    closed.close(true).unwrap();
    let before = host.unmount_order().len();

    Chroot::new(&open_root, false, registry.clone())
        .initialize(None, &[], Vec::new())
        .unwrap();
    registry.shutdown();

    let swept = &host.unmount_order()[before..];
    assert_eq!(swept.len(), 5);
    assert!(swept.iter().all(|p| p.starts_with(&open_root)));
    assert!(closed_root.is_dir());
}

#[test]
fn shutdown_continues_past_stuck_chroot() {
    let (host, registry) = setup();
    let scratch = tempfile::tempdir().unwrap();
    let healthy = scratch.path().join("healthy");
    let stuck = scratch.path().join("stuck");

    Chroot::new(&healthy, false, registry.clone())
        .initialize(None, &[], Vec::new())
        .unwrap();
    Chroot::new(&stuck, false, registry.clone())
        .initialize(None, &[], Vec::new())
        .unwrap();
    host.fail_unmount(stuck.join("dev/pts"), u32::MAX);

    registry.shutdown();

    assert!(!healthy.exists());
    assert!(stuck.is_dir());
    assert!(host.mounted().contains(&stuck.join("dev")));
}

#[test]
fn initialize_blocks_after_shutdown() {
    let (_host, registry) = setup();
    registry.shutdown();
    let scratch = tempfile::tempdir().unwrap();
    let root = scratch.path().join("late");

    let (done, finished) = mpsc::channel();
    {
        let registry = registry.clone();
        let root = root.clone();
        let _ = std::thread::spawn(move || {
            let result = Chroot::new(root, false, registry).initialize(None, &[], Vec::new());
            let _ = done.send(result.is_ok());
        });
    }

    assert!(finished.recv_timeout(Duration::from_millis(300)).is_err());
}

#[test]
fn shutdown_kills_tracked_processes() {
    let (_host, registry) = setup();
    let processes = Arc::clone(registry.processes());

    let worker = std::thread::spawn(move || processes.execute("sleep", ["30"]));
    while registry.processes().in_flight() == 0 {
        std::thread::sleep(Duration::from_millis(10));
    }

    registry.shutdown();

    assert!(matches!(
        worker.join().unwrap(),
        Err(RootsmithError::CommandFailed { status: None, .. })
    ));
    assert!(matches!(
        registry.processes().execute("true", std::iter::empty::<&str>()),
        Err(RootsmithError::ProcessesStopped)
    ));
}
