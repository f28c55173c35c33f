//! `rsmith run`: Create a chroot, run one command inside it, tear it down.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use rootsmith_common::config::RootsmithConfig;
use rootsmith_common::types::FileToCopy;
use rootsmith_core::host::LinuxHost;
use rootsmith_runtime::{Chroot, Registry};

use super::{ChrootArgs, ChrootLayout};
use crate::mounts::parse_copy;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Chroot layout.
    #[command(flatten)]
    pub chroot: ChrootArgs,

    /// Root filesystem archive (`.tar`, `.tar.gz`) extracted into the root.
    #[arg(long, value_name = "TAR")]
    pub archive: Option<PathBuf>,

    /// Copy a host file into the chroot before running.
    #[arg(long = "copy", value_name = "SRC:DST", value_parser = parse_copy)]
    pub copies: Vec<FileToCopy>,

    /// Unmount everything but keep the root directory afterwards.
    #[arg(long)]
    pub leave_on_disk: bool,

    /// Command and arguments to run inside the chroot.
    #[arg(last = true, required = true, value_name = "CMD")]
    pub command: Vec<String>,
}

/// Executes the `run` command.
///
/// SIGINT and SIGTERM tear down every chroot and exit with status 1. If the
/// command fails while a chroot is still registered, the same teardown runs
/// before the error is reported.
///
/// # Errors
///
/// Returns an error if the chroot cannot be set up, the command fails, or
/// the chroot cannot be cleaned up.
pub fn execute(args: &RunArgs, config: &RootsmithConfig) -> anyhow::Result<()> {
    let layout = args.chroot.layout(config);
    let registry = Arc::new(Registry::from_config(Arc::new(LinuxHost), config));
    install_shutdown_handler(&registry)?;

    let result = run_in_chroot(args, &layout, &registry);
    if result.is_err() && !registry.active_roots().is_empty() {
        tracing::error!("chroots still active after failure, tearing them down");
        registry.shutdown();
    }
    result
}

fn install_shutdown_handler(registry: &Arc<Registry>) -> anyhow::Result<()> {
    let registry = Arc::clone(registry);
    ctrlc::set_handler(move || {
        tracing::error!("received termination signal");
        registry.shutdown();
        std::process::exit(1);
    })
    .context("failed to install signal handler")
}

fn run_in_chroot(args: &RunArgs, layout: &ChrootLayout, registry: &Arc<Registry>) -> anyhow::Result<()> {
    let (program, program_args) = args
        .command
        .split_first()
        .context("no command given")?;

    let chroot = Chroot::new(&layout.root, args.chroot.existing, Arc::clone(registry));
    chroot
        .initialize(
            args.archive.as_deref(),
            &layout.extra_dirs,
            layout.extra_mounts.clone(),
        )
        .with_context(|| format!("failed to initialize chroot {}", layout.root.display()))?;

    let provisioned = chroot
        .add_files(&args.copies)
        .context("failed to copy files into chroot");

    let outcome = provisioned.and_then(|()| {
        let processes = registry.processes();
        tracing::info!(root = %chroot.root_dir().display(), program = %program, "running command in chroot");
        chroot
            .run(|| processes.execute_live(program, program_args))
            .with_context(|| format!("`{program}` failed inside chroot"))
    });

    let closed = chroot
        .close(args.leave_on_disk)
        .with_context(|| format!("failed to clean up chroot {}", layout.root.display()));

    match (outcome, closed) {
        (Err(e), Err(cleanup)) => {
            tracing::error!(error = ?cleanup, "cleanup failed as well");
            Err(e)
        }
        (outcome, closed) => outcome.and(closed),
    }
}
