//! `rsmith plan`: Show what a chroot would look like without creating it.

use anyhow::Context;
use clap::Args;
use rootsmith_common::config::RootsmithConfig;

use super::ChrootArgs;
use crate::output;

/// Arguments for the `plan` command.
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Chroot layout to describe.
    #[command(flatten)]
    pub chroot: ChrootArgs,
}

/// Executes the `plan` command.
///
/// Prints the directories that would be created, the order mounts would be
/// applied in, and the order they would be torn down in. Touches nothing.
///
/// # Errors
///
/// Returns an error if the existence of the root cannot be checked.
pub fn execute(args: &PlanArgs, config: &RootsmithConfig) -> anyhow::Result<()> {
    let layout = args.chroot.layout(config);
    let exists = layout
        .root
        .try_exists()
        .with_context(|| format!("failed to inspect {}", layout.root.display()))?;

    println!("Chroot plan for: {}", layout.root.display());
    println!("{}", output::rule(48));
    println!();

    let status = match (args.chroot.existing, exists) {
        (true, true) => "existing directory",
        (true, false) => "missing, but --existing expects it: run would fail",
        (false, false) => "created fresh",
        (false, true) => "already exists: run would refuse to take it over",
    };
    println!("  Root: {status}");

    if !layout.extra_dirs.is_empty() {
        println!();
        println!("  Directories:");
        for dir in &layout.extra_dirs {
            println!("    {}", dir.display());
        }
    }

    println!();
    println!("  Mount order:");
    for line in output::numbered_mounts(&layout.mount_order(), &layout.root) {
        println!("{line}");
    }

    println!();
    println!("  Teardown order:");
    for line in output::numbered_mounts(&layout.teardown_order(), &layout.root) {
        println!("{line}");
    }

    Ok(())
}
