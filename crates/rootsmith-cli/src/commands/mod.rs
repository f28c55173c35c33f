//! CLI command definitions and dispatch.

pub mod plan;
pub mod run;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use rootsmith_common::config::RootsmithConfig;
use rootsmith_common::constants::BIN_NAME;
use rootsmith_core::filesystem::mount::{self, MountSpec};

use crate::mounts::{BindArg, OverlayArg, parse_bind, parse_overlay};

/// rootsmith: build roots you can enter, and always get out of.
#[derive(Parser, Debug)]
#[command(name = BIN_NAME, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Path to a JSON configuration file.
    #[arg(long, global = true, env = "ROOTSMITH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace). `RUST_LOG` wins if set.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Append log output to this file instead of stderr.
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a chroot, run a command inside it, and tear it down.
    Run(run::RunArgs),
    /// Show the mount and teardown order for a chroot without creating it.
    Plan(plan::PlanArgs),
}

/// Where the chroot lives and what gets mounted into it.
#[derive(Args, Debug)]
pub struct ChrootArgs {
    /// Chroot root directory. Relative paths land under the configured
    /// work directory.
    #[arg(long)]
    pub root: PathBuf,

    /// Use an existing directory instead of creating a fresh one.
    #[arg(long)]
    pub existing: bool,

    /// Extra directory to create inside the chroot before mounting.
    #[arg(long = "dir", value_name = "DIR")]
    pub dirs: Vec<PathBuf>,

    /// Bind-mount a host path into the chroot.
    #[arg(long = "bind", value_name = "SRC:DST", value_parser = parse_bind)]
    pub binds: Vec<BindArg>,

    /// Overlay mount: host lower dir, chroot upper and work dirs, target.
    #[arg(long = "overlay", value_name = "LOWER:UPPER:WORK:TARGET", value_parser = parse_overlay)]
    pub overlays: Vec<OverlayArg>,
}

/// A resolved chroot layout, ready for [`rootsmith_runtime::Chroot::initialize`].
#[derive(Debug, Clone)]
pub struct ChrootLayout {
    /// Absolute root directory.
    pub root: PathBuf,
    /// Directories created under the root before mounting.
    pub extra_dirs: Vec<PathBuf>,
    /// Mounts applied after the default pseudo-filesystems.
    pub extra_mounts: Vec<MountSpec>,
}

impl ChrootLayout {
    /// Every mount in application order, defaults first.
    pub fn mount_order(&self) -> Vec<MountSpec> {
        let mut mounts = mount::default_mounts();
        mounts.extend(self.extra_mounts.iter().cloned());
        mounts
    }

    /// Every mount in teardown order.
    pub fn teardown_order(&self) -> Vec<MountSpec> {
        let mut mounts = self.mount_order();
        mount::sort_for_teardown(&mut mounts);
        mounts
    }
}

impl ChrootArgs {
    /// Resolves the root against `config` and builds the extra mounts.
    pub fn layout(&self, config: &RootsmithConfig) -> ChrootLayout {
        let root = config.resolve_root(&self.root);
        let mut extra_dirs = self.dirs.clone();
        let mut extra_mounts: Vec<MountSpec> = self.binds.iter().map(BindArg::to_mount).collect();

        for overlay in &self.overlays {
            let (spec, needed) = overlay.to_mount(&root);
            extra_dirs.extend(needed);
            extra_mounts.push(spec);
        }

        ChrootLayout {
            root,
            extra_dirs,
            extra_mounts,
        }
    }
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(command: Command, config: &RootsmithConfig) -> anyhow::Result<()> {
    match command {
        Command::Run(args) => run::execute(&args, config),
        Command::Plan(args) => plan::execute(&args, config),
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn relative_root_lands_in_work_dir() {
        let cli = Cli::parse_from(["rsmith", "plan", "--root", "worker"]);
        let Command::Plan(args) = cli.command else {
            panic!("expected plan");
        };
        let layout = args.chroot.layout(&RootsmithConfig::default());
        assert_eq!(layout.root, Path::new("/var/lib/rootsmith/worker"));
    }

    #[test]
    fn overlay_directories_join_extra_dirs() {
        let cli = Cli::parse_from([
            "rsmith",
            "plan",
            "--root",
            "/build/root",
            "--dir",
            "/var/cache",
            "--bind",
            "/srv/repo:/repo",
            "--overlay",
            "/out:/upper:/work:/merged",
        ]);
        let Command::Plan(args) = cli.command else {
            panic!("expected plan");
        };
        let layout = args.chroot.layout(&RootsmithConfig::default());

        assert_eq!(
            layout.extra_dirs,
            ["/var/cache", "/upper", "/work"].map(PathBuf::from)
        );
        let targets: Vec<_> = layout
            .mount_order()
            .iter()
            .map(|m| m.target().to_path_buf())
            .collect();
        assert_eq!(
            targets,
            ["/dev", "/proc", "/sys", "/run", "/dev/pts", "/repo", "/merged"].map(PathBuf::from)
        );
    }

    #[test]
    fn teardown_order_is_deepest_first() {
        let layout = ChrootLayout {
            root: PathBuf::from("/t1"),
            extra_dirs: Vec::new(),
            extra_mounts: Vec::new(),
        };
        let targets: Vec<_> = layout
            .teardown_order()
            .iter()
            .map(|m| m.target().to_path_buf())
            .collect();
        assert_eq!(
            targets,
            ["/sys", "/run", "/proc", "/dev/pts", "/dev"].map(PathBuf::from)
        );
    }

    #[test]
    fn run_requires_a_command() {
        assert!(Cli::try_parse_from(["rsmith", "run", "--root", "/r"]).is_err());
        let cli = Cli::try_parse_from(["rsmith", "run", "--root", "/r", "--", "echo", "hi"]).unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.command, ["echo", "hi"]);
    }
}
