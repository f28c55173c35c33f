//! # rsmith: rootsmith CLI
//!
//! Creates a chroot, runs one command inside it, and tears it down again.
//! Interrupting the process unmounts and removes every chroot it created.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

mod commands;
mod logging;
mod mounts;
mod output;

use clap::Parser;
use rootsmith_common::config::RootsmithConfig;

use crate::commands::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => RootsmithConfig::load(path)?,
        None => RootsmithConfig::default(),
    };

    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    let log_file = cli.log_file.as_deref().or(config.log_file.as_deref());
    logging::init(level, log_file, cli.log_json)?;

    commands::execute(cli.command, &config)
}
