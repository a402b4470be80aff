//! # vdisk
//!
//! Builds and maintains bootable virtual disk images: create and partition
//! an image, debootstrap a base system into it, install and configure
//! packages, or just enter it with a shell.

mod commands;
mod output;

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::commands::Cli;

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // The running child shares our process group and receives the interrupt
    // itself; vdisk stays alive to unwind its mounts and devices.
    ctrlc::set_handler(|| {
        tracing::warn!("interrupt received, waiting for the running command to exit");
    })
    .context("failed to install interrupt handler")?;

    commands::execute(cli)
}
