//! `vdisk <image> install`: install packages and make the image bootable.

use std::path::PathBuf;

use clap::Args;
use vdisk_actions::ActionContext;
use vdisk_actions::install::{self, InstallOptions};

/// Arguments for the `install` command.
#[derive(Args, Debug)]
pub struct InstallArgs {
    /// dpkg selections file; defaults to `<root>/selections/default`.
    pub selections: Option<PathBuf>,

    /// Only download the selected packages.
    #[arg(short, long)]
    pub download: bool,
}

/// Executes the `install` command.
///
/// # Errors
///
/// Returns an error if an input is missing or invalid, or any installation
/// step fails.
pub fn execute(ctx: &ActionContext<'_>, args: InstallArgs) -> anyhow::Result<()> {
    let options = InstallOptions {
        selections: args.selections,
        download_only: args.download,
    };
    install::run(ctx, &options)?;
    Ok(())
}
