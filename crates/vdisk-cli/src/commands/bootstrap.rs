//! `vdisk <image> bootstrap`: debootstrap a base system.

use clap::Args;
use vdisk_actions::ActionContext;
use vdisk_actions::bootstrap::{self, BootstrapOptions};
use vdisk_common::constants;

/// Arguments for the `bootstrap` command.
#[derive(Args, Debug)]
pub struct BootstrapArgs {
    /// Distribution suite to install.
    #[arg(long, default_value = constants::DEFAULT_SUITE)]
    pub suite: String,

    /// Architecture to install.
    #[arg(long, default_value = constants::DEFAULT_ARCH)]
    pub arch: String,
}

/// Executes the `bootstrap` command.
///
/// # Errors
///
/// Returns an error if the image is missing or debootstrap fails.
pub fn execute(ctx: &ActionContext<'_>, args: BootstrapArgs) -> anyhow::Result<()> {
    let options = BootstrapOptions {
        suite: args.suite,
        arch: args.arch,
    };
    bootstrap::run(ctx, &options)?;
    Ok(())
}
