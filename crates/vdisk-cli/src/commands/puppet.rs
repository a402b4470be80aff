//! `vdisk <image> puppet`: run puppet inside the image.

use std::path::PathBuf;

use clap::Args;
use vdisk_actions::ActionContext;
use vdisk_actions::puppet::{self, PuppetOptions};

/// Arguments for the `puppet` command.
#[derive(Args, Debug)]
pub struct PuppetArgs {
    /// Directory mounted at `/puppet` inside the image.
    pub path: PathBuf,

    /// Fact passed to puppet, as `name=value`. Repeatable.
    #[arg(short = 'F', long = "fact")]
    pub facts: Vec<String>,

    /// Arguments passed to puppet.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

/// Executes the `puppet` command.
///
/// # Errors
///
/// Returns an error if a fact is malformed, the directory is missing, or
/// puppet fails.
pub fn execute(ctx: &ActionContext<'_>, args: PuppetArgs) -> anyhow::Result<()> {
    let options = PuppetOptions {
        path: args.path,
        facts: args.facts,
        args: args.args,
    };
    puppet::run(ctx, &options)?;
    Ok(())
}
