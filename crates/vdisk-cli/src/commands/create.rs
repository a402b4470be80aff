//! `vdisk <image> create`: allocate and lay out a new image.

use clap::Args;
use vdisk_actions::ActionContext;
use vdisk_actions::create::{self, CreateOptions};
use vdisk_common::constants;
use vdisk_common::types::ByteSize;

use crate::output::format_bytes;

/// Arguments for the `create` command.
#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Size of the image file, e.g. `8G` (binary) or `8g` (decimal).
    #[arg(short, long, default_value = constants::DEFAULT_IMAGE_SIZE)]
    pub size: ByteSize,

    /// Overwrite an existing image.
    #[arg(short, long)]
    pub force: bool,
}

/// Executes the `create` command.
///
/// # Errors
///
/// Returns an error if the image exists without `--force` or disk setup
/// fails.
pub fn execute(ctx: &ActionContext<'_>, args: &CreateArgs) -> anyhow::Result<()> {
    let options = CreateOptions {
        size: args.size,
        force: args.force,
    };
    create::run(ctx, &options)?;

    #[allow(clippy::print_stderr)]
    {
        eprintln!(
            "created {} ({}, {} layout)",
            ctx.settings().image_path.display(),
            format_bytes(args.size.bytes()),
            ctx.settings().preset
        );
    }
    Ok(())
}
