//! `create`: allocate a new image and lay out its disks.

use std::fs::OpenOptions;

use vdisk_common::error::{Result, VdiskError};
use vdisk_common::types::ByteSize;

use crate::context::ActionContext;

/// Options for [`run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateOptions {
    /// Size of the image file.
    pub size: ByteSize,
    /// Overwrite an existing image.
    pub force: bool,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            size: ByteSize::from_bytes(8 << 30),
            force: false,
        }
    }
}

/// Creates a sparse image file of the requested size, then partitions,
/// creates the volume group and formats it according to the preset.
///
/// # Errors
///
/// Returns [`VdiskError::Config`] if the image exists and `force` is not
/// set, or any error from allocating or setting up the disks.
pub fn run(ctx: &ActionContext<'_>, options: &CreateOptions) -> Result<()> {
    let image = &ctx.settings().image_path;
    if image.exists() && !options.force {
        return Err(VdiskError::Config {
            message: format!("path already exists: {}", image.display()),
        });
    }

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(image)
        .map_err(|e| VdiskError::Io {
            path: image.clone(),
            source: e,
        })?;
    file.set_len(options.size.bytes()).map_err(|e| VdiskError::Io {
        path: image.clone(),
        source: e,
    })?;
    tracing::info!(image = %image.display(), size = %options.size, "allocated image");

    ctx.preset().setup_disks(ctx.runner())
}
