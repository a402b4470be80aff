//! Layout for pv-grub booted EC2 instances.
//!
//! pv-grub looks for `/boot/grub/menu.lst` on the first partition, so `/boot`
//! is a plain ext4 partition there and the rest of the disk is LVM.

use std::ffi::OsStr;
use std::path::Path;

use vdisk_common::error::{Result, VdiskError};
use vdisk_common::types::ByteSize;

use super::{ExtraMount, PartitionSpec, PartitionTable, TableLabel};
use crate::loopback::LoopDevice;
use crate::lvm::{LogicalVolumeSpec, VolumeSize};
use crate::mount::MountOptions;
use crate::process::{CommandRunner, Tool};

pub(super) fn partition_table() -> PartitionTable {
    PartitionTable {
        label: TableLabel::Msdos,
        partitions: vec![
            PartitionSpec {
                name: "primary",
                start: "1",
                end: "512",
                flag: "boot",
            },
            PartitionSpec {
                name: "primary",
                start: "512",
                end: "-1",
                flag: "lvm",
            },
        ],
    }
}

pub(super) fn logical_volumes(root_size: ByteSize) -> Vec<LogicalVolumeSpec> {
    vec![
        LogicalVolumeSpec {
            name: "root",
            size: VolumeSize::Fixed(root_size.as_lvm_size()),
        },
        LogicalVolumeSpec {
            name: "swap",
            size: VolumeSize::RemainingFree,
        },
    ]
}

pub(super) fn format_boot_partition(runner: &dyn CommandRunner, device: &LoopDevice) -> Result<()> {
    let boot = device.partition(0)?;
    let _ = Tool::new(runner, "mkfs.ext4").run([OsStr::new(boot)])?;
    Ok(())
}

pub(super) fn extra_mounts(device: &LoopDevice, mountpoint: &Path) -> Result<Vec<ExtraMount>> {
    Ok(vec![ExtraMount {
        source: device.partition(0)?.to_path_buf(),
        target: mountpoint.join("boot"),
        options: MountOptions::plain(),
    }])
}

/// Links `/boot/boot` back to `/boot` so pv-grub finds
/// `/boot/grub/menu.lst` on the raw partition.
pub(super) fn setup_boot(root: &Path) -> Result<()> {
    let boot_dir = root.join("boot");
    let link = boot_dir.join("boot");
    if link.symlink_metadata().is_ok() {
        if std::fs::read_link(&link).is_ok_and(|target| target == Path::new(".")) {
            tracing::debug!(path = %link.display(), "boot link already present");
            return Ok(());
        }
        return Err(VdiskError::ResourceUnavailable {
            kind: "boot link",
            id: link.display().to_string(),
        });
    }
    std::fs::create_dir_all(&boot_dir).map_err(|e| VdiskError::Io {
        path: boot_dir.clone(),
        source: e,
    })?;
    std::os::unix::fs::symlink(".", &link).map_err(|e| VdiskError::Io {
        path: link.clone(),
        source: e,
    })?;
    tracing::info!(path = %link.display(), "created boot link");
    Ok(())
}
