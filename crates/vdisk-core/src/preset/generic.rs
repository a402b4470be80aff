//! BIOS-booting layout with `/boot`, `/` and swap all on LVM.

use std::ffi::OsStr;
use std::path::Path;

use vdisk_common::constants::GENERIC_BOOT_SIZE;
use vdisk_common::error::{Result, VdiskError};
use vdisk_common::types::ByteSize;

use super::{PartitionSpec, PartitionTable, TableLabel};
use crate::devicemap;
use crate::loopback::LoopDevice;
use crate::lvm::{LogicalVolumeSpec, VolumeSize};
use crate::process::{self, CommandRunner};

pub(super) fn partition_table() -> PartitionTable {
    PartitionTable {
        label: TableLabel::Gpt,
        partitions: vec![
            // GRUB core image lives in the BIOS boot partition.
            PartitionSpec {
                name: "nofs",
                start: "1",
                end: "2",
                flag: "bios_grub",
            },
            PartitionSpec {
                name: "primary",
                start: "2",
                end: "-1",
                flag: "lvm",
            },
        ],
    }
}

pub(super) fn logical_volumes(root_size: ByteSize) -> Vec<LogicalVolumeSpec> {
    vec![
        LogicalVolumeSpec {
            name: "boot",
            size: VolumeSize::Fixed(GENERIC_BOOT_SIZE.to_owned()),
        },
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

/// Writes a loopback `device.map` and installs GRUB onto the loop device.
pub(super) fn setup_boot(
    runner: &dyn CommandRunner,
    device: &LoopDevice,
    root: &Path,
) -> Result<()> {
    let grub_dir = root.join("boot/grub");
    let map_path = grub_dir.join("device.map");
    std::fs::create_dir_all(&grub_dir).map_err(|e| VdiskError::Io {
        path: grub_dir.clone(),
        source: e,
    })?;

    let mut contents = devicemap::loopback_device_map(device).join("\n");
    contents.push('\n');
    std::fs::write(&map_path, contents).map_err(|e| VdiskError::Io {
        path: map_path.clone(),
        source: e,
    })?;
    tracing::debug!(path = %map_path.display(), "wrote loopback device map");

    let install = process::chroot(root, "grub-install")
        .arg("--no-floppy")
        .arg(OsStr::new(device.path()));
    let _ = runner.run(&install)?;
    tracing::info!(device = %device.path().display(), "grub installed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackAttacher;
    use crate::testing::ScriptedRunner;

    #[test]
    fn boot_volume_comes_first() {
        let volumes = logical_volumes(ByteSize::from_bytes(1 << 30));
        let names: Vec<_> = volumes.iter().map(|v| v.name).collect();
        assert_eq!(names, vec!["boot", "root", "swap"]);
        assert_eq!(volumes[1].size, VolumeSize::Fixed("1024m".into()));
    }

    #[test]
    fn setup_boot_writes_map_then_runs_grub_install() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = ScriptedRunner::new().with_standard_image();
        let device = LoopbackAttacher::new(&runner)
            .attach(Path::new("disk.img"))
            .unwrap();

        setup_boot(&runner, &device, dir.path()).unwrap();

        let map = std::fs::read_to_string(dir.path().join("boot/grub/device.map")).unwrap();
        assert_eq!(
            map,
            "(hd0) /dev/loop0\n(hd0,0) /dev/mapper/loop0p1\n(hd0,1) /dev/mapper/loop0p2\n"
        );
        assert_eq!(
            runner.calls().last().unwrap(),
            &format!(
                "chroot {} grub-install --no-floppy /dev/loop0",
                dir.path().display()
            )
        );
    }

    #[test]
    fn grub_install_failure_propagates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = ScriptedRunner::new()
            .with_standard_image()
            .fail("chroot", 1);
        let device = LoopbackAttacher::new(&runner)
            .attach(Path::new("disk.img"))
            .unwrap();
        let err = setup_boot(&runner, &device, dir.path()).unwrap_err();
        assert!(matches!(err, VdiskError::CommandFailed { exit_code: 1, .. }));
    }
}
