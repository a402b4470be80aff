//! Disk layout presets.
//!
//! The set of layouts is closed: [`PresetKind::Generic`] puts everything,
//! `/boot` included, on LVM behind a GPT table with a BIOS-boot stub, while
//! [`PresetKind::Ec2`] uses an MBR table with a raw `/boot` partition because
//! pv-grub reads `/boot/grub/menu.lst` from the first partition.
//!
//! The variant is fixed when the [`Preset`] is built and every layout
//! decision dispatches on it from here.

pub mod ec2;
pub mod generic;

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use vdisk_common::config::Settings;
use vdisk_common::error::Result;
use vdisk_common::types::{ByteSize, PresetKind};

use crate::loopback::{LoopDevice, LoopbackAttacher};
use crate::lvm::{LogicalVolumeSpec, LogicalVolumes, VolumeGroupActivator};
use crate::mount::MountOptions;
use crate::process::{CommandRunner, Tool};

/// Where and how large the image's filesystems are.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetParams {
    /// Disk image file.
    pub image_path: PathBuf,
    /// Volume group created on and activated from the image.
    pub volume_group: String,
    /// Size of the `root` logical volume.
    pub root_size: ByteSize,
    /// Directory the root filesystem is mounted on.
    pub mountpoint: PathBuf,
}

impl From<&Settings> for PresetParams {
    fn from(settings: &Settings) -> Self {
        Self {
            image_path: settings.image_path.clone(),
            volume_group: settings.volume_group.clone(),
            root_size: settings.root_size,
            mountpoint: settings.mountpoint.clone(),
        }
    }
}

/// Partition table label understood by `parted mklabel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableLabel {
    /// GUID partition table.
    Gpt,
    /// DOS/MBR partition table.
    Msdos,
}

impl TableLabel {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Gpt => "gpt",
            Self::Msdos => "msdos",
        }
    }
}

/// One partition in `parted mkpart` terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSpec {
    /// Partition name (GPT) or type (MBR).
    pub name: &'static str,
    /// Start, in parted units.
    pub start: &'static str,
    /// End, in parted units; `-1` is the end of the disk.
    pub end: &'static str,
    /// Flag switched on for the partition.
    pub flag: &'static str,
}

/// Partition table a preset writes onto a fresh image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionTable {
    /// Table label.
    pub label: TableLabel,
    /// Partitions in table order.
    pub partitions: Vec<PartitionSpec>,
}

impl PartitionTable {
    /// The `parted` argument lists that create this table, ending in `print`.
    #[must_use]
    pub fn parted_commands(&self) -> Vec<Vec<String>> {
        let mut commands = vec![vec!["mklabel".to_owned(), self.label.as_str().to_owned()]];
        for (index, part) in self.partitions.iter().enumerate() {
            commands.push(vec![
                "mkpart".to_owned(),
                part.name.to_owned(),
                part.start.to_owned(),
                part.end.to_owned(),
                "set".to_owned(),
                (index + 1).to_string(),
                part.flag.to_owned(),
                "on".to_owned(),
            ]);
        }
        commands.push(vec!["print".to_owned()]);
        commands
    }
}

/// A mount a preset layers into every session after the root filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraMount {
    /// Device or directory mounted.
    pub source: PathBuf,
    /// Absolute mount target.
    pub target: PathBuf,
    /// Mount flags.
    pub options: MountOptions,
}

/// A disk layout strategy bound to one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preset {
    kind: PresetKind,
    params: PresetParams,
}

impl Preset {
    /// Binds layout `kind` to the image described by `params`.
    #[must_use]
    pub const fn new(kind: PresetKind, params: PresetParams) -> Self {
        Self { kind, params }
    }

    /// Layout variant.
    #[must_use]
    pub const fn kind(&self) -> PresetKind {
        self.kind
    }

    /// Image parameters.
    #[must_use]
    pub const fn params(&self) -> &PresetParams {
        &self.params
    }

    /// Partition table written by [`Preset::setup_disks`].
    #[must_use]
    pub fn partition_table(&self) -> PartitionTable {
        match self.kind {
            PresetKind::Generic => generic::partition_table(),
            PresetKind::Ec2 => ec2::partition_table(),
        }
    }

    /// Logical volumes carved out of the volume group, in creation order.
    #[must_use]
    pub fn logical_volumes(&self) -> Vec<LogicalVolumeSpec> {
        match self.kind {
            PresetKind::Generic => generic::logical_volumes(self.params.root_size),
            PresetKind::Ec2 => ec2::logical_volumes(self.params.root_size),
        }
    }

    /// Partitions a fresh image, creates the volume group and its logical
    /// volumes, and formats them.
    ///
    /// The loop device and volume group are released before returning,
    /// whether or not setup succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`vdisk_common::error::VdiskError::InvalidLayout`] if the
    /// image ends up with fewer than two partitions, or the first failing
    /// command's error.
    pub fn setup_disks(&self, runner: &dyn CommandRunner) -> Result<()> {
        let image = self.params.image_path.as_path();
        tracing::info!(image = %image.display(), preset = %self.kind, "partitioning image");

        let parted = Tool::new(runner, "parted").prefix([
            OsStr::new("-s"),
            OsStr::new("--"),
            image.as_os_str(),
        ]);
        for command in self.partition_table().parted_commands() {
            let _ = parted.run(&command)?;
        }

        LoopbackAttacher::new(runner).with_attached(image, |device| {
            let physical_volume = device.partition(1)?;
            if self.kind == PresetKind::Ec2 {
                ec2::format_boot_partition(runner, device)?;
            }

            let lvm = VolumeGroupActivator::new(runner);
            let volumes = self.logical_volumes();
            lvm.create(&self.params.volume_group, physical_volume, &volumes)?;
            lvm.with_active(&self.params.volume_group, |active| {
                tracing::info!("formatting logical volumes");
                format_volumes(runner, &volumes, active)
            })
        })
    }

    /// Mounts this preset adds to every session, given the attached device.
    ///
    /// # Errors
    ///
    /// Returns [`vdisk_common::error::VdiskError::InvalidLayout`] if a
    /// partition the preset mounts does not exist.
    pub fn extra_mounts(&self, device: &LoopDevice) -> Result<Vec<ExtraMount>> {
        match self.kind {
            PresetKind::Generic => Ok(Vec::new()),
            PresetKind::Ec2 => ec2::extra_mounts(device, &self.params.mountpoint),
        }
    }

    /// Makes the mounted system at `root` bootable.
    ///
    /// # Errors
    ///
    /// Returns an error if the boot files cannot be written or the boot
    /// loader installation fails.
    pub fn setup_boot(
        &self,
        runner: &dyn CommandRunner,
        device: &LoopDevice,
        root: &Path,
    ) -> Result<()> {
        match self.kind {
            PresetKind::Generic => generic::setup_boot(runner, device, root),
            PresetKind::Ec2 => ec2::setup_boot(root),
        }
    }
}

fn format_volumes(
    runner: &dyn CommandRunner,
    specs: &[LogicalVolumeSpec],
    active: &LogicalVolumes,
) -> Result<()> {
    let mkfs = Tool::new(runner, "mkfs.ext4");
    let mkswap = Tool::new(runner, "mkswap");
    for spec in specs {
        let device = active.require(spec.name)?;
        let _ = if spec.name == "swap" {
            mkswap.run([OsStr::new("-f"), device.as_os_str()])?
        } else {
            mkfs.run([device.as_os_str()])?
        };
    }
    Ok(())
}
