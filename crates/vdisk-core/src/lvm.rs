//! LVM volume group activation and creation.
//!
//! Activation is global OS state keyed by the volume group name, not by any
//! handle this crate owns: two sessions using the same name are not isolated
//! from each other and must be serialized by the caller.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use vdisk_common::error::{Result, VdiskError};

use crate::process::{self, CommandRunner, Tool};
use crate::teardown::{self, Teardown};

/// Logical volumes of an active volume group, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogicalVolumes(BTreeMap<String, PathBuf>);

impl LogicalVolumes {
    /// Device path of the volume called `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Path> {
        self.0.get(name).map(PathBuf::as_path)
    }

    /// Device path of the volume called `name`, which must exist.
    ///
    /// # Errors
    ///
    /// Returns [`VdiskError::InvalidLayout`] if there is no such volume.
    pub fn require(&self, name: &str) -> Result<&Path> {
        self.get(name).ok_or_else(|| VdiskError::InvalidLayout {
            message: format!(
                "logical volume {name:?} missing (found: {})",
                self.names().collect::<Vec<_>>().join(", ")
            ),
        })
    }

    /// Volume names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// `(name, device)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_path()))
    }

    /// Number of volumes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the group has no volumes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, PathBuf)> for LogicalVolumes {
    fn from_iter<I: IntoIterator<Item = (String, PathBuf)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// How large a logical volume should be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeSize {
    /// A fixed size in `lvcreate -L` syntax, e.g. `512M`.
    Fixed(String),
    /// Whatever is left in the group.
    RemainingFree,
}

/// A logical volume to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalVolumeSpec {
    /// Volume name, e.g. `root`.
    pub name: &'static str,
    /// Requested size.
    pub size: VolumeSize,
}

/// Activates, queries and creates LVM volume groups.
pub struct VolumeGroupActivator<'r> {
    runner: &'r dyn CommandRunner,
}

impl<'r> VolumeGroupActivator<'r> {
    /// Creates an activator issuing commands through `runner`.
    #[must_use]
    pub fn new(runner: &'r dyn CommandRunner) -> Self {
        Self { runner }
    }

    fn lvm(&self) -> Tool<'r> {
        Tool::new(self.runner, "lvm")
    }

    /// Activates `name` and resolves its logical volumes.
    ///
    /// If listing fails after activation, the group is deactivated again
    /// before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if `vgchange`, `udevadm settle` or `lvdisplay` fails.
    pub fn activate(&self, name: &str) -> Result<LogicalVolumes> {
        let _ = self.lvm().run(["vgchange", "-a", "y", name])?;
        tracing::info!(volume_group = name, "volume group activated");

        let listed = process::settle(self.runner).and_then(|()| {
            self.lvm()
                .capture(["lvdisplay", "-c", name])
                .map(|output| parse_lvdisplay(&output.stdout))
        });

        match listed {
            Ok(volumes) => {
                tracing::debug!(volume_group = name, volumes = ?volumes.names().collect::<Vec<_>>(), "logical volumes resolved");
                Ok(volumes)
            }
            Err(e) => {
                let cleanup = self.deactivate(name).err().map(VdiskError::into_failures);
                Err(e.with_suppressed(cleanup.unwrap_or_default()))
            }
        }
    }

    /// Deactivates `name` and waits for its device nodes to disappear.
    ///
    /// # Errors
    ///
    /// Returns [`VdiskError::Teardown`] listing every failed step.
    pub fn deactivate(&self, name: &str) -> Result<()> {
        let mut teardown = Teardown::new();
        teardown.attempt(
            "deactivate volume group",
            self.lvm().run(["vgchange", "-a", "n", name]).map(drop),
        );
        teardown.attempt("settle devices", process::settle(self.runner));
        if teardown.is_clean() {
            tracing::info!(volume_group = name, "volume group deactivated");
        }
        teardown.finish()
    }

    /// Activates `name`, runs `body`, and always deactivates.
    ///
    /// # Errors
    ///
    /// Returns the activation error, the body's error (with deactivation
    /// failures suppressed), or the deactivation error.
    pub fn with_active<T>(
        &self,
        name: &str,
        body: impl FnOnce(&LogicalVolumes) -> Result<T>,
    ) -> Result<T> {
        teardown::scoped(|| self.activate(name), |_| self.deactivate(name), body)
    }

    /// Initializes `physical_volume`, creates group `name` on it, and carves
    /// out `volumes` in order.
    ///
    /// # Errors
    ///
    /// Returns an error if any `lvm` command fails.
    pub fn create(
        &self,
        name: &str,
        physical_volume: &Path,
        volumes: &[LogicalVolumeSpec],
    ) -> Result<()> {
        let lvm = self.lvm();
        let _ = lvm.run([OsStr::new("pvcreate"), physical_volume.as_os_str()])?;
        let _ = lvm.run([
            OsStr::new("vgcreate"),
            OsStr::new(name),
            physical_volume.as_os_str(),
        ])?;
        for volume in volumes {
            let (flag, size) = match &volume.size {
                VolumeSize::Fixed(size) => ("-L", size.as_str()),
                VolumeSize::RemainingFree => ("-l", "100%FREE"),
            };
            let _ = lvm.run(["lvcreate", flag, size, "-n", volume.name, name])?;
        }
        tracing::info!(volume_group = name, pv = %physical_volume.display(), count = volumes.len(), "volume group created");
        Ok(())
    }
}

/// Builds the name → device map from `lvm lvdisplay -c` output.
///
/// Each line is colon-delimited with the device path in field 0; the volume
/// name is the last path segment.
#[must_use]
pub fn parse_lvdisplay(lines: &[String]) -> LogicalVolumes {
    lines
        .iter()
        .filter_map(|line| {
            let device = line.split(':').next()?.trim();
            let name = device.rsplit('/').next()?;
            if name.is_empty() {
                return None;
            }
            Some((name.to_owned(), PathBuf::from(device)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;

    #[test]
    fn activate_resolves_root_and_swap() {
        let runner = ScriptedRunner::new().with_standard_image();
        let volumes = VolumeGroupActivator::new(&runner)
            .activate("VolGroup00")
            .unwrap();
        assert_eq!(volumes.names().collect::<Vec<_>>(), vec!["root", "swap"]);
        let root = volumes.get("root").unwrap();
        let swap = volumes.get("swap").unwrap();
        assert_ne!(root, swap);
        assert_eq!(root, Path::new("/dev/VolGroup00/root"));
        assert_eq!(
            runner.calls(),
            vec![
                "lvm vgchange -a y VolGroup00",
                "udevadm settle",
                "lvm lvdisplay -c VolGroup00",
            ]
        );
    }

    #[test]
    fn activate_deactivates_when_listing_fails() {
        let runner = ScriptedRunner::new().fail("lvm lvdisplay", 5);
        let err = VolumeGroupActivator::new(&runner)
            .activate("VolGroup00")
            .unwrap_err();
        assert!(matches!(err, VdiskError::CommandFailed { exit_code: 5, .. }));
        assert!(runner.calls().contains(&"lvm vgchange -a n VolGroup00".to_owned()));
    }

    #[test]
    fn deactivate_settles_even_when_vgchange_fails() {
        let runner = ScriptedRunner::new().fail("lvm vgchange -a n", 5);
        let err = VolumeGroupActivator::new(&runner)
            .deactivate("VolGroup00")
            .unwrap_err();
        assert!(matches!(err, VdiskError::Teardown { .. }));
        assert_eq!(
            runner.calls(),
            vec!["lvm vgchange -a n VolGroup00", "udevadm settle"]
        );
    }

    #[test]
    fn create_issues_pv_vg_and_lv_commands() {
        let runner = ScriptedRunner::new();
        VolumeGroupActivator::new(&runner)
            .create(
                "vg0",
                Path::new("/dev/mapper/loop0p2"),
                &[
                    LogicalVolumeSpec {
                        name: "root",
                        size: VolumeSize::Fixed("4096m".into()),
                    },
                    LogicalVolumeSpec {
                        name: "swap",
                        size: VolumeSize::RemainingFree,
                    },
                ],
            )
            .unwrap();
        assert_eq!(
            runner.calls(),
            vec![
                "lvm pvcreate /dev/mapper/loop0p2",
                "lvm vgcreate vg0 /dev/mapper/loop0p2",
                "lvm lvcreate -L 4096m -n root vg0",
                "lvm lvcreate -l 100%FREE -n swap vg0",
            ]
        );
    }

    #[test]
    fn require_missing_volume_is_invalid_layout() {
        let volumes = parse_lvdisplay(&["/dev/vg/root:vg:3".to_owned()]);
        assert!(volumes.require("root").is_ok());
        assert!(matches!(
            volumes.require("boot"),
            Err(VdiskError::InvalidLayout { .. })
        ));
    }
}
