//! Loop device attachment and partition mapping.
//!
//! An image file is bound to a free loop device with `losetup`, then `kpartx`
//! materializes one device-mapper node per partition. Partitions are only
//! valid while the loop device is attached.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use vdisk_common::constants::DEVICE_MAPPER_DIR;
use vdisk_common::error::{Result, VdiskError};

use crate::process::{self, CommandRunner, Tool};
use crate::teardown::{self, Teardown};

/// A loop device bound to an image, with its mapped partitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopDevice {
    path: PathBuf,
    image: PathBuf,
    partitions: Vec<PathBuf>,
}

impl LoopDevice {
    /// Kernel device path, e.g. `/dev/loop0`.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Image file backing the device.
    #[must_use]
    pub fn image(&self) -> &Path {
        &self.image
    }

    /// Partition device nodes in table order; index 0 is the first partition.
    #[must_use]
    pub fn partitions(&self) -> &[PathBuf] {
        &self.partitions
    }

    /// Returns partition `index`, or an error naming how many exist.
    ///
    /// # Errors
    ///
    /// Returns [`VdiskError::InvalidLayout`] if the partition does not exist.
    pub fn partition(&self, index: usize) -> Result<&Path> {
        self.partitions
            .get(index)
            .map(PathBuf::as_path)
            .ok_or_else(|| VdiskError::InvalidLayout {
                message: format!(
                    "{} has {} partition(s), partition {} required",
                    self.path.display(),
                    self.partitions.len(),
                    index + 1
                ),
            })
    }
}

/// Binds images to loop devices and maps their partitions.
pub struct LoopbackAttacher<'r> {
    runner: &'r dyn CommandRunner,
    mapper_dir: PathBuf,
}

impl<'r> LoopbackAttacher<'r> {
    /// Creates an attacher exposing partitions under `/dev/mapper`.
    #[must_use]
    pub fn new(runner: &'r dyn CommandRunner) -> Self {
        Self {
            runner,
            mapper_dir: PathBuf::from(DEVICE_MAPPER_DIR),
        }
    }

    /// Binds `image` to a free loop device and maps its partitions.
    ///
    /// If mapping fails the loop device is released before the error is
    /// returned; release failures are attached to it as suppressed.
    ///
    /// # Errors
    ///
    /// Returns an error if `losetup`, `kpartx` or `udevadm settle` fails, or
    /// if `losetup` does not report a device.
    pub fn attach(&self, image: &Path) -> Result<LoopDevice> {
        let output = Tool::new(self.runner, "losetup").capture([
            OsStr::new("--show"),
            OsStr::new("-f"),
            image.as_os_str(),
        ])?;
        let loop_path = output
            .first_line()
            .map(PathBuf::from)
            .ok_or_else(|| VdiskError::ResourceUnavailable {
                kind: "loop device",
                id: image.display().to_string(),
            })?;
        tracing::info!(image = %image.display(), device = %loop_path.display(), "loop device attached");

        match self.map_partitions(&loop_path) {
            Ok(partitions) => {
                tracing::debug!(device = %loop_path.display(), count = partitions.len(), "partitions mapped");
                Ok(LoopDevice {
                    path: loop_path,
                    image: image.to_path_buf(),
                    partitions,
                })
            }
            Err(e) => {
                tracing::warn!(device = %loop_path.display(), error = %e, "partition mapping failed, releasing loop device");
                let cleanup = self.release(&loop_path);
                Err(e.with_suppressed(cleanup.into_failures()))
            }
        }
    }

    fn map_partitions(&self, loop_path: &Path) -> Result<Vec<PathBuf>> {
        let output = Tool::new(self.runner, "kpartx").capture([
            OsStr::new("-v"),
            OsStr::new("-a"),
            loop_path.as_os_str(),
        ])?;
        process::settle(self.runner)?;
        Ok(parse_kpartx(&output.stdout, &self.mapper_dir))
    }

    /// Removes the partition mappings, then releases the loop binding.
    ///
    /// Both steps are attempted even if the first fails.
    ///
    /// # Errors
    ///
    /// Returns [`VdiskError::Teardown`] listing every failed step.
    pub fn detach(&self, device: &LoopDevice) -> Result<()> {
        let result = self.release(&device.path).finish();
        if result.is_ok() {
            tracing::info!(device = %device.path.display(), "loop device detached");
        }
        result
    }

    fn release(&self, loop_path: &Path) -> Teardown {
        let mut teardown = Teardown::new();
        teardown.attempt(
            "remove partition mappings",
            Tool::new(self.runner, "kpartx")
                .run([OsStr::new("-d"), loop_path.as_os_str()])
                .map(drop),
        );
        teardown.attempt(
            "release loop device",
            Tool::new(self.runner, "losetup")
                .run([OsStr::new("-d"), loop_path.as_os_str()])
                .map(drop),
        );
        teardown
    }

    /// Attaches `image`, runs `body`, and always detaches.
    ///
    /// # Errors
    ///
    /// Returns the attach error, the body's error (with detach failures
    /// suppressed), or the detach error.
    pub fn with_attached<T>(
        &self,
        image: &Path,
        body: impl FnOnce(&LoopDevice) -> Result<T>,
    ) -> Result<T> {
        teardown::scoped(|| self.attach(image), |device| self.detach(&device), body)
    }
}

/// Extracts device-mapper paths from `kpartx -v -a` output.
///
/// Lines look like `add map loop0p1 (253:0): 0 2048 linear 7:0 2048`; the
/// third word names the mapping. Other lines are ignored.
#[must_use]
pub fn parse_kpartx(lines: &[String], mapper_dir: &Path) -> Vec<PathBuf> {
    lines
        .iter()
        .filter_map(|line| {
            let mut words = line.split_whitespace();
            match (words.next(), words.next(), words.next()) {
                (Some("add"), Some("map"), Some(name)) => Some(mapper_dir.join(name)),
                _ => {
                    tracing::debug!(line = %line, "ignoring kpartx output line");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;

    #[test]
    fn parse_kpartx_builds_mapper_paths_in_order() {
        let lines = vec![
            "add map loop3p1 (253:0): 0 2048 linear 7:3 2048".to_owned(),
            "add map loop3p2 (253:1): 0 4096 linear 7:3 4096".to_owned(),
            "device-mapper: reload ioctl failed".to_owned(),
        ];
        let parts = parse_kpartx(&lines, Path::new("/dev/mapper"));
        assert_eq!(
            parts,
            vec![
                PathBuf::from("/dev/mapper/loop3p1"),
                PathBuf::from("/dev/mapper/loop3p2")
            ]
        );
    }

    #[test]
    fn attach_maps_partitions_after_binding() {
        let runner = ScriptedRunner::new().with_standard_image();
        let device = LoopbackAttacher::new(&runner)
            .attach(Path::new("disk.img"))
            .unwrap();
        assert_eq!(device.path(), Path::new("/dev/loop0"));
        assert_eq!(device.partitions().len(), 2);
        assert_eq!(device.partition(0).unwrap(), Path::new("/dev/mapper/loop0p1"));
        assert_eq!(
            runner.calls(),
            vec![
                "losetup --show -f disk.img",
                "kpartx -v -a /dev/loop0",
                "udevadm settle",
            ]
        );
    }

    #[test]
    fn attach_then_detach_releases_the_same_device() {
        let runner = ScriptedRunner::new().with_standard_image();
        let attacher = LoopbackAttacher::new(&runner);
        let device = attacher.attach(Path::new("disk.img")).unwrap();
        attacher.detach(&device).unwrap();
        let calls = runner.calls();
        assert_eq!(
            &calls[3..],
            &["kpartx -d /dev/loop0", "losetup -d /dev/loop0"]
        );
    }

    #[test]
    fn attach_fails_closed_when_mapping_fails() {
        let runner = ScriptedRunner::new()
            .with_standard_image()
            .fail("kpartx -v -a /dev/loop0", 1);
        let err = LoopbackAttacher::new(&runner)
            .attach(Path::new("disk.img"))
            .unwrap_err();
        assert!(matches!(err, VdiskError::CommandFailed { ref command, .. } if command == "kpartx"));
        assert_eq!(
            runner.calls(),
            vec![
                "losetup --show -f disk.img",
                "kpartx -v -a /dev/loop0",
                "kpartx -d /dev/loop0",
                "losetup -d /dev/loop0",
            ]
        );
    }

    #[test]
    fn attach_keeps_mapping_error_primary_when_release_fails() {
        let runner = ScriptedRunner::new()
            .with_standard_image()
            .fail("kpartx -v -a /dev/loop0", 1)
            .fail("losetup -d", 1);
        let err = LoopbackAttacher::new(&runner)
            .attach(Path::new("disk.img"))
            .unwrap_err();
        assert!(matches!(err.primary(), VdiskError::CommandFailed { command, .. } if command == "kpartx"));
        assert_eq!(err.suppressed().len(), 1);
    }

    #[test]
    fn attach_without_device_is_resource_unavailable() {
        let runner = ScriptedRunner::new().respond("losetup --show -f", &[]);
        let err = LoopbackAttacher::new(&runner)
            .attach(Path::new("disk.img"))
            .unwrap_err();
        assert!(matches!(err, VdiskError::ResourceUnavailable { .. }));
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn detach_attempts_every_step() {
        let runner = ScriptedRunner::new()
            .with_standard_image()
            .fail("kpartx -d", 1);
        let attacher = LoopbackAttacher::new(&runner);
        let device = attacher.attach(Path::new("disk.img")).unwrap();
        let err = attacher.detach(&device).unwrap_err();
        assert!(matches!(err, VdiskError::Teardown { ref failures } if failures.len() == 1));
        assert!(runner.calls().contains(&"losetup -d /dev/loop0".to_owned()));
    }

    #[test]
    fn partition_out_of_range_is_invalid_layout() {
        let runner = ScriptedRunner::new().respond("losetup --show -f", &["/dev/loop1"]);
        let device = LoopbackAttacher::new(&runner)
            .attach(Path::new("empty.img"))
            .unwrap();
        assert!(matches!(
            device.partition(0),
            Err(VdiskError::InvalidLayout { .. })
        ));
    }
}
