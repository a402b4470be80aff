//! GRUB `device.map` generation.

use std::path::Path;

use crate::loopback::LoopDevice;

/// Device map for installing GRUB onto a loop-attached image.
///
/// The loop device is `(hd0)` and each mapped partition `(hd0,<n>)`, counting
/// from zero.
#[must_use]
pub fn loopback_device_map(device: &LoopDevice) -> Vec<String> {
    std::iter::once(format!("(hd0) {}", device.path().display()))
        .chain(
            device
                .partitions()
                .iter()
                .enumerate()
                .map(|(index, partition)| format!("(hd0,{index}) {}", partition.display())),
        )
        .collect()
}

/// Device map for the installed system, booting from `/dev/sda`.
///
/// Each volume becomes `(hd0,<n>)` in the order given.
#[must_use]
pub fn installed_device_map<'a, I>(volumes: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a Path>,
{
    std::iter::once("(hd0) /dev/sda".to_owned())
        .chain(
            volumes
                .into_iter()
                .enumerate()
                .map(|(index, volume)| format!("(hd0,{index}) {}", volume.display())),
        )
        .collect()
}
