//! System-wide constants and defaults.

/// Application name used in CLI output.
pub const APP_NAME: &str = "vdisk";

/// Default volume group name.
pub const DEFAULT_VOLUME_GROUP: &str = "VolGroup00";

/// Default mount point, relative to the working directory.
pub const DEFAULT_MOUNTPOINT: &str = "tmp/mount";

/// Default shell used inside the chroot.
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Default `apt-get` binary used inside the chroot.
pub const DEFAULT_APT_GET: &str = "apt-get";

/// Default `dpkg` binary used inside the chroot.
pub const DEFAULT_DPKG: &str = "dpkg";

/// Default installation mirror handed to debootstrap.
pub const DEFAULT_MIRROR: &str = "http://ftp.se.debian.org/debian";

/// Default size of a freshly created image.
pub const DEFAULT_IMAGE_SIZE: &str = "8G";

/// Default size of the `root` logical volume.
pub const DEFAULT_ROOT_SIZE: &str = "4G";

/// Default debootstrap suite.
pub const DEFAULT_SUITE: &str = "squeeze";

/// Default debootstrap architecture.
pub const DEFAULT_ARCH: &str = "amd64";

/// Configuration file name looked up in the project root.
pub const CONFIG_FILE_NAME: &str = "vdisk.yaml";

/// Selections file used by `install` when none is given, relative to the root.
pub const DEFAULT_SELECTIONS: &str = "selections/default";

/// Directory where device-mapper exposes partition nodes.
pub const DEVICE_MAPPER_DIR: &str = "/dev/mapper";

/// Size of the `boot` logical volume in the generic layout.
pub const GENERIC_BOOT_SIZE: &str = "512M";

/// Environment applied to every apt/dpkg invocation inside the chroot.
pub const APT_ENV: &[(&str, &str)] = &[
    ("DEBIAN_FRONTEND", "noninteractive"),
    ("DEBCONF_NONINTERACTIVE_SEEN", "true"),
    ("LC_ALL", "C"),
    ("LANGUAGE", "C"),
    ("LANG", "C"),
];

/// Host tools every session needs, with the package that provides them.
pub const SESSION_TOOLS: &[(&str, &str)] = &[
    ("losetup", "util-linux"),
    ("kpartx", "kpartx"),
    ("lvm", "lvm2"),
    ("udevadm", "udev"),
    ("mount", "mount"),
    ("umount", "mount"),
    ("chroot", "coreutils"),
];

/// Extra host tools needed to partition and format a new image.
pub const CREATE_TOOLS: &[(&str, &str)] = &[
    ("parted", "parted"),
    ("mkfs.ext4", "e2fsprogs"),
    ("mkswap", "util-linux"),
];
