//! End-to-end runs of the actions against a scripted command runner.
//!
//! Each test builds a scratch project (image file, selections, config) and
//! checks the exact command sequence and the files written into the
//! mountpoint.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::path::{Path, PathBuf};

use vdisk_actions::ActionContext;
use vdisk_actions::install::{self, InstallOptions};
use vdisk_common::config::{Settings, VdiskConfig};
use vdisk_common::types::PresetKind;
use vdisk_core::testing::ScriptedRunner;

const CONFIG: &str = r#"
sources:
  debian:
    url: http://ftp.se.debian.org/debian
    suite: squeeze
pre-packages:
  default: [debconf-utils]
packages:
  default: [openssh-server]
manifest:
  - target: /etc/motd
    source: files/motd
postinst:
  - echo done > /root/postinst
"#;

fn project() -> (tempfile::TempDir, Settings) {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path();
    std::fs::write(root.join("disk.img"), b"").unwrap();
    std::fs::create_dir_all(root.join("selections")).unwrap();
    std::fs::write(root.join("selections/default"), "vim\tinstall\n").unwrap();
    std::fs::create_dir_all(root.join("files")).unwrap();
    std::fs::write(root.join("files/motd"), "welcome\n").unwrap();
    let settings = Settings::new(root, root.join("disk.img"));
    (dir, settings)
}

fn position(calls: &[String], needle: &str) -> usize {
    calls
        .iter()
        .position(|c| c.contains(needle))
        .unwrap_or_else(|| panic!("no call containing {needle:?} in {calls:#?}"))
}

fn read(root: &Path, relative: &str) -> String {
    std::fs::read_to_string(root.join(relative)).unwrap()
}

#[test]
fn install_runs_every_step_in_order() {
    let (_dir, settings) = project();
    let mp: PathBuf = settings.mountpoint.clone();
    let runner = ScriptedRunner::new().with_standard_image();
    let config = VdiskConfig::parse(CONFIG).unwrap();
    let ctx = ActionContext::new(&runner, settings, config);

    install::run(&ctx, &InstallOptions::default()).unwrap();

    let calls = runner.calls();
    let order = [
        "losetup --show -f",
        "lvm vgchange -a y VolGroup00",
        "mount --bind /dev",
        "install debconf-utils",
        "apt-get -y update",
        "install openssh-server",
        "dpkg --set-selections",
        "chmod 755 /usr/sbin/policy-rc.d",
        "apt-get -y -u dselect-upgrade",
        "rm -f /usr/sbin/policy-rc.d",
        "grub-install --no-floppy /dev/loop0",
        "chown root:root /etc/motd",
        "sh -c echo done > /root/postinst",
        "update-initramfs -u",
        "lvm vgchange -a n VolGroup00",
        "losetup -d /dev/loop0",
    ];
    let positions: Vec<usize> = order.iter().map(|needle| position(&calls, needle)).collect();
    assert!(
        positions.windows(2).all(|w| w[0] < w[1]),
        "out of order: {order:?} at {positions:?}"
    );
    assert_eq!(
        calls.iter().filter(|c| c.ends_with("apt-get -y update")).count(),
        2
    );

    assert_eq!(
        read(&mp, "etc/apt/sources.list"),
        "# debian\ndeb http://ftp.se.debian.org/debian squeeze main\n"
    );
    assert!(read(&mp, "etc/fstab").contains("/dev/mapper/VolGroup00-root /"));
    assert_eq!(
        read(&mp, "boot/grub/device.map"),
        "(hd0) /dev/sda\n(hd0,0) /dev/VolGroup00/root\n(hd0,1) /dev/VolGroup00/swap\n"
    );
    assert_eq!(read(&mp, "etc/motd"), "welcome\n");
}

#[test]
fn download_only_skips_policy_and_installs_nothing() {
    let (_dir, settings) = project();
    let runner = ScriptedRunner::new().with_standard_image();
    let ctx = ActionContext::new(&runner, settings, VdiskConfig::default());
    let options = InstallOptions {
        download_only: true,
        ..InstallOptions::default()
    };

    install::run(&ctx, &options).unwrap();

    let calls = runner.calls();
    assert!(calls.iter().any(|c| c.ends_with("--download-only dselect-upgrade")));
    assert!(!calls.iter().any(|c| c.contains("policy-rc.d")));
    assert!(!calls.iter().any(|c| c.contains(" install ")));
}

#[test]
fn ec2_install_links_boot_instead_of_installing_grub() {
    let (_dir, mut settings) = project();
    settings.preset = PresetKind::Ec2;
    let mp = settings.mountpoint.clone();
    let runner = ScriptedRunner::new().with_standard_image();
    let ctx = ActionContext::new(&runner, settings, VdiskConfig::default());

    install::run(&ctx, &InstallOptions::default()).unwrap();

    assert!(!runner.calls().iter().any(|c| c.contains("grub-install")));
    assert_eq!(std::fs::read_link(mp.join("boot/boot")).unwrap(), Path::new("."));
}

#[test]
fn failing_step_unwinds_the_whole_session() {
    let (_dir, settings) = project();
    let runner = ScriptedRunner::new()
        .with_standard_image()
        .fail(&format!("chroot {} dpkg", settings.mountpoint.display()), 2);
    let ctx = ActionContext::new(&runner, settings, VdiskConfig::default());

    let err = install::run(&ctx, &InstallOptions::default()).unwrap_err();
    assert!(err.to_string().contains("dpkg"), "got: {err}");

    assert_eq!(runner.calls_to("umount").len(), 3);
    let calls = runner.calls();
    assert_eq!(calls.last().unwrap(), "losetup -d /dev/loop0");
    assert!(!calls.iter().any(|c| c.contains("update-initramfs")));
}
