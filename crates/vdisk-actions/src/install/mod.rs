//! `install`: turn a bootstrapped image into a bootable, configured system.
//!
//! Inside one session: configure APT and install the configured packages,
//! apply the dpkg selections, make the image bootable, write `fstab` and
//! the final `device.map`, apply the manifest, run postinst snippets and
//! rebuild the initramfs.

pub mod apt;

use std::path::{Path, PathBuf};

use vdisk_common::config::VdiskConfig;
use vdisk_common::constants::DEFAULT_SELECTIONS;
use vdisk_common::error::{Result, VdiskError};
use vdisk_core::devicemap;
use vdisk_core::process::{self, CommandRunner};
use vdisk_core::session::{SessionOptions, with_session};
use vdisk_core::teardown;

use self::apt::Apt;
use crate::context::ActionContext;
use crate::{files, manifest};

/// Keeps package maintainer scripts from starting services in the chroot.
const POLICY_RC_D: &str = "usr/sbin/policy-rc.d";

/// Options for [`run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallOptions {
    /// dpkg selections file; defaults to `<root>/selections/default`.
    pub selections: Option<PathBuf>,
    /// Only download the selected packages.
    pub download_only: bool,
}

/// Runs the full installation against the image.
///
/// Inputs (image, selections, sources, manifest) are validated before the
/// image is mounted.
///
/// # Errors
///
/// Returns [`VdiskError::Config`] for missing or invalid inputs, or the
/// first failing step's error once the session is open.
pub fn run(ctx: &ActionContext<'_>, options: &InstallOptions) -> Result<()> {
    ctx.require_image()?;
    let settings = ctx.settings();
    let config = ctx.config();

    let selections = options
        .selections
        .clone()
        .unwrap_or_else(|| settings.resolve(DEFAULT_SELECTIONS));
    if !selections.is_file() {
        return Err(VdiskError::Config {
            message: format!("missing selections file: {}", selections.display()),
        });
    }
    let sources = apt::generate_sources(&config.sources)?;
    manifest::validate(&settings.root, &config.manifest)?;

    let runner = ctx.runner();
    let preset = ctx.preset();
    with_session(runner, &preset, SessionOptions::default(), |session| {
        let root = session.mountpoint().to_path_buf();
        let apt = Apt::new(runner, &root, settings);

        tracing::info!("configuring apt");
        configure_base_system(&apt, &root, config, &sources)?;

        apt.set_selections(&selections)?;
        if options.download_only {
            apt.dselect_upgrade(true)?;
        } else {
            with_services_disabled(runner, &root, || apt.dselect_upgrade(false))?;
        }

        preset.setup_boot(runner, session.loop_device(), &root)?;

        tracing::info!("writing fstab");
        let _ = files::write_lines(&root, "etc/fstab", &generate_fstab(&settings.volume_group))?;

        tracing::info!("writing installed device map");
        let device_map = devicemap::installed_device_map(session.volumes().iter().map(|(_, path)| path));
        let _ = files::write_lines(&root, "boot/grub/device.map", &device_map)?;

        manifest::apply(runner, &settings.root, &root, &config.manifest)?;

        for snippet in &config.postinst {
            tracing::info!(snippet = %snippet, "running postinst");
            let _ = runner.run(&process::chroot(&root, &settings.shell).arg("-c").arg(snippet))?;
        }

        let _ = runner.run(&process::chroot(&root, "update-initramfs").arg("-u"))?;
        Ok(())
    })
}

fn configure_base_system(
    apt: &Apt<'_>,
    root: &Path,
    config: &VdiskConfig,
    sources: &[String],
) -> Result<()> {
    if !config.pre_packages.is_empty() {
        tracing::info!("installing pre-required packages");
        apt.install(&config.pre_packages)?;
    }

    if !sources.is_empty() {
        tracing::info!("writing sources.list");
        let _ = files::write_lines(root, "etc/apt/sources.list", sources)?;
    }
    apt.update()?;

    if !config.packages.is_empty() {
        tracing::info!("installing required packages");
        apt.install(&config.packages)?;
    }
    apt.update()
}

/// Runs `body` with a `policy-rc.d` that forbids service starts in place,
/// removing it afterwards even if `body` fails.
fn with_services_disabled<T>(
    runner: &dyn CommandRunner,
    root: &Path,
    body: impl FnOnce() -> Result<T>,
) -> Result<T> {
    let image_path = format!("/{POLICY_RC_D}");
    teardown::scoped(
        || {
            let _ = files::write_lines(root, POLICY_RC_D, &["exit 101"])?;
            let _ = runner.run(&process::chroot(root, "chmod").arg("755").arg(&image_path))?;
            Ok(())
        },
        |()| {
            runner
                .run(&process::chroot(root, "rm").arg("-f").arg(&image_path))
                .map(drop)
        },
        |()| body(),
    )
}

/// `fstab` for the installed system: root and swap from the volume group.
#[must_use]
pub fn generate_fstab(volume_group: &str) -> Vec<String> {
    vec![
        "# auto-generated fstab from vdisk".to_owned(),
        format!("/dev/mapper/{volume_group}-root /       ext4    noatime 0 1"),
        format!("/dev/mapper/{volume_group}-swap none    swap    sw      0 0"),
    ]
}
