//! `bootstrap`: install a base system with debootstrap.

use vdisk_common::constants;
use vdisk_common::error::{Result, VdiskError};
use vdisk_core::process::Invocation;
use vdisk_core::session::{SessionOptions, with_session};

use crate::context::ActionContext;

/// Options for [`run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapOptions {
    /// Distribution suite, e.g. `squeeze`.
    pub suite: String,
    /// Target architecture, e.g. `amd64`.
    pub arch: String,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            suite: constants::DEFAULT_SUITE.into(),
            arch: constants::DEFAULT_ARCH.into(),
        }
    }
}

/// Mounts the image without `/proc` and `/dev` and runs debootstrap into it.
///
/// # Errors
///
/// Returns an error if the image is missing, the mountpoint cannot be
/// created, the session fails, or debootstrap fails.
pub fn run(ctx: &ActionContext<'_>, options: &BootstrapOptions) -> Result<()> {
    ctx.require_image()?;
    let settings = ctx.settings();

    if !settings.mountpoint.is_dir() {
        tracing::info!(mountpoint = %settings.mountpoint.display(), "creating mountpoint");
        std::fs::create_dir_all(&settings.mountpoint).map_err(|e| VdiskError::Io {
            path: settings.mountpoint.clone(),
            source: e,
        })?;
    }

    let runner = ctx.runner();
    let preset = ctx.preset();
    with_session(runner, &preset, SessionOptions::bootstrap(), |session| {
        tracing::info!(mountpoint = %session.mountpoint().display(), suite = %options.suite, "installing base system");
        let debootstrap = Invocation::new("debootstrap")
            .args(["--arch", options.arch.as_str(), options.suite.as_str()])
            .arg(session.mountpoint())
            .arg(&settings.mirror);
        let _ = runner.run(&debootstrap)?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::Project;
    use vdisk_common::config::VdiskConfig;
    use vdisk_core::testing::ScriptedRunner;

    #[test]
    fn runs_debootstrap_without_proc_or_dev() {
        let project = Project::new();
        let runner = ScriptedRunner::new().with_standard_image();
        let ctx = ActionContext::new(&runner, project.settings(), VdiskConfig::default());
        run(&ctx, &BootstrapOptions::default()).unwrap();

        let mp = project.mountpoint();
        assert_eq!(
            runner.calls_to("debootstrap"),
            vec![format!(
                "debootstrap --arch amd64 squeeze {} http://ftp.se.debian.org/debian",
                mp.display()
            )]
        );
        assert_eq!(runner.calls_to("mount").len(), 1);
        assert_eq!(runner.calls_to("umount"), vec![format!("umount {}", mp.display())]);
    }

    #[test]
    fn debootstrap_failure_still_closes_session() {
        let project = Project::new();
        let runner = ScriptedRunner::new()
            .with_standard_image()
            .fail("debootstrap", 1);
        let ctx = ActionContext::new(&runner, project.settings(), VdiskConfig::default());
        let err = run(&ctx, &BootstrapOptions::default()).unwrap_err();
        assert!(matches!(err, VdiskError::CommandFailed { exit_code: 1, .. }));
        assert!(runner.calls().contains(&"losetup -d /dev/loop0".to_owned()));
    }
}
