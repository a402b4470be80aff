//! `enter`: an interactive shell inside the image.

use vdisk_common::error::Result;
use vdisk_core::process;
use vdisk_core::session::{SessionOptions, with_session};

use crate::context::ActionContext;

/// Mounts the image and runs the configured shell in it.
///
/// The shell's exit status is returned, not treated as an error.
///
/// # Errors
///
/// Returns an error if the image is missing, the session fails, or the
/// shell cannot be started.
pub fn run(ctx: &ActionContext<'_>) -> Result<i32> {
    ctx.require_image()?;
    let runner = ctx.runner();
    let shell = &ctx.settings().shell;
    let preset = ctx.preset();
    with_session(runner, &preset, SessionOptions::default(), |session| {
        tracing::info!(mountpoint = %session.mountpoint().display(), shell = %shell, "entering image");
        let output = runner.run(&process::chroot(session.mountpoint(), shell).unchecked())?;
        tracing::info!(exit_code = output.exit_code, "shell exited");
        Ok(output.exit_code)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::Project;
    use vdisk_common::config::VdiskConfig;
    use vdisk_core::testing::ScriptedRunner;

    #[test]
    fn shell_exit_code_is_returned_and_session_closed() {
        let project = Project::new();
        let runner = ScriptedRunner::new()
            .with_standard_image()
            .fail("chroot", 3);
        let ctx = ActionContext::new(&runner, project.settings(), VdiskConfig::default());
        assert_eq!(run(&ctx).unwrap(), 3);
        assert_eq!(
            runner.calls_to("chroot"),
            vec![format!("chroot {} /bin/sh", project.mountpoint().display())]
        );
        assert_eq!(runner.calls_to("umount").len(), 3);
    }
}
