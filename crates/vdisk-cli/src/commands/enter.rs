//! `vdisk <image> enter`: interactive shell inside the image.

use std::process::ExitCode;

use vdisk_actions::ActionContext;
use vdisk_actions::enter;

/// Executes the `enter` command, exiting with the shell's status.
///
/// # Errors
///
/// Returns an error if the image cannot be mounted or the shell cannot
/// start.
pub fn execute(ctx: &ActionContext<'_>) -> anyhow::Result<ExitCode> {
    let code = enter::run(ctx)?;
    Ok(exit_code(code))
}

/// Maps a child status onto a process exit code; out-of-range statuses
/// become 1.
fn exit_code(code: i32) -> ExitCode {
    u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_pass_through_when_in_range() {
        assert_eq!(exit_code(0), ExitCode::SUCCESS);
        assert_eq!(exit_code(3), ExitCode::from(3));
        assert_eq!(exit_code(-1), ExitCode::FAILURE);
        assert_eq!(exit_code(300), ExitCode::FAILURE);
    }
}
