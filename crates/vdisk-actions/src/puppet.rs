//! `puppet`: apply a puppet tree to the image.

use std::path::PathBuf;

use vdisk_common::error::{Result, VdiskError};
use vdisk_core::mount::MountOptions;
use vdisk_core::process;
use vdisk_core::session::{SessionOptions, with_session};

use crate::context::ActionContext;

/// Options for [`run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PuppetOptions {
    /// Host directory bind-mounted at `/puppet` inside the image.
    pub path: PathBuf,
    /// Facts as `name=value`.
    pub facts: Vec<String>,
    /// Arguments passed to `puppet`.
    pub args: Vec<String>,
}

/// Turns `name=value` facts into `FACTER_<name>` environment variables.
///
/// # Errors
///
/// Returns [`VdiskError::Config`] for a fact without `=` or with an empty
/// name.
pub fn parse_facts(facts: &[String]) -> Result<Vec<(String, String)>> {
    facts
        .iter()
        .map(|fact| match fact.split_once('=') {
            Some((name, value)) if !name.is_empty() => {
                Ok((format!("FACTER_{name}"), value.to_owned()))
            }
            _ => Err(VdiskError::Config {
                message: format!("invalid fact: {fact}"),
            }),
        })
        .collect()
}

/// Mounts the image, binds the puppet tree into it and runs
/// `puppet <args...>` in the chroot with the given facts.
///
/// # Errors
///
/// Returns an error if a fact is invalid, the image or puppet directory is
/// missing, the session fails, or puppet exits non-zero.
pub fn run(ctx: &ActionContext<'_>, options: &PuppetOptions) -> Result<()> {
    ctx.require_image()?;
    let env = parse_facts(&options.facts)?;
    let path = ctx.settings().resolve(&options.path);
    if !path.is_dir() {
        return Err(VdiskError::Config {
            message: format!("puppet path is not a directory: {}", path.display()),
        });
    }

    let runner = ctx.runner();
    let preset = ctx.preset();
    with_session(runner, &preset, SessionOptions::default(), |session| {
        let root = session.mountpoint().to_path_buf();
        session.mount(&path, &root.join("puppet"), &MountOptions::bind())?;
        tracing::info!(path = %path.display(), facts = env.len(), "running puppet");
        let puppet = process::chroot(&root, "puppet")
            .args(&options.args)
            .envs(env.iter().cloned());
        let _ = runner.run(&puppet)?;
        Ok(())
    })
}
