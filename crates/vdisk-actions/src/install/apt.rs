//! APT and dpkg driven through the image's chroot.

use std::collections::BTreeMap;
use std::path::Path;

use vdisk_common::config::{AptSource, Settings};
use vdisk_common::constants::APT_ENV;
use vdisk_common::error::{Result, VdiskError};
use vdisk_core::process::{self, CommandRunner, Invocation};

/// Suite key meaning "no `-t` target release".
pub const DEFAULT_SUITE_KEY: &str = "default";

/// Package tooling inside a mounted image, always run noninteractively.
pub struct Apt<'a> {
    runner: &'a dyn CommandRunner,
    root: &'a Path,
    apt_get: &'a str,
    dpkg: &'a str,
}

impl<'a> Apt<'a> {
    /// Binds the `apt-get` and `dpkg` named in `settings` to the image
    /// mounted at `root`.
    #[must_use]
    pub fn new(runner: &'a dyn CommandRunner, root: &'a Path, settings: &'a Settings) -> Self {
        Self {
            runner,
            root,
            apt_get: &settings.apt_get,
            dpkg: &settings.dpkg,
        }
    }

    fn chroot(&self, program: &str) -> Invocation {
        process::chroot(self.root, program).envs(APT_ENV.iter().copied())
    }

    fn run(&self, invocation: &Invocation) -> Result<()> {
        let _ = self.runner.run(invocation)?;
        Ok(())
    }

    /// Refreshes the package lists.
    ///
    /// # Errors
    ///
    /// Returns an error if `apt-get update` fails.
    pub fn update(&self) -> Result<()> {
        tracing::info!("updating apt");
        self.run(&self.chroot(self.apt_get).args(["-y", "update"]))
    }

    /// Installs every package, one at a time, from the suite it is listed
    /// under.
    ///
    /// # Errors
    ///
    /// Returns the error of the first package that fails to install.
    pub fn install(&self, packages: &BTreeMap<String, Vec<String>>) -> Result<()> {
        for (suite, names) in packages {
            for package in names {
                tracing::info!(package = %package, suite = %suite, "installing package");
                let mut install = self.chroot(self.apt_get).args(["-y", "--force-yes"]);
                if suite != DEFAULT_SUITE_KEY {
                    install = install.args(["-t", suite.as_str()]);
                }
                self.run(&install.args(["-y", "install", package.as_str()]))?;
            }
        }
        Ok(())
    }

    /// Feeds a `dpkg --get-selections` style file to `dpkg --set-selections`.
    ///
    /// # Errors
    ///
    /// Returns an error if dpkg rejects the selections.
    pub fn set_selections(&self, selections: &Path) -> Result<()> {
        tracing::info!(selections = %selections.display(), "setting selections");
        self.run(
            &self
                .chroot(self.dpkg)
                .arg("--set-selections")
                .stdin_file(selections),
        )
    }

    /// Brings installed packages in line with the selections, or with
    /// `download_only` just fetches them.
    ///
    /// # Errors
    ///
    /// Returns an error if `apt-get dselect-upgrade` fails.
    pub fn dselect_upgrade(&self, download_only: bool) -> Result<()> {
        let mut upgrade = self.chroot(self.apt_get).args(["-y", "-u"]);
        if download_only {
            tracing::info!("downloading selections");
            upgrade = upgrade.arg("--download-only");
        } else {
            tracing::info!("installing selections");
        }
        self.run(&upgrade.arg("dselect-upgrade"))
    }
}

/// Renders `sources.list` lines: a `# name[: comment]` line followed by
/// `<type> <url> <suite> <components...>` for every source.
///
/// # Errors
///
/// Returns [`VdiskError::Config`] if a source lacks `url` or `suite`.
pub fn generate_sources(sources: &BTreeMap<String, AptSource>) -> Result<Vec<String>> {
    let mut lines = Vec::with_capacity(sources.len() * 2);
    for (name, source) in sources {
        let required = |field: &str| VdiskError::Config {
            message: format!("'{field}' required for source {name}"),
        };
        let url = source.url.as_deref().ok_or_else(|| required("url"))?;
        let suite = source.suite.as_deref().ok_or_else(|| required("suite"))?;
        let source_type = source.source_type.as_deref().unwrap_or("deb");
        let components = source
            .components
            .as_ref()
            .map_or_else(|| "main".to_owned(), |c| c.join(" "));

        lines.push(match &source.comment {
            Some(comment) => format!("# {name}: {comment}"),
            None => format!("# {name}"),
        });
        lines.push(format!("{source_type} {url} {suite} {components}"));
    }
    Ok(lines)
}
