//! Shared state handed to every action.

use vdisk_common::config::{Settings, VdiskConfig};
use vdisk_common::error::{Result, VdiskError};
use vdisk_core::preset::{Preset, PresetParams};
use vdisk_core::process::CommandRunner;

/// Everything an action needs: how to run commands, the command-line
/// settings and the project configuration.
pub struct ActionContext<'r> {
    runner: &'r dyn CommandRunner,
    settings: Settings,
    config: VdiskConfig,
}

impl<'r> ActionContext<'r> {
    /// Bundles a runner with fully merged settings and configuration.
    #[must_use]
    pub fn new(runner: &'r dyn CommandRunner, settings: Settings, config: VdiskConfig) -> Self {
        Self {
            runner,
            settings,
            config,
        }
    }

    /// Command runner.
    #[must_use]
    pub fn runner(&self) -> &'r dyn CommandRunner {
        self.runner
    }

    /// Command-line settings.
    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Project configuration.
    #[must_use]
    pub const fn config(&self) -> &VdiskConfig {
        &self.config
    }

    /// The disk layout for this image.
    #[must_use]
    pub fn preset(&self) -> Preset {
        Preset::new(self.settings.preset, PresetParams::from(&self.settings))
    }

    /// Fails unless the image file exists.
    ///
    /// # Errors
    ///
    /// Returns [`VdiskError::Config`] naming the missing image.
    pub fn require_image(&self) -> Result<()> {
        if self.settings.image_path.is_file() {
            return Ok(());
        }
        Err(VdiskError::Config {
            message: format!("missing image file: {}", self.settings.image_path.display()),
        })
    }
}
