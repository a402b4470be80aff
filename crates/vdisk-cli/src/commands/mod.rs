//! CLI command definitions and dispatch.

pub mod bootstrap;
pub mod create;
pub mod enter;
pub mod install;
pub mod puppet;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use vdisk_actions::ActionContext;
use vdisk_common::config::{Settings, VdiskConfig};
use vdisk_common::constants;
use vdisk_common::types::{ByteSize, PresetKind};
use vdisk_core::preflight;
use vdisk_core::process::SystemRunner;

/// vdisk: build and enter virtual disk images.
#[derive(Parser, Debug)]
#[command(name = "vdisk", version, about, long_about = None, disable_version_flag = true)]
pub struct Cli {
    /// Disk image to operate on.
    pub image: PathBuf,

    /// Action to perform on the image.
    #[command(subcommand)]
    pub command: Command,

    /// Project root; relative paths are resolved against it.
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Log level used when `RUST_LOG` is not set.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Volume group created on and activated from the image.
    #[arg(short = 'V', long, global = true, default_value = constants::DEFAULT_VOLUME_GROUP)]
    pub volume_group: String,

    /// Mountpoint for the image's root filesystem, relative to the root.
    #[arg(short, long, global = true, default_value = constants::DEFAULT_MOUNTPOINT)]
    pub mountpoint: PathBuf,

    /// Shell used inside the image.
    #[arg(short = 'S', long, global = true, default_value = constants::DEFAULT_SHELL)]
    pub shell: String,

    /// `apt-get` command inside the image.
    #[arg(short = 'A', long, global = true, default_value = constants::DEFAULT_APT_GET)]
    pub apt_get: String,

    /// `dpkg` command inside the image.
    #[arg(short = 'D', long, global = true, default_value = constants::DEFAULT_DPKG)]
    pub dpkg: String,

    /// Mirror used by debootstrap.
    #[arg(short = 'M', long, global = true, default_value = constants::DEFAULT_MIRROR)]
    pub mirror: String,

    /// Configuration file; defaults to `<root>/vdisk.yaml`.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Disk layout: `generic` or `ec2`. Overrides the configuration file.
    #[arg(long, global = true)]
    pub preset: Option<PresetKind>,

    /// Size of the root logical volume. Overrides the configuration file.
    #[arg(long, global = true)]
    pub root_size: Option<ByteSize>,

    /// Kill any external command running longer than this many seconds.
    #[arg(long, global = true, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Print version.
    #[arg(short = 'v', long, action = ArgAction::Version)]
    pub version: Option<bool>,
}

/// Available actions.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a new image, partition it and format its volumes.
    Create(create::CreateArgs),
    /// Install a base system into the image with debootstrap.
    Bootstrap(bootstrap::BootstrapArgs),
    /// Install packages, boot loader and configuration into the image.
    Install(install::InstallArgs),
    /// Open a shell inside the image.
    Enter,
    /// Run puppet inside the image.
    Puppet(puppet::PuppetArgs),
}

impl Cli {
    /// Merges the command line with the configuration file into settings.
    ///
    /// Flags win over the file; the file wins over built-in defaults.
    #[must_use]
    pub fn settings(&self, root: PathBuf, config: &VdiskConfig) -> Settings {
        let mut settings = Settings::new(root, self.image.clone());
        settings.mountpoint = settings.resolve(&self.mountpoint);
        settings.volume_group.clone_from(&self.volume_group);
        settings.shell.clone_from(&self.shell);
        settings.apt_get.clone_from(&self.apt_get);
        settings.dpkg.clone_from(&self.dpkg);
        settings.mirror.clone_from(&self.mirror);
        settings.preset = self.preset.or(config.preset).unwrap_or_default();
        if let Some(size) = self.root_size.or(config.root_size) {
            settings.root_size = size;
        }
        settings.command_timeout = self.timeout.map(Duration::from_secs);
        settings
    }
}

/// Checks privileges, loads configuration and dispatches the action.
///
/// # Errors
///
/// Returns an error if vdisk is not running as root, the configuration
/// cannot be loaded, required host tools are missing, or the action fails.
pub fn execute(cli: Cli) -> anyhow::Result<ExitCode> {
    preflight::ensure_root()?;

    let root = match &cli.root {
        Some(root) => root.clone(),
        None => std::env::current_dir().context("cannot determine working directory")?,
    };
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| root.join(constants::CONFIG_FILE_NAME));
    let config = VdiskConfig::load(&config_path)?;

    let settings = cli.settings(root, &config);
    settings.validate()?;
    tracing::debug!(?settings, "resolved settings");

    preflight::check_host_tools(constants::SESSION_TOOLS)?;
    if matches!(cli.command, Command::Create(_)) {
        preflight::check_host_tools(constants::CREATE_TOOLS)?;
    }

    let runner = settings
        .command_timeout
        .map_or_else(SystemRunner::new, SystemRunner::with_timeout);
    let ctx = ActionContext::new(&runner, settings, config);

    match cli.command {
        Command::Create(args) => create::execute(&ctx, &args).map(|()| ExitCode::SUCCESS),
        Command::Bootstrap(args) => bootstrap::execute(&ctx, args).map(|()| ExitCode::SUCCESS),
        Command::Install(args) => install::execute(&ctx, args).map(|()| ExitCode::SUCCESS),
        Command::Enter => enter::execute(&ctx),
        Command::Puppet(args) => puppet::execute(&ctx, args).map(|()| ExitCode::SUCCESS),
    }
}
