//! Configuration model for vdisk.
//!
//! Two layers feed an action: [`Settings`], built from command-line flags,
//! and [`VdiskConfig`], the project's `vdisk.yaml`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::constants;
use crate::error::{Result, VdiskError};
use crate::types::{ByteSize, PresetKind};

/// Run-time settings for one invocation of an action.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Project root; relative paths are resolved against it.
    pub root: PathBuf,
    /// Disk image being operated on.
    pub image_path: PathBuf,
    /// Volume group holding the image's logical volumes.
    pub volume_group: String,
    /// Directory the image's root filesystem is mounted on.
    pub mountpoint: PathBuf,
    /// Shell used for `enter` and postinst snippets.
    pub shell: String,
    /// `apt-get` binary inside the chroot.
    pub apt_get: String,
    /// `dpkg` binary inside the chroot.
    pub dpkg: String,
    /// Mirror handed to debootstrap.
    pub mirror: String,
    /// Disk layout strategy.
    pub preset: PresetKind,
    /// Size of the `root` logical volume.
    pub root_size: ByteSize,
    /// Upper bound on any single external command, if set.
    pub command_timeout: Option<Duration>,
}

impl Settings {
    /// Creates settings with defaults for everything but the root and image.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, image_path: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            image_path: image_path.into(),
            mountpoint: root.join(constants::DEFAULT_MOUNTPOINT),
            volume_group: constants::DEFAULT_VOLUME_GROUP.into(),
            shell: constants::DEFAULT_SHELL.into(),
            apt_get: constants::DEFAULT_APT_GET.into(),
            dpkg: constants::DEFAULT_DPKG.into(),
            mirror: constants::DEFAULT_MIRROR.into(),
            preset: PresetKind::default(),
            root_size: ByteSize::from_bytes(4 << 30),
            command_timeout: None,
            root,
        }
    }

    /// Resolves `path` against the project root unless it is absolute.
    #[must_use]
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        self.root.join(path)
    }

    /// Checks the fields a session cannot run without.
    ///
    /// # Errors
    ///
    /// Returns [`VdiskError::Config`] naming the first missing parameter.
    pub fn validate(&self) -> Result<()> {
        let missing = |name: &str| VdiskError::Config {
            message: format!("missing required parameter: {name}"),
        };
        if self.image_path.as_os_str().is_empty() {
            return Err(missing("image path"));
        }
        if self.volume_group.trim().is_empty() {
            return Err(missing("volume group"));
        }
        if self.mountpoint.as_os_str().is_empty() {
            return Err(missing("mountpoint"));
        }
        Ok(())
    }
}

/// Contents of a project's `vdisk.yaml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct VdiskConfig {
    /// Disk layout strategy; the command line takes precedence.
    pub preset: Option<PresetKind>,
    /// Size of the `root` logical volume; the command line takes precedence.
    pub root_size: Option<ByteSize>,
    /// APT sources written to `etc/apt/sources.list`, keyed by name.
    #[serde(default)]
    pub sources: BTreeMap<String, AptSource>,
    /// Packages installed before `sources.list` is written, keyed by suite.
    #[serde(default)]
    pub pre_packages: BTreeMap<String, Vec<String>>,
    /// Packages installed after `sources.list` is written, keyed by suite.
    #[serde(default)]
    pub packages: BTreeMap<String, Vec<String>>,
    /// Files and directories copied into the image.
    #[serde(default)]
    pub manifest: Vec<ManifestEntry>,
    /// Shell snippets run inside the image at the end of `install`.
    #[serde(default)]
    pub postinst: Vec<String>,
}

impl VdiskConfig {
    /// Loads the configuration file at `path`.
    ///
    /// An empty file yields the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unreadable or malformed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(VdiskError::Config {
                message: format!("missing configuration: {}", path.display()),
            });
        }
        let content = std::fs::read_to_string(path).map_err(|e| VdiskError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Self::parse(&content)
    }

    /// Parses configuration from YAML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML does not match the expected shape.
    pub fn parse(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Option<Self> = serde_yaml::from_str(content)?;
        Ok(config.unwrap_or_default())
    }
}

/// One entry of the `sources` map.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AptSource {
    /// Repository URL.
    pub url: Option<String>,
    /// Distribution suite.
    pub suite: Option<String>,
    /// Free-form comment written above the line.
    pub comment: Option<String>,
    /// `deb` or `deb-src`; defaults to `deb`.
    pub source_type: Option<String>,
    /// Components; defaults to `main`.
    pub components: Option<Vec<String>>,
}

/// Kind of manifest entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestKind {
    /// Copy a file from the project root.
    #[default]
    File,
    /// Create a directory.
    Directory,
}

/// One entry of the `manifest` list.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    /// Absolute path inside the image.
    pub target: String,
    /// Source file relative to the project root (files only).
    pub source: Option<String>,
    /// Owning user inside the image.
    #[serde(default = "default_owner")]
    pub owner: String,
    /// Owning group inside the image.
    #[serde(default = "default_owner")]
    pub group: String,
    /// Permission bits; see [`ManifestEntry::mode`] for the default.
    pub mode: Option<FileMode>,
    /// Entry kind.
    #[serde(rename = "type", default)]
    pub kind: ManifestKind,
}

impl ManifestEntry {
    /// Permission bits to apply: the configured mode, or `0644` for files
    /// and `0755` for directories.
    #[must_use]
    pub fn mode(&self) -> FileMode {
        self.mode.unwrap_or(match self.kind {
            ManifestKind::File => FileMode::default(),
            ManifestKind::Directory => FileMode::new(0o755),
        })
    }
}

fn default_owner() -> String {
    "root".into()
}

/// Unix permission bits written in octal.
///
/// Accepts `"0644"`, `"0o644"`, or an integer such as `644` whose decimal
/// digits are read as octal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawMode")]
pub struct FileMode(u32);

impl FileMode {
    /// Creates a mode from raw permission bits.
    #[must_use]
    pub const fn new(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns the raw permission bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Formats the mode for `chmod`, e.g. `0644`.
    #[must_use]
    pub fn as_octal(self) -> String {
        format!("{:04o}", self.0)
    }

    fn parse(text: &str) -> Result<Self> {
        let digits = text.trim();
        let digits = digits.strip_prefix("0o").unwrap_or(digits);
        u32::from_str_radix(digits, 8)
            .ok()
            .filter(|bits| *bits <= 0o7777)
            .map(Self)
            .ok_or_else(|| VdiskError::Config {
                message: format!("invalid file mode: {text:?}"),
            })
    }
}

impl Default for FileMode {
    fn default() -> Self {
        Self(0o644)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawMode {
    Number(u32),
    Text(String),
}

impl TryFrom<RawMode> for FileMode {
    type Error = VdiskError;

    fn try_from(raw: RawMode) -> Result<Self> {
        match raw {
            RawMode::Number(n) => Self::parse(&n.to_string()),
            RawMode::Text(text) => Self::parse(&text),
        }
    }
}
