//! Mounted-system sessions.
//!
//! A [`SystemSession`] takes a disk image all the way to a mounted root
//! filesystem ready for chroot work: attach the loop device, activate the
//! volume group, mount root, `/boot` and preset extras, then `/proc` and
//! `/dev`. Each step is recorded before the next starts so a failure at any
//! point releases exactly what was acquired, in reverse.

use std::path::{Path, PathBuf};

use vdisk_common::error::Result;

use crate::loopback::{LoopDevice, LoopbackAttacher};
use crate::lvm::{LogicalVolumes, VolumeGroupActivator};
use crate::mount::{MountOptions, MountStack};
use crate::preset::Preset;
use crate::process::CommandRunner;
use crate::teardown::Teardown;

/// Lifecycle position of a [`SystemSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    /// Nothing held.
    Closed,
    /// Loop device attached and partitions mapped.
    LoopAttached,
    /// Volume group active.
    VolumeActive,
    /// Root filesystem mounted.
    RootMounted,
    /// `/boot` and preset mounts in place.
    ExtraMounted,
    /// `/proc` and `/dev` in place.
    FullyMounted,
    /// Handed to the caller.
    InUse,
    /// Releasing resources.
    Unwinding,
}

/// Which optional mounts a session sets up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Mount `proc` at `<mountpoint>/proc`.
    pub mount_proc: bool,
    /// Bind-mount the host `/dev` at `<mountpoint>/dev`.
    pub mount_dev: bool,
    /// Mount `/boot`: the `boot` logical volume when one exists, and the
    /// preset's own boot mounts.
    pub mount_boot: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            mount_proc: true,
            mount_dev: true,
            mount_boot: true,
        }
    }
}

impl SessionOptions {
    /// Options for running `debootstrap`, which manages `/proc` and `/dev`
    /// itself.
    #[must_use]
    pub fn bootstrap() -> Self {
        Self {
            mount_proc: false,
            mount_dev: false,
            mount_boot: true,
        }
    }

    /// Sets whether `/proc` is mounted.
    #[must_use]
    pub const fn with_proc(mut self, enabled: bool) -> Self {
        self.mount_proc = enabled;
        self
    }

    /// Sets whether `/dev` is bind-mounted.
    #[must_use]
    pub const fn with_dev(mut self, enabled: bool) -> Self {
        self.mount_dev = enabled;
        self
    }

    /// Sets whether `/boot` is mounted.
    #[must_use]
    pub const fn with_boot(mut self, enabled: bool) -> Self {
        self.mount_boot = enabled;
        self
    }
}

/// A disk image mounted and ready for chroot work.
///
/// Call [`SystemSession::close`] when done. A session dropped without being
/// closed logs an error and tears itself down anyway.
pub struct SystemSession<'r> {
    runner: &'r dyn CommandRunner,
    preset: &'r Preset,
    state: SessionState,
    device: LoopDevice,
    volumes: LogicalVolumes,
    mounts: MountStack<'r>,
}

impl<'r> SystemSession<'r> {
    /// Attaches, activates and mounts the image described by `preset`.
    ///
    /// # Errors
    ///
    /// Returns the error of the first step that failed. Anything acquired
    /// before it has been released again; release failures are attached as
    /// suppressed errors.
    pub fn open(
        runner: &'r dyn CommandRunner,
        preset: &'r Preset,
        options: SessionOptions,
    ) -> Result<Self> {
        let device = LoopbackAttacher::new(runner).attach(&preset.params().image_path)?;
        let mut session = Self {
            runner,
            preset,
            state: SessionState::LoopAttached,
            device,
            volumes: LogicalVolumes::default(),
            mounts: MountStack::new(runner),
        };

        match session.acquire(options) {
            Ok(()) => {
                session.state = SessionState::InUse;
                tracing::info!(
                    image = %preset.params().image_path.display(),
                    mountpoint = %session.mountpoint().display(),
                    mounts = session.mounts.len(),
                    "session open"
                );
                Ok(session)
            }
            Err(e) => {
                tracing::warn!(state = ?session.state, error = %e, "session setup failed, unwinding");
                let cleanup = session.release();
                Err(e.with_suppressed(cleanup.into_failures()))
            }
        }
    }

    fn acquire(&mut self, options: SessionOptions) -> Result<()> {
        let preset = self.preset;
        let params = preset.params();
        let mountpoint = params.mountpoint.as_path();

        self.volumes = VolumeGroupActivator::new(self.runner).activate(&params.volume_group)?;
        self.state = SessionState::VolumeActive;

        let root = self.volumes.require("root")?.to_path_buf();
        self.mounts.push(&root, mountpoint, &MountOptions::plain())?;
        self.state = SessionState::RootMounted;

        let boot = self
            .volumes
            .get("boot")
            .filter(|_| options.mount_boot)
            .map(Path::to_path_buf);
        if let Some(boot) = boot {
            self.mounts
                .push(&boot, &mountpoint.join("boot"), &MountOptions::plain())?;
        }
        if options.mount_boot {
            for extra in preset.extra_mounts(&self.device)? {
                self.mounts.push(&extra.source, &extra.target, &extra.options)?;
            }
        }
        self.state = SessionState::ExtraMounted;

        if options.mount_proc {
            self.mounts
                .push("null", &mountpoint.join("proc"), &MountOptions::typed("proc"))?;
        }
        if options.mount_dev {
            self.mounts
                .push("/dev", &mountpoint.join("dev"), &MountOptions::bind())?;
        }
        self.state = SessionState::FullyMounted;
        Ok(())
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Preset the session was opened with.
    #[must_use]
    pub const fn preset(&self) -> &Preset {
        self.preset
    }

    /// The attached loop device.
    #[must_use]
    pub const fn loop_device(&self) -> &LoopDevice {
        &self.device
    }

    /// Logical volumes of the active volume group.
    #[must_use]
    pub const fn volumes(&self) -> &LogicalVolumes {
        &self.volumes
    }

    /// Where the root filesystem is mounted.
    #[must_use]
    pub fn mountpoint(&self) -> &Path {
        &self.preset.params().mountpoint
    }

    /// Mount targets in mount order.
    #[must_use]
    pub fn mounts(&self) -> &[PathBuf] {
        self.mounts.mounts()
    }

    /// Adds a mount owned by the caller. It is unwound before anything the
    /// session mounted itself.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount fails; the session stays usable.
    pub fn mount(&mut self, source: &Path, target: &Path, options: &MountOptions) -> Result<()> {
        self.mounts.push(source, target, options)
    }

    /// Unmounts everything, deactivates the volume group and detaches the
    /// loop device.
    ///
    /// # Errors
    ///
    /// Returns [`vdisk_common::error::VdiskError::Teardown`] listing every
    /// step that failed. All steps are attempted regardless.
    pub fn close(mut self) -> Result<()> {
        let result = self.release().finish();
        if result.is_ok() {
            tracing::info!(image = %self.device.image().display(), "session closed");
        }
        result
    }

    fn release(&mut self) -> Teardown {
        let reached = self.state;
        let mut teardown = Teardown::new();
        if reached == SessionState::Closed {
            return teardown;
        }
        self.state = SessionState::Unwinding;

        teardown.attempt("unmount", self.mounts.unwind_all());
        if reached >= SessionState::VolumeActive {
            teardown.attempt(
                "deactivate volume group",
                VolumeGroupActivator::new(self.runner)
                    .deactivate(&self.preset.params().volume_group),
            );
        }
        teardown.attempt(
            "detach loop device",
            LoopbackAttacher::new(self.runner).detach(&self.device),
        );

        self.state = SessionState::Closed;
        teardown
    }
}

impl Drop for SystemSession<'_> {
    fn drop(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        tracing::error!(
            state = ?self.state,
            image = %self.device.image().display(),
            "session dropped without close, tearing down"
        );
        let failures = self.release().into_failures();
        if !failures.is_empty() {
            tracing::error!(count = failures.len(), "teardown after drop incomplete");
        }
    }
}

/// Opens a session, runs `body` with it, and always closes it.
///
/// # Errors
///
/// Returns the open error, the body's error (with close failures attached
/// as suppressed), or the close error.
pub fn with_session<T>(
    runner: &dyn CommandRunner,
    preset: &Preset,
    options: SessionOptions,
    body: impl FnOnce(&mut SystemSession<'_>) -> Result<T>,
) -> Result<T> {
    let mut session = SystemSession::open(runner, preset, options)?;
    let outcome = body(&mut session);
    let closed = session.close();
    match (outcome, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) | (Err(e), Ok(())) => Err(e),
        (Err(e), Err(cleanup)) => Err(e.with_suppressed(cleanup.into_failures())),
    }
}
