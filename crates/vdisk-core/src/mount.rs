//! Ordered mount bookkeeping.
//!
//! Every successful mount is recorded on a stack; unwinding unmounts in
//! exact reverse order and keeps going past individual failures so one stuck
//! mount does not pin the others.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use vdisk_common::error::{Result, VdiskError};

use crate::process::{self, CommandRunner, Invocation, Tool};
use crate::teardown::Teardown;

/// How a source is mounted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountOptions {
    /// Bind-mount an existing directory.
    pub bind: bool,
    /// Filesystem type passed with `-t`.
    pub fs_type: Option<String>,
}

impl MountOptions {
    /// A plain device mount.
    #[must_use]
    pub fn plain() -> Self {
        Self::default()
    }

    /// A bind mount.
    #[must_use]
    pub fn bind() -> Self {
        Self {
            bind: true,
            fs_type: None,
        }
    }

    /// A mount of filesystem type `fs_type`.
    #[must_use]
    pub fn typed(fs_type: impl Into<String>) -> Self {
        Self {
            bind: false,
            fs_type: Some(fs_type.into()),
        }
    }
}

/// Mounts pushed so far, unwound last-in first-out.
pub struct MountStack<'r> {
    runner: &'r dyn CommandRunner,
    mounts: Vec<PathBuf>,
}

impl<'r> MountStack<'r> {
    /// Creates an empty stack.
    #[must_use]
    pub fn new(runner: &'r dyn CommandRunner) -> Self {
        Self {
            runner,
            mounts: Vec::new(),
        }
    }

    /// Mounts `source` on `target`, creating `target` first if needed.
    ///
    /// The mount is recorded as soon as `mount` succeeds, so a later settle
    /// failure still gets it unwound.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, `mount` fails, or
    /// `udevadm settle` fails.
    pub fn push(
        &mut self,
        source: impl AsRef<OsStr>,
        target: &Path,
        options: &MountOptions,
    ) -> Result<()> {
        if !target.is_dir() {
            std::fs::create_dir_all(target).map_err(|e| VdiskError::Io {
                path: target.to_path_buf(),
                source: e,
            })?;
        }

        let _ = self.runner.run(&mount_invocation(source.as_ref(), target, options))?;
        self.mounts.push(target.to_path_buf());
        tracing::info!(
            source = %source.as_ref().to_string_lossy(),
            target = %target.display(),
            depth = self.mounts.len(),
            "mounted"
        );

        process::settle(self.runner)
    }

    /// Unmounts everything in reverse order of mounting.
    ///
    /// The stack is empty afterwards whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`VdiskError::Teardown`] listing every failed unmount.
    pub fn unwind_all(&mut self) -> Result<()> {
        let mut teardown = Teardown::new();
        let umount = Tool::new(self.runner, "umount");
        while let Some(target) = self.mounts.pop() {
            let result = umount.run([target.as_os_str()]).map(drop);
            if result.is_ok() {
                tracing::info!(target = %target.display(), "unmounted");
            }
            teardown.attempt("unmount", result);
        }
        teardown.finish()
    }

    /// Active mount targets in the order they were mounted.
    #[must_use]
    pub fn mounts(&self) -> &[PathBuf] {
        &self.mounts
    }

    /// Number of active mounts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mounts.len()
    }

    /// Whether nothing is mounted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }
}

fn mount_invocation(source: &OsStr, target: &Path, options: &MountOptions) -> Invocation {
    let mut args: Vec<OsString> = Vec::new();
    if let Some(fs_type) = &options.fs_type {
        args.push("-t".into());
        args.push(fs_type.into());
    }
    if options.bind {
        args.push("--bind".into());
    }
    args.push(source.to_os_string());
    args.push(target.as_os_str().to_os_string());
    Invocation::new("mount").args(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;

    #[test]
    fn push_creates_target_and_records_mount() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("mnt/root");
        let runner = ScriptedRunner::new();
        let mut stack = MountStack::new(&runner);
        stack
            .push("/dev/VolGroup00/root", &target, &MountOptions::plain())
            .unwrap();
        assert!(target.is_dir());
        assert_eq!(stack.mounts(), &[target.clone()]);
        assert_eq!(
            runner.calls(),
            vec![
                format!("mount /dev/VolGroup00/root {}", target.display()),
                "udevadm settle".to_owned(),
            ]
        );
    }

    #[test]
    fn push_builds_typed_and_bind_arguments() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = ScriptedRunner::new();
        let mut stack = MountStack::new(&runner);
        let proc_dir = dir.path().join("proc");
        let dev_dir = dir.path().join("dev");
        stack.push("null", &proc_dir, &MountOptions::typed("proc")).unwrap();
        stack.push("/dev", &dev_dir, &MountOptions::bind()).unwrap();
        let mounts = runner.calls_to("mount");
        assert_eq!(mounts[0], format!("mount -t proc null {}", proc_dir.display()));
        assert_eq!(mounts[1], format!("mount --bind /dev {}", dev_dir.display()));
    }

    #[test]
    fn failed_mount_is_not_recorded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = ScriptedRunner::new().fail("mount", 32);
        let mut stack = MountStack::new(&runner);
        let err = stack
            .push("/dev/sdz1", &dir.path().join("x"), &MountOptions::plain())
            .unwrap_err();
        assert!(matches!(err, VdiskError::CommandFailed { exit_code: 32, .. }));
        assert!(stack.is_empty());
    }

    #[test]
    fn settle_failure_still_leaves_mount_recorded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = ScriptedRunner::new().fail("udevadm settle", 1);
        let mut stack = MountStack::new(&runner);
        assert!(
            stack
                .push("/dev/sda1", &dir.path().join("boot"), &MountOptions::plain())
                .is_err()
        );
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn unwind_reverses_order_and_survives_failures() {
        let dir = tempfile::tempdir().expect("tempdir");
        let targets: Vec<PathBuf> = (0..4).map(|i| dir.path().join(format!("m{i}"))).collect();
        // Second-to-last unmount to run is targets[1].
        let runner = ScriptedRunner::new().fail(&format!("umount {}", targets[1].display()), 1);
        let mut stack = MountStack::new(&runner);
        for target in &targets {
            stack.push("src", target, &MountOptions::bind()).unwrap();
        }

        let err = stack.unwind_all().unwrap_err();
        assert!(matches!(err, VdiskError::Teardown { ref failures } if failures.len() == 1));
        assert!(stack.is_empty());

        let expected: Vec<String> = targets
            .iter()
            .rev()
            .map(|t| format!("umount {}", t.display()))
            .collect();
        assert_eq!(runner.calls_to("umount"), expected);
    }

    #[test]
    fn unwind_of_empty_stack_is_noop() {
        let runner = ScriptedRunner::new();
        let mut stack = MountStack::new(&runner);
        stack.unwind_all().unwrap();
        assert!(runner.calls().is_empty());
    }
}
