//! Copying project files and creating directories inside the image.
//!
//! Ownership and permissions are applied through `chroot` so user and group
//! names resolve against the image's own account database.

use std::path::{Path, PathBuf};

use vdisk_common::config::{ManifestEntry, ManifestKind};
use vdisk_common::error::{Result, VdiskError};
use vdisk_core::process::{self, CommandRunner};

use crate::files;

fn relative_target(entry: &ManifestEntry) -> Result<&str> {
    let relative = entry.target.trim_start_matches('/');
    if relative.is_empty() {
        return Err(VdiskError::Config {
            message: format!("manifest target must name a path below /: {:?}", entry.target),
        });
    }
    Ok(relative)
}

fn source_path(project_root: &Path, entry: &ManifestEntry) -> Result<PathBuf> {
    let source = entry.source.as_deref().ok_or_else(|| VdiskError::Config {
        message: format!("source must be specified for manifest file {}", entry.target),
    })?;
    let path = project_root.join(source);
    if !path.is_file() {
        return Err(VdiskError::Config {
            message: format!("source path is not a file: {}", path.display()),
        });
    }
    Ok(path)
}

/// Checks every entry can be applied, before anything is mounted.
///
/// # Errors
///
/// Returns [`VdiskError::Config`] for an empty target, a file entry without
/// `source`, or a source that is not a file under `project_root`.
pub fn validate(project_root: &Path, entries: &[ManifestEntry]) -> Result<()> {
    for entry in entries {
        let _ = relative_target(entry)?;
        if entry.kind == ManifestKind::File {
            let _ = source_path(project_root, entry)?;
        }
    }
    Ok(())
}

/// Applies `entries` to the image mounted at `root`, in order.
///
/// # Errors
///
/// Returns the first failure: an invalid entry, an I/O error, or a failed
/// `chown`/`chmod`.
pub fn apply(
    runner: &dyn CommandRunner,
    project_root: &Path,
    root: &Path,
    entries: &[ManifestEntry],
) -> Result<()> {
    if !entries.is_empty() {
        tracing::info!(count = entries.len(), "installing files from manifest");
    }

    for entry in entries {
        let relative = relative_target(entry)?;
        let host_path = files::mounted_path(root, relative);
        let image_path = format!("/{relative}");

        match entry.kind {
            ManifestKind::File => {
                let source = source_path(project_root, entry)?;
                tracing::info!(source = %source.display(), target = %image_path, "installing file");
                let _ = std::fs::copy(&source, &host_path).map_err(|e| VdiskError::Io {
                    path: host_path.clone(),
                    source: e,
                })?;
            }
            ManifestKind::Directory => {
                tracing::info!(target = %image_path, "creating directory");
                if !host_path.is_dir() {
                    std::fs::create_dir_all(&host_path).map_err(|e| VdiskError::Io {
                        path: host_path.clone(),
                        source: e,
                    })?;
                }
            }
        }

        let owner = format!("{}:{}", entry.owner, entry.group);
        let _ = runner.run(&process::chroot(root, "chown").arg(owner).arg(&image_path))?;
        let _ = runner.run(
            &process::chroot(root, "chmod")
                .arg(entry.mode().as_octal())
                .arg(&image_path),
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdisk_common::config::VdiskConfig;
    use vdisk_core::testing::ScriptedRunner;

    fn entries(yaml: &str) -> Vec<ManifestEntry> {
        VdiskConfig::parse(yaml).unwrap().manifest
    }

    #[test]
    fn file_is_copied_then_owned_and_moded() {
        let project = tempfile::tempdir().expect("project");
        let image = tempfile::tempdir().expect("image");
        std::fs::create_dir_all(project.path().join("files")).unwrap();
        std::fs::write(project.path().join("files/motd"), "hello\n").unwrap();
        std::fs::create_dir_all(image.path().join("etc")).unwrap();

        let runner = ScriptedRunner::new();
        let manifest = entries("manifest:\n  - target: /etc/motd\n    source: files/motd\n    owner: daemon\n    mode: \"0600\"\n");
        validate(project.path(), &manifest).unwrap();
        apply(&runner, project.path(), image.path(), &manifest).unwrap();

        assert_eq!(
            std::fs::read_to_string(image.path().join("etc/motd")).unwrap(),
            "hello\n"
        );
        let root = image.path().display();
        assert_eq!(
            runner.calls(),
            vec![
                format!("chroot {root} chown daemon:root /etc/motd"),
                format!("chroot {root} chmod 0600 /etc/motd"),
            ]
        );
    }

    #[test]
    fn directory_is_created_with_default_mode() {
        let project = tempfile::tempdir().expect("project");
        let image = tempfile::tempdir().expect("image");
        let runner = ScriptedRunner::new();
        let manifest = entries("manifest:\n  - target: /srv/data\n    type: directory\n");
        apply(&runner, project.path(), image.path(), &manifest).unwrap();
        assert!(image.path().join("srv/data").is_dir());
        assert!(runner.calls()[1].ends_with("chmod 0755 /srv/data"));
    }

    #[test]
    fn validate_rejects_file_without_source() {
        let project = tempfile::tempdir().expect("project");
        let err = validate(project.path(), &entries("manifest:\n  - target: /etc/motd\n")).unwrap_err();
        assert!(err.to_string().contains("source must be specified"), "got: {err}");
    }

    #[test]
    fn validate_rejects_missing_source_file() {
        let project = tempfile::tempdir().expect("project");
        let err = validate(
            project.path(),
            &entries("manifest:\n  - target: /etc/motd\n    source: files/absent\n"),
        )
        .unwrap_err();
        assert!(matches!(err, VdiskError::Config { .. }));
    }

    #[test]
    fn validate_rejects_root_target() {
        let project = tempfile::tempdir().expect("project");
        let err = validate(
            project.path(),
            &entries("manifest:\n  - target: /\n    type: directory\n"),
        )
        .unwrap_err();
        assert!(matches!(err, VdiskError::Config { .. }));
    }
}
