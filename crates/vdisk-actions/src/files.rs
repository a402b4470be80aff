//! Writing files into a mounted image.

use std::path::{Path, PathBuf};

use vdisk_common::error::{Result, VdiskError};

/// Resolves `relative` under `root`, ignoring any leading `/`.
#[must_use]
pub fn mounted_path(root: &Path, relative: &str) -> PathBuf {
    root.join(relative.trim_start_matches('/'))
}

/// Writes `lines`, each terminated by a newline, to `relative` under
/// `root`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`VdiskError::Io`] if a directory or the file cannot be written.
pub fn write_lines<S: AsRef<str>>(root: &Path, relative: &str, lines: &[S]) -> Result<PathBuf> {
    let path = mounted_path(root, relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| VdiskError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    let mut contents = String::new();
    for line in lines {
        contents.push_str(line.as_ref());
        contents.push('\n');
    }
    std::fs::write(&path, contents).map_err(|e| VdiskError::Io {
        path: path.clone(),
        source: e,
    })?;
    tracing::debug!(path = %path.display(), lines = lines.len(), "wrote file");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_lines_creates_parents_and_terminates_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_lines(dir.path(), "/etc/apt/sources.list", &["# a", "deb x y main"]).unwrap();
        assert_eq!(path, dir.path().join("etc/apt/sources.list"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "# a\ndeb x y main\n");
    }

    #[test]
    fn mounted_path_strips_leading_slashes() {
        assert_eq!(
            mounted_path(Path::new("/mnt"), "//usr/sbin/policy-rc.d"),
            Path::new("/mnt/usr/sbin/policy-rc.d")
        );
    }
}
