//! Scratch project directories for action tests.

use std::path::{Path, PathBuf};

use vdisk_common::config::Settings;

pub(crate) struct Project {
    dir: tempfile::TempDir,
}

impl Project {
    /// A project root holding an empty `disk.img` and a default selections
    /// file.
    pub(crate) fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("disk.img"), b"").expect("image");
        std::fs::create_dir_all(dir.path().join("selections")).expect("selections dir");
        std::fs::write(
            dir.path().join("selections/default"),
            "openssh-server\tinstall\n",
        )
        .expect("selections");
        Self { dir }
    }

    pub(crate) fn root(&self) -> &Path {
        self.dir.path()
    }

    pub(crate) fn mountpoint(&self) -> PathBuf {
        self.root().join("tmp/mount")
    }

    pub(crate) fn settings(&self) -> Settings {
        Settings::new(self.root(), self.root().join("disk.img"))
    }
}
