use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::LeaseError;

/// Where provisioned session content comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentSource {
    /// Copy the contents of an existing directory.
    Directory(PathBuf),
    /// Extract a zip archive from disk.
    Archive(PathBuf),
}

impl ContentSource {
    /// Classify `path` by what it is on disk, not by its extension.
    pub fn resolve(path: impl AsRef<Path>) -> Result<Self, LeaseError> {
        let path = path.as_ref();
        let metadata = fs::metadata(path).map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                LeaseError::InvalidSource(format!("source does not exist: {}", path.display()))
            } else {
                LeaseError::Io(err)
            }
        })?;

        if metadata.is_dir() {
            Ok(Self::Directory(path.to_path_buf()))
        } else if metadata.is_file() {
            Ok(Self::Archive(path.to_path_buf()))
        } else {
            Err(LeaseError::InvalidSource(format!(
                "expected a directory or archive file: {}",
                path.display()
            )))
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Directory(path) | Self::Archive(path) => path,
        }
    }
}

/// Copy regular files and directories from `source` into the existing `dest`.
/// Symlinks are skipped.
pub(crate) fn copy_tree(source: &Path, dest: &Path) -> Result<u64, LeaseError> {
    let mut copied = 0u64;
    for entry in WalkDir::new(source).min_depth(1).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|_| LeaseError::InvalidSource(entry.path().display().to_string()))?;
        let target = dest.join(relative);

        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            copied += fs::copy(entry.path(), &target)?;
        } else {
            debug!(path = %entry.path().display(), "skipping non-regular file");
        }
    }
    Ok(copied)
}
