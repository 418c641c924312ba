//! Session content transfer.
//!
//! Sessions travel as zip archives. Replacing a session's content always goes
//! through a staging directory next to the session directory: the new tree is
//! fully materialized first and then swapped in by rename, so a failed import
//! leaves the previous content in place.

mod archive;
mod paths;
mod source;

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::error::{LeaseError, Result};
use crate::store::SessionId;

pub use archive::{ArchiveLimits, extract_archive, write_archive};
pub use source::ContentSource;

/// A packaged session ready to be streamed to a caller.
#[derive(Debug)]
pub struct ExportedArchive {
    pub file: File,
    pub size: u64,
    pub file_name: String,
}

#[derive(Debug, Clone)]
pub struct ContentTransfer {
    sessions_dir: PathBuf,
    limits: ArchiveLimits,
}

impl ContentTransfer {
    pub fn new(sessions_dir: impl Into<PathBuf>, limits: ArchiveLimits) -> Result<Self> {
        let sessions_dir = sessions_dir.into();
        fs::create_dir_all(&sessions_dir)?;
        Ok(Self {
            sessions_dir,
            limits,
        })
    }

    pub fn sessions_dir(&self) -> &Path {
        &self.sessions_dir
    }

    pub fn limits(&self) -> ArchiveLimits {
        self.limits
    }

    pub fn session_dir(&self, id: &SessionId) -> PathBuf {
        self.sessions_dir.join(id.as_str())
    }

    /// Package the session directory into a zip.
    pub fn export(&self, id: &SessionId) -> Result<ExportedArchive> {
        let dir = self.session_dir(id);
        if !dir.is_dir() {
            return Err(LeaseError::DirectoryMissing(id.clone()));
        }
        let (file, size) = write_archive(&dir, self.limits)?;
        debug!(session_id = %id, size, "session exported");
        Ok(ExportedArchive {
            file,
            size,
            file_name: format!("session_{id}.zip"),
        })
    }

    /// Replace the session directory with the contents of a zip archive.
    pub fn import(&self, id: &SessionId, data: &[u8]) -> Result<u64> {
        if self.limits.max_bytes > 0 && data.len() as u64 > self.limits.max_bytes {
            return Err(LeaseError::TooLarge {
                size: data.len() as u64,
                limit: self.limits.max_bytes,
            });
        }
        let limits = self.limits;
        let bytes = self.replace_with(id, |staging| extract_archive(data, staging, limits))?;
        info!(session_id = %id, bytes, "session content imported");
        Ok(bytes)
    }

    /// Replace the session directory from a directory or archive on disk.
    pub fn provision(&self, id: &SessionId, content: &ContentSource) -> Result<u64> {
        let bytes = match content {
            ContentSource::Directory(path) => {
                self.replace_with(id, |staging| source::copy_tree(path, staging))?
            }
            ContentSource::Archive(path) => {
                let data = fs::read(path)?;
                self.replace_with(id, |staging| extract_archive(&data, staging, self.limits))?
            }
        };
        info!(session_id = %id, source = %content.path().display(), bytes, "session provisioned");
        Ok(bytes)
    }

    /// Remove the session directory if present.
    pub fn remove(&self, id: &SessionId) -> Result<()> {
        match fs::remove_dir_all(self.session_dir(id)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn replace_with<F>(&self, id: &SessionId, fill: F) -> Result<u64>
    where
        F: FnOnce(&Path) -> Result<u64>,
    {
        let target = self.session_dir(id);
        // Dropping the TempDir cleans up staging on every failure path. After
        // a successful swap the path no longer exists and the drop is a no-op.
        let staging = tempfile::Builder::new()
            .prefix(&format!(".staging-{id}-"))
            .tempdir_in(&self.sessions_dir)?;

        let bytes = fill(staging.path())?;

        if target.exists() {
            let retired = self.sessions_dir.join(format!(".retired-{id}-{}", nonce()));
            fs::rename(&target, &retired)?;
            if let Err(err) = fs::rename(staging.path(), &target) {
                warn!(session_id = %id, error = %err, "swap failed, restoring previous content");
                fs::rename(&retired, &target)?;
                return Err(err.into());
            }
            if let Err(err) = fs::remove_dir_all(&retired) {
                warn!(path = %retired.display(), error = %err, "failed to remove retired session content");
            }
        } else {
            fs::rename(staging.path(), &target)?;
        }

        Ok(bytes)
    }
}

fn nonce() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read, Write};
    use tempfile::TempDir;
    use zip::ZipWriter;
    use zip::write::SimpleFileOptions;

    fn id(raw: &str) -> SessionId {
        SessionId::parse(raw).unwrap()
    }

    fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    fn transfer(dir: &TempDir) -> ContentTransfer {
        ContentTransfer::new(dir.path().join("sessions"), ArchiveLimits::UNLIMITED).unwrap()
    }

    fn visible_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_export_missing_directory() {
        let dir = TempDir::new().unwrap();
        let transfer = transfer(&dir);
        assert!(matches!(
            transfer.export(&id("1")),
            Err(LeaseError::DirectoryMissing(_))
        ));
    }

    #[test]
    fn test_import_replaces_previous_content() {
        let dir = TempDir::new().unwrap();
        let transfer = transfer(&dir);
        let session = transfer.session_dir(&id("1"));
        fs::create_dir_all(&session).unwrap();
        fs::write(session.join("stale.txt"), "old").unwrap();

        transfer
            .import(&id("1"), &zip_bytes(&[("fresh/new.txt", "new")]))
            .unwrap();

        assert!(!session.join("stale.txt").exists());
        assert_eq!(
            fs::read_to_string(session.join("fresh/new.txt")).unwrap(),
            "new"
        );
        assert_eq!(visible_entries(transfer.sessions_dir()), ["1"]);
    }

    #[test]
    fn test_failed_import_keeps_previous_content() {
        let dir = TempDir::new().unwrap();
        let transfer = transfer(&dir);
        let session = transfer.session_dir(&id("1"));
        fs::create_dir_all(&session).unwrap();
        fs::write(session.join("keep.txt"), "old").unwrap();

        let result = transfer.import(&id("1"), &zip_bytes(&[("../../evil.txt", "x")]));
        assert!(matches!(result, Err(LeaseError::InvalidArchive(_))));
        assert_eq!(fs::read_to_string(session.join("keep.txt")).unwrap(), "old");
        assert_eq!(visible_entries(transfer.sessions_dir()), ["1"]);

        let result = transfer.import(&id("1"), b"garbage");
        assert!(matches!(result, Err(LeaseError::InvalidArchive(_))));
        assert_eq!(fs::read_to_string(session.join("keep.txt")).unwrap(), "old");
    }

    #[test]
    fn test_import_rejects_oversized_upload() {
        let dir = TempDir::new().unwrap();
        let transfer = ContentTransfer::new(
            dir.path().join("sessions"),
            ArchiveLimits {
                max_bytes: 16,
                max_entries: 0,
            },
        )
        .unwrap();
        let result = transfer.import(&id("1"), &[0u8; 64]);
        assert!(matches!(result, Err(LeaseError::TooLarge { .. })));
    }

    #[test]
    fn test_export_import_round_trip() {
        let dir = TempDir::new().unwrap();
        let transfer = transfer(&dir);
        let original = transfer.session_dir(&id("1"));
        fs::create_dir_all(original.join("src")).unwrap();
        fs::write(original.join("src/main.rs"), "fn main() {}").unwrap();
        fs::write(original.join("README"), "readme").unwrap();

        let mut exported = transfer.export(&id("1")).unwrap();
        assert_eq!(exported.file_name, "session_1.zip");
        let mut data = Vec::new();
        exported.file.read_to_end(&mut data).unwrap();
        assert_eq!(data.len() as u64, exported.size);

        transfer.import(&id("2"), &data).unwrap();
        let copy = transfer.session_dir(&id("2"));
        assert_eq!(
            fs::read_to_string(copy.join("src/main.rs")).unwrap(),
            "fn main() {}"
        );
        assert_eq!(fs::read_to_string(copy.join("README")).unwrap(), "readme");
    }

    #[test]
    fn test_provision_from_directory_and_archive() {
        let dir = TempDir::new().unwrap();
        let transfer = transfer(&dir);

        let seed = dir.path().join("seed");
        fs::create_dir_all(seed.join("nested")).unwrap();
        fs::write(seed.join("nested/a.txt"), "a").unwrap();
        transfer
            .provision(&id("1"), &ContentSource::Directory(seed))
            .unwrap();
        assert_eq!(
            fs::read_to_string(transfer.session_dir(&id("1")).join("nested/a.txt")).unwrap(),
            "a"
        );

        let archive = dir.path().join("seed.zip");
        fs::write(&archive, zip_bytes(&[("b.txt", "b")])).unwrap();
        transfer
            .provision(&id("1"), &ContentSource::Archive(archive))
            .unwrap();
        let session = transfer.session_dir(&id("1"));
        assert!(!session.join("nested").exists());
        assert_eq!(fs::read_to_string(session.join("b.txt")).unwrap(), "b");
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let transfer = transfer(&dir);
        fs::create_dir_all(transfer.session_dir(&id("1"))).unwrap();
        transfer.remove(&id("1")).unwrap();
        transfer.remove(&id("1")).unwrap();
        assert!(!transfer.session_dir(&id("1")).exists());
    }
}
