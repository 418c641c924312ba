//! Zip packaging and extraction of session trees.

use std::fs::{self, File};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tempfile::tempfile;
use tracing::{debug, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::paths::{relative_entry_name, resolve_entry_path};
use crate::error::LeaseError;

/// Size ceilings applied to archives in both directions. Zero disables a limit.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveLimits {
    pub max_bytes: u64,
    pub max_entries: u64,
}

impl ArchiveLimits {
    pub const UNLIMITED: Self = Self {
        max_bytes: 0,
        max_entries: 0,
    };
}

#[derive(Default)]
struct Budget {
    bytes: u64,
    entries: u64,
}

impl Budget {
    fn add_entry(&mut self, limits: ArchiveLimits) -> Result<(), LeaseError> {
        self.entries = self.entries.saturating_add(1);
        if limits.max_entries > 0 && self.entries > limits.max_entries {
            return Err(LeaseError::TooManyEntries {
                entries: self.entries,
                limit: limits.max_entries,
            });
        }
        Ok(())
    }

    fn add_bytes(&mut self, size: u64, limits: ArchiveLimits) -> Result<(), LeaseError> {
        self.bytes = self.bytes.saturating_add(size);
        if limits.max_bytes > 0 && self.bytes > limits.max_bytes {
            return Err(LeaseError::TooLarge {
                size: self.bytes,
                limit: limits.max_bytes,
            });
        }
        Ok(())
    }

    fn remaining_bytes(&self, limits: ArchiveLimits) -> u64 {
        if limits.max_bytes == 0 {
            u64::MAX
        } else {
            limits.max_bytes.saturating_sub(self.bytes)
        }
    }
}

/// Package every regular file under `root` into a zip written to an anonymous
/// temp file. Returns the file rewound to the start and its size.
///
/// Symlinks are not followed; directories are implied by their file paths.
pub fn write_archive(root: &Path, limits: ArchiveLimits) -> Result<(File, u64), LeaseError> {
    let mut budget = Budget::default();
    let mut zip = ZipWriter::new(tempfile()?);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);

    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            if entry.file_type().is_symlink() {
                debug!(path = %entry.path().display(), "skipping symlink");
            }
            continue;
        }
        let Some(name) = relative_entry_name(root, entry.path()) else {
            continue;
        };

        budget.add_entry(limits)?;
        budget.add_bytes(entry.metadata().map_err(io::Error::from)?.len(), limits)?;

        zip.start_file(name.as_str(), options)?;
        let mut input = File::open(entry.path())?;
        io::copy(&mut input, &mut zip)?;
    }

    let mut file = zip.finish()?;
    file.flush()?;
    let size = file.seek(SeekFrom::End(0))?;
    file.seek(SeekFrom::Start(0))?;
    debug!(
        root = %root.display(),
        entries = budget.entries,
        bytes = budget.bytes,
        archive_size = size,
        "archive written"
    );
    Ok((file, size))
}

/// Extract a zip held in memory into `dest`, which must already exist.
///
/// Every entry name is checked before anything is written, so an archive with
/// a single unsafe entry leaves `dest` untouched.
pub fn extract_archive(data: &[u8], dest: &Path, limits: ArchiveLimits) -> Result<u64, LeaseError> {
    let mut archive = ZipArchive::new(Cursor::new(data))?;

    let mut budget = Budget::default();
    let mut targets = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let entry = archive.by_index(index)?;
        let target = resolve_entry_path(dest, entry.name())?;
        budget.add_entry(limits)?;
        budget.add_bytes(entry.size(), limits)?;
        targets.push((target, entry.is_dir()));
    }
    check_layout(dest, &targets)?;

    // Declared sizes are untrusted; count actual bytes as well.
    let mut written = Budget::default();
    for (index, (target, is_dir)) in targets.into_iter().enumerate() {
        if is_dir {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let entry = archive.by_index(index)?;
        let allowance = written.remaining_bytes(limits);
        let mut output = File::create(&target)?;
        let copied = io::copy(&mut entry.take(allowance.saturating_add(1)), &mut output)?;
        if let Err(err) = written.add_bytes(copied, limits) {
            warn!(entry = %target.display(), "archive expands beyond its declared size");
            return Err(err);
        }
    }

    Ok(written.bytes)
}

/// Reject archives whose entries cannot all be materialized: the same file
/// twice, or a path used both as a file and as a directory.
fn check_layout(dest: &Path, targets: &[(PathBuf, bool)]) -> Result<(), LeaseError> {
    let mut files = HashSet::new();
    let mut dirs = HashSet::new();
    for (target, is_dir) in targets {
        if *is_dir {
            dirs.insert(target.as_path());
        } else if !files.insert(target.as_path()) {
            return Err(conflict(dest, target, "duplicate entry"));
        }
        for ancestor in target.ancestors().skip(1) {
            if ancestor == dest || !ancestor.starts_with(dest) {
                break;
            }
            dirs.insert(ancestor);
        }
    }

    match files.iter().find(|file| dirs.contains(*file)) {
        Some(file) => Err(conflict(dest, file, "entry is both a file and a directory")),
        None => Ok(()),
    }
}

fn conflict(dest: &Path, target: &Path, reason: &str) -> LeaseError {
    let name = target.strip_prefix(dest).unwrap_or(target);
    warn!(entry = %name.display(), reason, "conflicting archive entry");
    LeaseError::InvalidArchive(format!("{reason}: {}", name.display()))
}
