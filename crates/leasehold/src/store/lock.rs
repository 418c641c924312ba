//! Advisory `flock` guard on the state lock file.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use rustix::fs::{FlockOperation, flock};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Held advisory lock. Released when dropped.
///
/// `flock` locks belong to the open file description, so two guards opened
/// independently exclude each other even inside one process.
#[derive(Debug)]
pub struct StateLock {
    file: File,
}

impl StateLock {
    /// Block until the lock on `path` is held in `mode`.
    pub fn acquire(path: &Path, mode: LockMode) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let operation = match mode {
            LockMode::Shared => FlockOperation::LockShared,
            LockMode::Exclusive => FlockOperation::LockExclusive,
        };
        flock(&file, operation)?;
        trace!(path = %path.display(), ?mode, "state lock acquired");

        Ok(Self { file })
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        // Closing the descriptor releases the lock as well; unlocking first
        // makes the release independent of any duplicated descriptors.
        let _ = flock(&self.file, FlockOperation::Unlock);
    }
}
