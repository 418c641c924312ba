//! Persistent lease table.
//!
//! The table lives in a single JSON file. Every write goes through a temp file
//! and an atomic rename, and all access is serialized through an advisory lock
//! on a companion `<state_file>.lock` file. The lock file is never replaced,
//! so every process and thread locks the same inode.
//!
//! Mutations must go through [`StateStore::update`], which holds the exclusive
//! lock across the whole load, mutate, save sequence.

mod lock;
mod table;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{LeaseError, Result};

pub use lock::{LockMode, StateLock};
pub use table::{LeaseStatus, LeaseTable, SessionId, SessionRecord};

#[derive(Debug, Clone)]
pub struct StateStore {
    state_file: PathBuf,
    lock_file: PathBuf,
}

impl StateStore {
    /// Open the store, creating the parent directory and lock file if needed.
    pub fn open(state_file: impl Into<PathBuf>) -> Result<Self> {
        let state_file = state_file.into();
        let parent = state_file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;

        let mut lock_name = state_file.as_os_str().to_owned();
        lock_name.push(".lock");
        let store = Self {
            state_file,
            lock_file: PathBuf::from(lock_name),
        };
        drop(StateLock::acquire(&store.lock_file, LockMode::Shared)?);
        debug!(state_file = %store.state_file.display(), "state store opened");
        Ok(store)
    }

    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    pub fn lock_file(&self) -> &Path {
        &self.lock_file
    }

    /// Read the committed table under a shared lock.
    pub fn load(&self) -> Result<LeaseTable> {
        let _lock = StateLock::acquire(&self.lock_file, LockMode::Shared)?;
        self.read_table()
    }

    /// Replace the whole table under an exclusive lock.
    pub fn save(&self, table: &LeaseTable) -> Result<()> {
        let _lock = StateLock::acquire(&self.lock_file, LockMode::Exclusive)?;
        self.write_table(table)
    }

    /// Linearized read-modify-write.
    ///
    /// `mutate` runs with the exclusive lock held. The table is written back
    /// only if it returns `Ok`; on error the persisted state is untouched.
    pub fn update<T, F>(&self, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut LeaseTable) -> Result<T>,
    {
        let _lock = StateLock::acquire(&self.lock_file, LockMode::Exclusive)?;
        let mut table = self.read_table()?;
        let value = mutate(&mut table)?;
        self.write_table(&table)?;
        Ok(value)
    }

    fn read_table(&self) -> Result<LeaseTable> {
        let content = match fs::read_to_string(&self.state_file) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(LeaseTable::new()),
            Err(err) => return Err(err.into()),
        };
        if content.trim().is_empty() {
            return Ok(LeaseTable::new());
        }
        serde_json::from_str(&content).map_err(|source| LeaseError::StateCorruption {
            path: self.state_file.clone(),
            source,
        })
    }

    fn write_table(&self, table: &LeaseTable) -> Result<()> {
        let dir = self
            .state_file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, table).map_err(io::Error::from)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.state_file).map_err(|err| err.error)?;
        debug!(sessions = table.len(), "state saved");
        Ok(())
    }
}
