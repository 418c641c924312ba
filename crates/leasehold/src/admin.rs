//! Out-of-band session provisioning.
//!
//! These operations bypass the lease protocol. Updating a session that is
//! currently leased replaces content under its holder; that is logged but
//! allowed.

use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::{LeaseError, Result};
use crate::store::{SessionId, SessionRecord, StateStore};
use crate::transfer::{ContentSource, ContentTransfer};

/// Detailed view of one session for operators.
#[derive(Debug, Clone, Serialize)]
pub struct SessionDetails {
    pub id: SessionId,
    #[serde(flatten)]
    pub record: SessionRecord,
    pub directory: PathBuf,
    pub directory_exists: bool,
    pub file_count: u64,
    pub directory_count: u64,
}

#[derive(Debug, Clone)]
pub struct SessionAdmin {
    store: StateStore,
    transfer: ContentTransfer,
}

impl SessionAdmin {
    pub fn new(store: StateStore, transfer: ContentTransfer) -> Self {
        Self { store, transfer }
    }

    /// Create a new available session seeded from `source`.
    ///
    /// Without an explicit id the next numeric id is used. If anything fails,
    /// a directory this call created is removed again; a directory that was
    /// already there is left alone.
    pub fn create(&self, source: &ContentSource, id: Option<SessionId>) -> Result<SessionId> {
        let mut provisioned: Option<SessionId> = None;

        let result = self.store.update(|table| {
            let id = match id {
                Some(id) if table.contains(&id) => return Err(LeaseError::AlreadyExists(id)),
                Some(id) => id,
                None => table.next_id(),
            };

            if !self.transfer.session_dir(&id).exists() {
                provisioned = Some(id.clone());
            }
            self.transfer.provision(&id, source)?;
            table.insert(id.clone(), SessionRecord::new(Utc::now()));
            Ok(id)
        });

        match result {
            Ok(id) => {
                info!(session_id = %id, "session created");
                Ok(id)
            }
            Err(err) => {
                if let Some(id) = provisioned {
                    if let Err(cleanup) = self.transfer.remove(&id) {
                        warn!(session_id = %id, error = %cleanup, "failed to roll back session directory");
                    }
                }
                Err(err)
            }
        }
    }

    /// Replace the content of an existing session.
    pub fn update(&self, id: &SessionId, source: &ContentSource) -> Result<()> {
        self.store.update(|table| {
            let record = table
                .get_mut(id)
                .ok_or_else(|| LeaseError::NotFound(id.clone()))?;
            if record.is_locked() {
                warn!(session_id = %id, "session is currently leased, updating anyway");
            }
            self.transfer.provision(id, source)?;
            record.touch(Utc::now());
            Ok(())
        })?;
        info!(session_id = %id, "session updated");
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<(SessionId, SessionRecord)>> {
        Ok(self
            .store
            .load()?
            .iter()
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect())
    }

    pub fn status(&self, id: &SessionId) -> Result<SessionDetails> {
        let record = self
            .store
            .load()?
            .get(id)
            .cloned()
            .ok_or_else(|| LeaseError::NotFound(id.clone()))?;

        let directory = self.transfer.session_dir(id);
        let directory_exists = directory.is_dir();
        let (mut file_count, mut directory_count) = (0, 0);
        if directory_exists {
            for entry in WalkDir::new(&directory).min_depth(1).into_iter().filter_map(|e| e.ok()) {
                if entry.file_type().is_file() {
                    file_count += 1;
                } else if entry.file_type().is_dir() {
                    directory_count += 1;
                }
            }
        }

        Ok(SessionDetails {
            id: id.clone(),
            record,
            directory,
            directory_exists,
            file_count,
            directory_count,
        })
    }
}
