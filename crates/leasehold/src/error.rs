use std::path::PathBuf;

use thiserror::Error;

use crate::store::SessionId;

/// Errors produced by the lease manager, the state store and content transfer.
#[derive(Error, Debug)]
pub enum LeaseError {
    #[error("No sessions available")]
    Exhausted,

    #[error("Session not found: {0}")]
    NotFound(SessionId),

    #[error("Session directory not found: {0}")]
    DirectoryMissing(SessionId),

    #[error("Session is not locked: {0}")]
    NotLocked(SessionId),

    #[error("Session already exists: {0}")]
    AlreadyExists(SessionId),

    #[error("Invalid session id: {0:?}")]
    InvalidSessionId(String),

    #[error("Invalid archive: {0}")]
    InvalidArchive(String),

    #[error("Invalid source: {0}")]
    InvalidSource(String),

    #[error("Content too large: {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    #[error("Too many entries: {entries} exceeds limit of {limit}")]
    TooManyEntries { entries: u64, limit: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("State file {path} is corrupt: {source}")]
    StateCorruption {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl From<zip::result::ZipError> for LeaseError {
    fn from(error: zip::result::ZipError) -> Self {
        match error {
            zip::result::ZipError::Io(err) => LeaseError::Io(err),
            other => LeaseError::InvalidArchive(other.to_string()),
        }
    }
}

pub type Result<T, E = LeaseError> = std::result::Result<T, E>;
