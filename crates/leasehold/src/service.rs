//! Typed entry point for the network surface.

use bytes::Bytes;
use tracing::debug;

use crate::error::Result;
use crate::lease::LeaseManager;
use crate::store::SessionId;
use crate::transfer::ExportedArchive;

/// Requests the HTTP layer can make.
#[derive(Debug, Clone)]
pub enum Operation {
    Acquire,
    Export(SessionId),
    Release(SessionId, Bytes),
    Health,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Acquire => "acquire",
            Operation::Export(_) => "export",
            Operation::Release(..) => "release",
            Operation::Health => "health",
        }
    }
}

#[derive(Debug)]
pub enum Outcome {
    Acquired(SessionId),
    Exported(ExportedArchive),
    Released(SessionId),
    Healthy,
}

/// Dispatches [`Operation`]s to the lease manager and content transfer.
///
/// Every call blocks on file locks and disk IO; async callers should run it
/// on the blocking pool.
#[derive(Debug, Clone)]
pub struct LeaseService {
    manager: LeaseManager,
}

impl LeaseService {
    pub fn new(manager: LeaseManager) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &LeaseManager {
        &self.manager
    }

    pub fn execute(&self, operation: Operation) -> Result<Outcome> {
        debug!(operation = operation.name(), "executing operation");
        match operation {
            Operation::Acquire => self.manager.acquire().map(Outcome::Acquired),
            Operation::Export(id) => self.manager.transfer().export(&id).map(Outcome::Exported),
            Operation::Release(id, archive) => {
                self.manager.release(&id, &archive)?;
                Ok(Outcome::Released(id))
            }
            Operation::Health => Ok(Outcome::Healthy),
        }
    }
}
