//! Leasehold: leases exclusive-use session directories to network callers.
//!
//! A fixed pool of session directories is tracked in a lock-protected JSON
//! table. Callers acquire the lowest available session, download its content
//! as a zip archive, work on it, and release it by uploading the new content.
//! Leases that are held longer than the configured TTL are reclaimed.
//!
//! The crate can be embedded: build a [`LeaseService`] from a [`StateStore`]
//! and a [`ContentTransfer`] and mount [`api::create_router`].

pub mod admin;
pub mod api;
pub mod error;
pub mod lease;
pub mod logging;
pub mod service;
pub mod settings;
pub mod store;
pub mod transfer;

use anyhow::{Context, Result};

pub use admin::{SessionAdmin, SessionDetails};
pub use error::LeaseError;
pub use lease::LeaseManager;
pub use service::{LeaseService, Operation, Outcome};
pub use settings::Settings;
pub use store::{LeaseStatus, SessionId, SessionRecord, StateStore};
pub use transfer::{ArchiveLimits, ContentSource, ContentTransfer};

/// Open the state store and session directory named by `settings`.
pub fn open_storage(settings: &Settings) -> Result<(StateStore, ContentTransfer)> {
    let state_file = settings.storage.state_file_path()?;
    let sessions_dir = settings.storage.sessions_dir_path()?;

    let store = StateStore::open(&state_file)
        .with_context(|| format!("opening state file {}", state_file.display()))?;
    let transfer = ContentTransfer::new(&sessions_dir, settings.transfer.limits())
        .with_context(|| format!("opening sessions directory {}", sessions_dir.display()))?;
    Ok((store, transfer))
}
