//! Test utilities and common setup.

#![allow(dead_code)]

use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;
use std::time::Duration;

use axum::Router;
use tempfile::TempDir;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use leasehold::api::{AppState, create_router};
use leasehold::{
    ArchiveLimits, ContentSource, ContentTransfer, LeaseManager, LeaseService, SessionAdmin,
    SessionId, StateStore,
};

pub const BOUNDARY: &str = "leasehold-test-boundary";

/// A scratch pool rooted in a temporary directory.
pub struct TestPool {
    pub dir: TempDir,
    pub store: StateStore,
    pub transfer: ContentTransfer,
}

impl TestPool {
    pub fn new() -> Self {
        Self::with_limits(ArchiveLimits::UNLIMITED)
    }

    pub fn with_limits(limits: ArchiveLimits) -> Self {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(dir.path().join("state.json")).unwrap();
        let transfer = ContentTransfer::new(dir.path().join("sessions"), limits).unwrap();
        Self {
            dir,
            store,
            transfer,
        }
    }

    /// Open a second, independent handle on the same files.
    pub fn reopen(&self) -> (StateStore, ContentTransfer) {
        let store = StateStore::open(self.dir.path().join("state.json")).unwrap();
        let transfer =
            ContentTransfer::new(self.dir.path().join("sessions"), self.transfer.limits()).unwrap();
        (store, transfer)
    }

    pub fn admin(&self) -> SessionAdmin {
        SessionAdmin::new(self.store.clone(), self.transfer.clone())
    }

    pub fn manager(&self, ttl: Duration) -> LeaseManager {
        LeaseManager::new(self.store.clone(), self.transfer.clone(), ttl)
    }

    /// Create `count` sessions, each holding `README.md` with its own number.
    pub fn seed(&self, count: usize) -> Vec<SessionId> {
        let admin = self.admin();
        (0..count)
            .map(|n| {
                let seed = self.dir.path().join(format!("seed-{n}"));
                fs::create_dir_all(seed.join("src")).unwrap();
                fs::write(seed.join("README.md"), format!("session seed {n}")).unwrap();
                fs::write(seed.join("src/main.rs"), "fn main() {}").unwrap();
                admin.create(&ContentSource::Directory(seed), None).unwrap()
            })
            .collect()
    }

    pub fn session_dir(&self, id: &SessionId) -> std::path::PathBuf {
        self.transfer.session_dir(id)
    }

    pub fn app(&self, ttl: Duration) -> Router {
        create_router(AppState::new(LeaseService::new(self.manager(ttl))))
    }
}

/// Build an in-memory zip from `(name, content)` pairs.
pub fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in entries {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(content.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// Build a multipart/form-data body with a single file field.
pub fn multipart_body(field: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    write!(
        body,
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"session.zip\"\r\nContent-Type: application/zip\r\n\r\n"
    )
    .unwrap();
    body.extend_from_slice(data);
    write!(body, "\r\n--{BOUNDARY}--\r\n").unwrap();
    body
}

pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={BOUNDARY}")
}

pub fn read_file(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}
