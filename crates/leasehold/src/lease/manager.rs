use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::error::{LeaseError, Result};
use crate::store::{LeaseTable, SessionId, SessionRecord, StateStore};
use crate::transfer::ContentTransfer;

/// Reset every lease older than `ttl` to available. Returns the reclaimed ids.
pub fn reclaim_expired(table: &mut LeaseTable, now: DateTime<Utc>, ttl: Duration) -> Vec<SessionId> {
    let mut reclaimed = Vec::new();
    for (id, record) in table.iter_mut() {
        if record.is_expired(now, ttl) {
            warn!(
                session_id = %id,
                lease_acquired_at = ?record.lease_acquired_at,
                "reclaiming expired lease"
            );
            record.unlock();
            reclaimed.push(id.clone());
        }
    }
    reclaimed
}

/// Lease manager over an injected state store and content transfer.
#[derive(Debug, Clone)]
pub struct LeaseManager {
    store: StateStore,
    transfer: ContentTransfer,
    ttl: Duration,
}

impl LeaseManager {
    pub fn new(store: StateStore, transfer: ContentTransfer, ttl: StdDuration) -> Self {
        let ttl = Duration::from_std(ttl).unwrap_or(Duration::MAX);
        Self {
            store,
            transfer,
            ttl,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn transfer(&self) -> &ContentTransfer {
        &self.transfer
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Lease the first available session in ascending id order.
    ///
    /// Expired leases are reclaimed first, inside the same locked update.
    pub fn acquire(&self) -> Result<SessionId> {
        let ttl = self.ttl;
        let id = self.store.update(|table| {
            let now = Utc::now();
            reclaim_expired(table, now, ttl);

            let (id, record) = table
                .iter_mut()
                .find(|(_, record)| record.is_available())
                .ok_or(LeaseError::Exhausted)?;
            record.lock(now);
            Ok(id.clone())
        })?;
        info!(session_id = %id, "session acquired");
        Ok(id)
    }

    /// Return a leased session together with its new content.
    ///
    /// The content swap happens while the state lock is held. If it fails the
    /// table is not written and the lease stays held, so the caller can retry
    /// and nobody else can acquire a half-written directory.
    pub fn release(&self, id: &SessionId, archive: &[u8]) -> Result<()> {
        self.store.update(|table| {
            let record = table
                .get(id)
                .ok_or_else(|| LeaseError::NotFound(id.clone()))?;
            if !record.is_locked() {
                return Err(LeaseError::NotLocked(id.clone()));
            }

            self.transfer.import(id, archive)?;

            if let Some(record) = table.get_mut(id) {
                record.unlock();
                record.touch(Utc::now());
            }
            Ok(())
        })?;
        info!(session_id = %id, "session released");
        Ok(())
    }

    /// Run expiry reclamation on its own, outside of an acquire.
    pub fn sweep(&self) -> Result<Vec<SessionId>> {
        let ttl = self.ttl;
        let reclaimed = self
            .store
            .update(|table| Ok(reclaim_expired(table, Utc::now(), ttl)))?;
        debug!(reclaimed = reclaimed.len(), "lease sweep finished");
        Ok(reclaimed)
    }

    pub fn get(&self, id: &SessionId) -> Result<SessionRecord> {
        self.store
            .load()?
            .get(id)
            .cloned()
            .ok_or_else(|| LeaseError::NotFound(id.clone()))
    }

    pub fn list(&self) -> Result<Vec<(SessionId, SessionRecord)>> {
        Ok(self
            .store
            .load()?
            .iter()
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LeaseStatus;
    use crate::transfer::ArchiveLimits;
    use std::io::{Cursor, Write};
    use tempfile::TempDir;
    use zip::ZipWriter;
    use zip::write::SimpleFileOptions;

    fn id(raw: &str) -> SessionId {
        SessionId::parse(raw).unwrap()
    }

    fn manager(dir: &TempDir, ttl: StdDuration) -> LeaseManager {
        let store = StateStore::open(dir.path().join("state.json")).unwrap();
        let transfer =
            ContentTransfer::new(dir.path().join("sessions"), ArchiveLimits::UNLIMITED).unwrap();
        LeaseManager::new(store, transfer, ttl)
    }

    fn seed(manager: &LeaseManager, ids: &[&str]) {
        manager
            .store()
            .update(|table| {
                for raw in ids {
                    table.insert(id(raw), SessionRecord::new(Utc::now()));
                }
                Ok(())
            })
            .unwrap();
    }

    fn archive(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    #[test]
    fn test_reclaim_only_touches_expired_locks() {
        let now = Utc::now();
        let ttl = Duration::minutes(30);
        let mut table = LeaseTable::new();

        let mut fresh = SessionRecord::new(now);
        fresh.lock(now - Duration::minutes(5));
        let mut stale = SessionRecord::new(now);
        stale.lock(now - Duration::minutes(31));
        table.insert(id("1"), fresh.clone());
        table.insert(id("2"), stale);
        table.insert(id("3"), SessionRecord::new(now));

        let reclaimed = reclaim_expired(&mut table, now, ttl);

        assert_eq!(reclaimed, vec![id("2")]);
        assert_eq!(table.get(&id("1")), Some(&fresh));
        let record = table.get(&id("2")).unwrap();
        assert_eq!(record.status, LeaseStatus::Available);
        assert!(record.lease_acquired_at.is_none());
    }

    #[test]
    fn test_acquire_on_empty_pool_is_exhausted() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, StdDuration::from_secs(60));
        assert!(matches!(manager.acquire(), Err(LeaseError::Exhausted)));
    }

    #[test]
    fn test_acquire_picks_lowest_available_id() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, StdDuration::from_secs(60));
        seed(&manager, &["10", "2", "alpha"]);

        assert_eq!(manager.acquire().unwrap(), id("2"));
        assert_eq!(manager.acquire().unwrap(), id("10"));
        assert_eq!(manager.acquire().unwrap(), id("alpha"));
        assert!(matches!(manager.acquire(), Err(LeaseError::Exhausted)));
    }

    #[test]
    fn test_single_session_lifecycle() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, StdDuration::from_secs(60));
        seed(&manager, &["1"]);

        assert_eq!(manager.acquire().unwrap(), id("1"));
        let record = manager.get(&id("1")).unwrap();
        assert!(record.is_locked());
        assert!(record.lease_acquired_at.is_some());

        assert!(matches!(manager.acquire(), Err(LeaseError::Exhausted)));

        let content = archive(&[("work/result.txt", "done")]);
        manager.release(&id("1"), &content).unwrap();
        let record = manager.get(&id("1")).unwrap();
        assert!(record.is_available());
        assert!(record.lease_acquired_at.is_none());
        let session_dir = manager.transfer().session_dir(&id("1"));
        assert_eq!(
            std::fs::read_to_string(session_dir.join("work/result.txt")).unwrap(),
            "done"
        );

        assert!(matches!(
            manager.release(&id("1"), &content),
            Err(LeaseError::NotLocked(_))
        ));
    }

    #[test]
    fn test_release_unknown_session() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, StdDuration::from_secs(60));
        assert!(matches!(
            manager.release(&id("9"), &archive(&[("a", "b")])),
            Err(LeaseError::NotFound(_))
        ));
    }

    #[test]
    fn test_release_not_locked_leaves_record_untouched() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, StdDuration::from_secs(60));
        seed(&manager, &["1"]);
        let before = manager.get(&id("1")).unwrap();

        let result = manager.release(&id("1"), &archive(&[("a", "b")]));
        assert!(matches!(result, Err(LeaseError::NotLocked(_))));
        assert_eq!(manager.get(&id("1")).unwrap(), before);
        assert!(!manager.transfer().session_dir(&id("1")).exists());
    }

    #[test]
    fn test_failed_import_keeps_lease_locked() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, StdDuration::from_secs(60));
        seed(&manager, &["1"]);
        manager.acquire().unwrap();

        let result = manager.release(&id("1"), b"not an archive");
        assert!(matches!(result, Err(LeaseError::InvalidArchive(_))));
        assert!(manager.get(&id("1")).unwrap().is_locked());

        let result = manager.release(&id("1"), &archive(&[("../escape", "x")]));
        assert!(matches!(result, Err(LeaseError::InvalidArchive(_))));
        assert!(manager.get(&id("1")).unwrap().is_locked());

        manager.release(&id("1"), &archive(&[("ok", "x")])).unwrap();
        assert!(manager.get(&id("1")).unwrap().is_available());
    }

    #[test]
    fn test_expired_lease_is_reclaimed_by_acquire() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, StdDuration::from_secs(1));
        seed(&manager, &["2"]);
        manager
            .store()
            .update(|table| {
                table
                    .get_mut(&id("2"))
                    .unwrap()
                    .lock(Utc::now() - Duration::seconds(10));
                Ok(())
            })
            .unwrap();

        assert_eq!(manager.acquire().unwrap(), id("2"));
        let record = manager.get(&id("2")).unwrap();
        assert!(record.is_locked());
        let acquired = record.lease_acquired_at.unwrap();
        assert!(Utc::now() - acquired < Duration::seconds(5));
    }

    #[test]
    fn test_sweep_reclaims_without_acquiring() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, StdDuration::from_secs(1));
        seed(&manager, &["1", "2"]);
        manager
            .store()
            .update(|table| {
                table
                    .get_mut(&id("1"))
                    .unwrap()
                    .lock(Utc::now() - Duration::seconds(10));
                table.get_mut(&id("2")).unwrap().lock(Utc::now());
                Ok(())
            })
            .unwrap();

        assert_eq!(manager.sweep().unwrap(), vec![id("1")]);
        let sessions = manager.list().unwrap();
        assert!(sessions[0].1.is_available());
        assert!(sessions[1].1.is_locked());
    }
}
