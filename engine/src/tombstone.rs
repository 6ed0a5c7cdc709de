//! Tombstones.
//!
//! A deleted record is kept with `deleted_at` set instead of being removed,
//! so a stale snapshot of it arriving later cannot bring it back. Tombstones
//! are only dropped by an explicit purge.

use crate::{
    error::Result, EntityRepository, LocalRecord, RemoteState, Replica, Timestamp,
};

/// Rules for marking, honouring and purging tombstones.
pub struct TombstoneManager;

impl TombstoneManager {
    /// Mark a record deleted at `at`. An existing tombstone only moves
    /// forward.
    pub fn bury(record: &mut LocalRecord, at: Timestamp) {
        record.deleted_at = Some(record.deleted_at.map_or(at, |t| t.max(at)));
    }

    /// Whether a live remote state is older than the local tombstone and
    /// must be ignored.
    pub fn suppresses(record: &LocalRecord, remote: &RemoteState) -> bool {
        !remote.deleted
            && record
                .deleted_at
                .is_some_and(|deleted_at| remote.version.updated_at < deleted_at)
    }

    /// Overwrite the record with the server's state.
    pub(crate) fn apply_remote(record: &mut LocalRecord, remote: &RemoteState) {
        if remote.deleted {
            Self::bury(record, remote.version.updated_at);
        } else {
            if let Some(payload) = &remote.payload {
                record.payload = payload.clone();
            }
            record.deleted_at = None;
        }
        record.observe_version(remote.version);
    }
}

impl<R: EntityRepository> Replica<R> {
    /// Physically remove tombstones deleted before `older_than`.
    ///
    /// Tombstones with a pending change or an open conflict are kept.
    /// Returns how many records were removed.
    pub fn purge_tombstones(&mut self, tenant_id: &str, older_than: Timestamp) -> Result<usize> {
        let mut purged = 0;
        for table in self.schema.table_names() {
            for record in self.repository.list(tenant_id, &table)? {
                let expired = record.deleted_at.is_some_and(|t| t < older_than);
                if !expired
                    || self
                        .change_log
                        .pending_for(tenant_id, &table, &record.id)
                        .is_some()
                    || self.state.conflict(tenant_id, &table, &record.id).is_some()
                {
                    continue;
                }
                self.repository.delete(tenant_id, &table, &record.id)?;
                self.state.clear_status(tenant_id, &table, &record.id);
                purged += 1;
            }
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Payload, RemoteVersion};
    use serde_json::json;

    fn record() -> LocalRecord {
        LocalRecord::new(
            "t1",
            "customers",
            "c1",
            json!({"name": "Ana"}).as_object().cloned().unwrap(),
        )
    }

    #[test]
    fn bury_only_moves_forward() {
        let mut r = record();
        TombstoneManager::bury(&mut r, 2000);
        TombstoneManager::bury(&mut r, 1000);
        assert_eq!(r.deleted_at, Some(2000));
        assert!(!r.is_active());
    }

    #[test]
    fn older_snapshot_is_suppressed() {
        let mut r = record();
        TombstoneManager::bury(&mut r, 2000);

        let stale = RemoteState::live(RemoteVersion::new(1500, 4), Payload::new());
        let fresh = RemoteState::live(RemoteVersion::new(2500, 5), Payload::new());
        assert!(TombstoneManager::suppresses(&r, &stale));
        assert!(!TombstoneManager::suppresses(&r, &fresh));
        assert!(!TombstoneManager::suppresses(&record(), &stale));
    }

    #[test]
    fn apply_remote_revives_and_tracks_version() {
        let mut r = record();
        TombstoneManager::bury(&mut r, 2000);
        let remote = RemoteState::live(
            RemoteVersion::new(3000, 9),
            json!({"name": "Bea"}).as_object().cloned().unwrap(),
        );
        TombstoneManager::apply_remote(&mut r, &remote);

        assert!(r.is_active());
        assert_eq!(r.payload.get("name"), Some(&json!("Bea")));
        assert_eq!(r.remote_version, Some(RemoteVersion::new(3000, 9)));
    }

    #[test]
    fn apply_remote_delete_keeps_payload() {
        let mut r = record();
        TombstoneManager::apply_remote(&mut r, &RemoteState::deleted(RemoteVersion::new(3000, 9)));
        assert_eq!(r.deleted_at, Some(3000));
        assert_eq!(r.payload.get("name"), Some(&json!("Ana")));
    }
}
