//! Replica - the device-side sync state for one entity store.
//!
//! A [`Replica`] ties the entity repository to the change log and the sync
//! state store. Local mutations go through [`Replica::enqueue`], which
//! writes the record and queues its change as one unit: the repository
//! write comes first, and if it fails nothing else is touched.

use crate::{
    change_log::Disposition, error::Result, ChangeAction, ChangeLog, Enqueued, EntityRepository,
    Error, LocalRecord, MemoryRepository, Payload, PriorState, Schema, SyncStateStore,
    SyncStatus, SyncSummary, TableName, Timestamp,
};

/// Local replica of the tenant data on this device.
#[derive(Debug, Clone)]
pub struct Replica<R = MemoryRepository> {
    /// Table definitions for validation
    pub(crate) schema: Schema,
    /// Entity storage
    pub(crate) repository: R,
    /// Pending local changes
    pub(crate) change_log: ChangeLog,
    /// Status, cursors and conflicts
    pub(crate) state: SyncStateStore,
}

impl<R: EntityRepository> Replica<R> {
    pub fn new(schema: Schema, repository: R) -> Self {
        Self {
            schema,
            repository,
            change_log: ChangeLog::new(),
            state: SyncStateStore::new(),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn change_log(&self) -> &ChangeLog {
        &self.change_log
    }

    pub fn state(&self) -> &SyncStateStore {
        &self.state
    }

    /// Tables this replica syncs.
    pub fn tables(&self) -> Vec<TableName> {
        self.schema.table_names()
    }

    /// Get a record, tombstones included.
    pub fn get(&self, tenant_id: &str, table: &str, id: &str) -> Result<Option<LocalRecord>> {
        self.repository.get(tenant_id, table, id)
    }

    /// Live records of a table.
    pub fn list(&self, tenant_id: &str, table: &str) -> Result<Vec<LocalRecord>> {
        Ok(self
            .repository
            .list(tenant_id, table)?
            .into_iter()
            .filter(LocalRecord::is_active)
            .collect())
    }

    pub fn summary(&self, tenant_id: &str) -> SyncSummary {
        self.state.summary(tenant_id)
    }

    /// Start a sync cycle for a tenant.
    pub fn begin_cycle(&mut self, tenant_id: &str) -> u64 {
        self.state.begin_cycle(tenant_id)
    }

    /// Record a completed sync cycle.
    pub fn mark_synced_at(&mut self, tenant_id: &str, now: Timestamp) {
        self.state.mark_synced_at(tenant_id, now);
    }

    pub fn create(
        &mut self,
        tenant_id: &str,
        table: &str,
        id: &str,
        payload: Payload,
        now: Timestamp,
    ) -> Result<Enqueued> {
        self.enqueue(tenant_id, table, id, ChangeAction::Create, payload, now)
    }

    pub fn update(
        &mut self,
        tenant_id: &str,
        table: &str,
        id: &str,
        patch: Payload,
        now: Timestamp,
    ) -> Result<Enqueued> {
        self.enqueue(tenant_id, table, id, ChangeAction::Update, patch, now)
    }

    pub fn delete(
        &mut self,
        tenant_id: &str,
        table: &str,
        id: &str,
        now: Timestamp,
    ) -> Result<Enqueued> {
        self.enqueue(tenant_id, table, id, ChangeAction::Delete, Payload::new(), now)
    }

    /// Apply a local mutation and queue it for push.
    ///
    /// The record's status becomes `Pending`. A create followed by a delete
    /// of a record the server never saw removes both the record and the
    /// queued change.
    pub fn enqueue(
        &mut self,
        tenant_id: &str,
        table: &str,
        record_id: &str,
        action: ChangeAction,
        payload: Payload,
        now: Timestamp,
    ) -> Result<Enqueued> {
        self.schema.validate_change(table, action, &payload)?;

        let existing = self.repository.get(tenant_id, table, record_id)?;
        let prior = existing.as_ref().map(|r| PriorState {
            payload: r.payload.clone(),
            deleted: !r.is_active(),
        });

        let record = match (action, existing) {
            (ChangeAction::Create, Some(r)) if r.is_active() => {
                return Err(Error::RecordAlreadyExists(record_id.to_string()));
            }
            (ChangeAction::Create, Some(mut r)) => {
                r.payload = payload.clone();
                r.deleted_at = None;
                r
            }
            (ChangeAction::Create, None) => {
                LocalRecord::new(tenant_id, table, record_id, payload.clone())
            }
            (ChangeAction::Update, Some(mut r)) if r.is_active() => {
                r.merge_payload(&payload);
                r
            }
            (ChangeAction::Delete, Some(mut r)) if r.is_active() => {
                r.deleted_at = Some(now);
                r
            }
            (_, Some(_)) => return Err(Error::RecordDeleted(record_id.to_string())),
            (_, None) => return Err(Error::RecordNotFound(record_id.to_string())),
        };

        let cancels = action == ChangeAction::Delete
            && self
                .change_log
                .pending_for(tenant_id, table, record_id)
                .is_some_and(|c| c.action == ChangeAction::Create && c.base_version.is_none());

        let base = record.remote_version;
        if cancels {
            self.repository.delete(tenant_id, table, record_id)?;
        } else {
            self.commit(record, SyncStatus::Pending)?;
        }

        let enqueued = self.change_log.enqueue(
            tenant_id, table, record_id, action, payload, base, prior, now,
        );
        if enqueued.disposition == Disposition::Cancelled {
            self.state.clear_status(tenant_id, table, record_id);
        }
        Ok(enqueued)
    }

    /// Write a record and its status.
    ///
    /// The repository write is the only fallible step, so it goes first.
    /// An open conflict case keeps the record marked `Conflict`.
    pub(crate) fn commit(&mut self, mut record: LocalRecord, status: SyncStatus) -> Result<()> {
        let in_conflict = self
            .state
            .conflict(&record.tenant_id, &record.table, &record.id)
            .is_some();
        record.sync_status = if in_conflict {
            SyncStatus::Conflict
        } else {
            status
        };

        let (tenant_id, table, id) = (
            record.tenant_id.clone(),
            record.table.clone(),
            record.id.clone(),
        );
        self.repository.put(record)?;
        self.state.set_status(&tenant_id, &table, &id, status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FieldDef, FieldType, RemoteVersion, TableSchema};
    use serde_json::json;

    fn payload(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    fn replica() -> Replica {
        let schema = Schema::new(1)
            .with_table(TableSchema::new(
                "customers",
                vec![
                    FieldDef::required("name", FieldType::String),
                    FieldDef::optional("phone", FieldType::String),
                ],
            ))
            .with_table(TableSchema::open("orders"));
        Replica::new(schema, MemoryRepository::new())
    }

    /// Repository whose writes always fail.
    struct BrokenRepository;

    impl EntityRepository for BrokenRepository {
        fn get(&self, _: &str, _: &str, _: &str) -> Result<Option<LocalRecord>> {
            Ok(None)
        }

        fn put(&mut self, _: LocalRecord) -> Result<()> {
            Err(Error::Storage("disk full".into()))
        }

        fn delete(&mut self, _: &str, _: &str, _: &str) -> Result<Option<LocalRecord>> {
            Err(Error::Storage("disk full".into()))
        }

        fn list(&self, _: &str, _: &str) -> Result<Vec<LocalRecord>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn create_marks_pending() {
        let mut replica = replica();
        let enqueued = replica
            .create("t1", "customers", "c1", payload(json!({"name": "Ana"})), 1000)
            .unwrap();

        assert_eq!(enqueued.disposition, Disposition::Appended);
        let record = replica.get("t1", "customers", "c1").unwrap().unwrap();
        assert_eq!(record.sync_status, SyncStatus::Pending);
        assert_eq!(
            replica.state().get_status("t1", "customers", "c1"),
            SyncStatus::Pending
        );
        assert_eq!(replica.change_log().len("t1"), 1);
    }

    #[test]
    fn invalid_payload_is_refused_before_anything_is_written() {
        let mut replica = replica();
        let result = replica.create("t1", "customers", "c1", payload(json!({"phone": "1"})), 1000);
        assert_eq!(result, Err(Error::MissingRequiredField("name".into())));
        assert!(replica.get("t1", "customers", "c1").unwrap().is_none());
        assert!(replica.change_log().is_empty("t1"));
    }

    #[test]
    fn create_twice_fails() {
        let mut replica = replica();
        replica
            .create("t1", "customers", "c1", payload(json!({"name": "Ana"})), 1000)
            .unwrap();
        let again = replica.create("t1", "customers", "c1", payload(json!({"name": "B"})), 1001);
        assert_eq!(again, Err(Error::RecordAlreadyExists("c1".into())));
    }

    #[test]
    fn update_missing_or_deleted_fails() {
        let mut replica = replica();
        assert_eq!(
            replica.update("t1", "orders", "o1", Payload::new(), 1000),
            Err(Error::RecordNotFound("o1".into()))
        );

        replica
            .create("t1", "orders", "o1", payload(json!({"total": 1})), 1000)
            .unwrap();
        replica.delete("t1", "orders", "o1", 1001).unwrap();
        assert_eq!(
            replica.update("t1", "orders", "o1", Payload::new(), 1002),
            Err(Error::RecordNotFound("o1".into()))
        );
    }

    #[test]
    fn update_of_tombstone_fails() {
        let mut replica = replica();
        let mut record = LocalRecord::new("t1", "orders", "o1", Payload::new());
        record.remote_version = Some(RemoteVersion::new(500, 1));
        replica.repository.put(record).unwrap();

        replica.delete("t1", "orders", "o1", 1000).unwrap();
        assert_eq!(
            replica.update("t1", "orders", "o1", payload(json!({"total": 2})), 1001),
            Err(Error::RecordDeleted("o1".into()))
        );
        let tombstone = replica.get("t1", "orders", "o1").unwrap().unwrap();
        assert_eq!(tombstone.deleted_at, Some(1000));
    }

    #[test]
    fn create_then_delete_vanishes() {
        let mut replica = replica();
        replica
            .create("t1", "orders", "o1", payload(json!({"total": 1})), 1000)
            .unwrap();
        let enqueued = replica.delete("t1", "orders", "o1", 1001).unwrap();

        assert_eq!(enqueued.disposition, Disposition::Cancelled);
        assert!(replica.get("t1", "orders", "o1").unwrap().is_none());
        assert!(replica.change_log().is_empty("t1"));
        assert_eq!(replica.summary("t1").pending_count, 0);
    }

    #[test]
    fn delete_of_synced_record_keeps_tombstone() {
        let mut replica = replica();
        let mut record = LocalRecord::new("t1", "orders", "o1", payload(json!({"total": 1})));
        record.remote_version = Some(RemoteVersion::new(500, 3));
        replica.repository.put(record).unwrap();

        replica.delete("t1", "orders", "o1", 1000).unwrap();

        let change = &replica.change_log().list_pending("t1")[0];
        assert_eq!(change.action, ChangeAction::Delete);
        assert_eq!(change.base_version, Some(RemoteVersion::new(500, 3)));
        assert_eq!(
            change.prior,
            Some(PriorState {
                payload: payload(json!({"total": 1})),
                deleted: false
            })
        );
        assert!(replica.list("t1", "orders").unwrap().is_empty());
    }

    #[test]
    fn failed_storage_write_leaves_log_untouched() {
        let schema = Schema::new(1).with_table(TableSchema::open("orders"));
        let mut replica = Replica::new(schema, BrokenRepository);

        let result = replica.create("t1", "orders", "o1", Payload::new(), 1000);
        assert_eq!(result, Err(Error::Storage("disk full".into())));
        assert!(replica.change_log().is_empty("t1"));
        assert_eq!(replica.summary("t1").pending_count, 0);
    }
}
