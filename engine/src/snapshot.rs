//! Snapshot types for persisting and restoring replica state.
//!
//! A snapshot holds the entity records, the change log and the sync state
//! together, so one atomic write of it persists a record, its queued change
//! and the cursor as a unit. Every map inside is a `BTreeMap`, which keeps
//! the serialized form deterministic.

use crate::{
    error::Result, ChangeLog, Error, MemoryRepository, Replica, Schema, SchemaVersion,
    SyncStateStore,
};
use serde::{Deserialize, Serialize};

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time snapshot of a replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Schema version at time of snapshot
    pub schema_version: SchemaVersion,
    /// All records, tombstones included
    pub records: MemoryRepository,
    /// Changes not yet acknowledged by the server
    pub change_log: ChangeLog,
    /// Statuses, cursors, conflicts and resolution audit
    pub state: SyncStateStore,
}

impl ReplicaSnapshot {
    /// Create a new empty snapshot.
    pub fn new(schema_version: SchemaVersion) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            schema_version,
            records: MemoryRepository::new(),
            change_log: ChangeLog::new(),
            state: SyncStateStore::new(),
        }
    }

    /// Validate the snapshot against a schema.
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        if self.schema_version != schema.version {
            return Err(Error::SnapshotVersionMismatch {
                expected: schema.version,
                actual: self.schema_version,
            });
        }

        if let Some(unknown) = self
            .records
            .table_names()
            .find(|table| schema.get_table(table).is_none())
        {
            return Err(Error::TableNotFound(unknown.clone()));
        }

        Ok(())
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}

impl Replica<MemoryRepository> {
    /// Capture the full replica state.
    pub fn export_state(&self) -> ReplicaSnapshot {
        ReplicaSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            schema_version: self.schema.version,
            records: self.repository.clone(),
            change_log: self.change_log.clone(),
            state: self.state.clone(),
        }
    }

    /// Replace the replica state with a snapshot. The snapshot is checked
    /// against the schema first; on error nothing changes.
    pub fn import_state(&mut self, snapshot: ReplicaSnapshot) -> Result<()> {
        snapshot.validate(&self.schema)?;
        self.repository = snapshot.records;
        self.change_log = snapshot.change_log;
        self.state = snapshot.state;
        Ok(())
    }

    /// Build a replica from a persisted snapshot.
    pub fn from_snapshot(schema: Schema, snapshot: ReplicaSnapshot) -> Result<Self> {
        let mut replica = Self::new(schema, MemoryRepository::new());
        replica.import_state(snapshot)?;
        Ok(replica)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        FieldDef, FieldType, PushResponse, PushResult, RemoteVersion, SyncStatus, TableSchema,
    };
    use serde_json::json;

    fn schema() -> Schema {
        Schema::new(1).with_table(TableSchema::new(
            "customers",
            vec![FieldDef::required("name", FieldType::String)],
        ))
    }

    fn seeded() -> Replica {
        let mut replica = Replica::new(schema(), MemoryRepository::new());
        for (i, id) in ["c1", "c2"].iter().enumerate() {
            replica
                .create(
                    "t1",
                    "customers",
                    id,
                    json!({"name": id}).as_object().cloned().unwrap(),
                    1000 + i as u64,
                )
                .unwrap();
        }
        replica
    }

    #[test]
    fn empty_snapshot() {
        let snapshot = ReplicaSnapshot::new(1);
        assert_eq!(snapshot.format_version, SNAPSHOT_FORMAT_VERSION);
        assert_eq!(snapshot.records.record_count(), 0);
        assert!(snapshot.validate(&schema()).is_ok());
    }

    #[test]
    fn restore_keeps_queue_cursor_and_status() {
        let mut replica = seeded();
        let batch = replica.prepare_push("t1", 1).unwrap();
        replica
            .apply_push_response(
                &batch,
                &PushResponse {
                    results: vec![PushResult::applied(
                        batch.changes[0].id.clone(),
                        RemoteVersion::new(1000, 1),
                    )],
                },
                8,
                1100,
            )
            .unwrap();
        replica.state.advance_cursor("t1", "customers", 1);

        let json = replica.export_state().to_json().unwrap();
        let restored =
            Replica::from_snapshot(schema(), ReplicaSnapshot::from_json(&json).unwrap()).unwrap();

        assert_eq!(restored.change_log(), replica.change_log());
        assert_eq!(restored.change_log().list_pending("t1")[0].record_id, "c2");
        assert_eq!(restored.state().get_cursor("t1", "customers"), 1);
        assert_eq!(
            restored.state().get_status("t1", "customers", "c1"),
            SyncStatus::Synced
        );
        assert_eq!(restored.summary("t1"), replica.summary("t1"));
    }

    #[test]
    fn deterministic_serialization() {
        let a = seeded().export_state();
        let mut b = a.clone();
        // Round-tripping must not reorder anything.
        b = ReplicaSnapshot::from_json(&b.to_json().unwrap()).unwrap();
        assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
    }

    #[test]
    fn schema_version_mismatch() {
        let snapshot = ReplicaSnapshot::new(99);
        assert!(matches!(
            snapshot.validate(&schema()),
            Err(Error::SnapshotVersionMismatch { .. })
        ));
    }

    #[test]
    fn unknown_table_rejected_and_state_untouched() {
        let mut other = Replica::new(
            Schema::new(1).with_table(TableSchema::open("invoices")),
            MemoryRepository::new(),
        );
        other
            .create("t1", "invoices", "i1", serde_json::Map::new(), 1)
            .unwrap();

        let mut replica = seeded();
        let before = replica.export_state();
        let result = replica.import_state(other.export_state());
        assert_eq!(result, Err(Error::TableNotFound("invoices".into())));
        assert_eq!(replica.export_state(), before);
    }

    #[test]
    fn reject_future_format_version() {
        let json = r#"{
            "formatVersion": 999,
            "schemaVersion": 1,
            "records": {"tenants": {}},
            "changeLog": {"queues": {}},
            "state": {"tenants": {}}
        }"#;
        assert!(matches!(
            ReplicaSnapshot::from_json(json),
            Err(Error::InvalidSnapshot(_))
        ));
    }
}
