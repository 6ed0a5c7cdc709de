//! Local record types and the sync fields the engine owns on them.

use crate::{Payload, RecordId, TableName, TenantId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sync status of a local record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Local state matches the last known server state
    #[default]
    Synced,
    /// A local change is waiting to be pushed
    Pending,
    /// Needs a user decision before it can sync again
    Conflict,
}

/// A server-assigned record version.
///
/// `seq` is the server's monotonically increasing change sequence and orders
/// versions of the same record. `updated_at` is the edit timestamp of the
/// change that produced the version and is what last-writer-wins compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteVersion {
    pub updated_at: Timestamp,
    pub seq: u64,
}

impl RemoteVersion {
    pub fn new(updated_at: Timestamp, seq: u64) -> Self {
        Self { updated_at, seq }
    }

    /// Whether this version supersedes `other`.
    pub fn is_newer_than(&self, other: &RemoteVersion) -> bool {
        self.seq > other.seq
    }
}

impl fmt::Display for RemoteVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.seq, self.updated_at)
    }
}

/// Fully qualified identity of a record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordKey {
    pub tenant_id: TenantId,
    pub table: TableName,
    pub record_id: RecordId,
}

impl RecordKey {
    pub fn new(
        tenant_id: impl Into<TenantId>,
        table: impl Into<TableName>,
        record_id: impl Into<RecordId>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            table: table.into(),
            record_id: record_id.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.tenant_id, self.table, self.record_id)
    }
}

/// A business entity as stored on the device.
///
/// The payload is opaque to the engine. `sync_status`, `remote_version` and
/// `deleted_at` are written only by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalRecord {
    pub tenant_id: TenantId,
    pub table: TableName,
    pub id: RecordId,
    pub payload: Payload,
    pub sync_status: SyncStatus,
    /// Last server version this device has seen for the record
    pub remote_version: Option<RemoteVersion>,
    /// Tombstone marker, `None` while the record is live
    pub deleted_at: Option<Timestamp>,
}

impl LocalRecord {
    /// Create a live record with no server history.
    pub fn new(
        tenant_id: impl Into<TenantId>,
        table: impl Into<TableName>,
        id: impl Into<RecordId>,
        payload: Payload,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            table: table.into(),
            id: id.into(),
            payload,
            sync_status: SyncStatus::Synced,
            remote_version: None,
            deleted_at: None,
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(&self.tenant_id, &self.table, &self.id)
    }

    /// Check if record is active (not tombstoned).
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// Merge `patch` into the payload; fields in `patch` win.
    pub fn merge_payload(&mut self, patch: &Payload) {
        for (field, value) in patch {
            self.payload.insert(field.clone(), value.clone());
        }
    }

    /// Whether the server has ever acknowledged this record.
    pub fn known_remotely(&self) -> bool {
        self.remote_version.is_some()
    }

    /// Whether `version` is already reflected locally.
    pub fn has_seen(&self, version: &RemoteVersion) -> bool {
        self.remote_version
            .map(|seen| seen.seq >= version.seq)
            .unwrap_or(false)
    }

    /// Record `version` as seen, never moving backwards.
    pub fn observe_version(&mut self, version: RemoteVersion) {
        match self.remote_version {
            Some(seen) if !version.is_newer_than(&seen) => {}
            _ => self.remote_version = Some(version),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn new_record_is_live_and_unknown_remotely() {
        let record = LocalRecord::new("t1", "customers", "c1", payload(json!({"name": "Ana"})));
        assert!(record.is_active());
        assert!(!record.known_remotely());
        assert_eq!(record.sync_status, SyncStatus::Synced);
        assert_eq!(record.key(), RecordKey::new("t1", "customers", "c1"));
    }

    #[test]
    fn merge_payload_overwrites_fields() {
        let mut record = LocalRecord::new(
            "t1",
            "menu_items",
            "m1",
            payload(json!({"name": "Soup", "price": 4.5})),
        );
        record.merge_payload(&payload(json!({"price": 5.0, "vegan": true})));
        assert_eq!(
            serde_json::Value::Object(record.payload),
            json!({"name": "Soup", "price": 5.0, "vegan": true})
        );
    }

    #[test]
    fn observe_version_is_monotonic() {
        let mut record = LocalRecord::new("t1", "orders", "o1", Payload::new());
        record.observe_version(RemoteVersion::new(2000, 5));
        record.observe_version(RemoteVersion::new(3000, 3));
        assert_eq!(record.remote_version, Some(RemoteVersion::new(2000, 5)));

        assert!(record.has_seen(&RemoteVersion::new(9999, 5)));
        assert!(!record.has_seen(&RemoteVersion::new(1000, 6)));
    }

    #[test]
    fn version_ordering_uses_seq() {
        let older = RemoteVersion::new(5000, 1);
        let newer = RemoteVersion::new(1000, 2);
        assert!(newer.is_newer_than(&older));
        assert_eq!(newer.to_string(), "2@1000");
    }

    #[test]
    fn serialization_format() {
        let mut record = LocalRecord::new("t1", "orders", "o1", Payload::new());
        record.deleted_at = Some(10);
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"syncStatus\":\"synced\""));
        assert!(json.contains("\"deletedAt\":10"));
        assert!(json.contains("\"tenantId\""));
    }
}
