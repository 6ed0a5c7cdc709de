//! Sync state store - per-record status, pull cursors and conflict
//! bookkeeping.
//!
//! Pure bookkeeping: nothing here touches entity data.

use crate::{
    ConflictCase, Cursor, RecordId, RemoteState, ResolutionRecord, SyncStatus, TableName, TenantId,
    Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Aggregate counts surfaced to the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub pending_count: usize,
    pub conflict_count: usize,
    pub last_sync_at: Option<Timestamp>,
}

/// State kept for a single tenant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TenantState {
    statuses: BTreeMap<TableName, BTreeMap<RecordId, SyncStatus>>,
    cursors: BTreeMap<TableName, Cursor>,
    conflicts: Vec<ConflictCase>,
    resolutions: Vec<ResolutionRecord>,
    last_sync_at: Option<Timestamp>,
    cycle: u64,
}

/// Sync bookkeeping for every tenant on this device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStateStore {
    tenants: BTreeMap<TenantId, TenantState>,
}

impl SyncStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tenant(&self, tenant_id: &str) -> Option<&TenantState> {
        self.tenants.get(tenant_id)
    }

    fn tenant_mut(&mut self, tenant_id: &str) -> &mut TenantState {
        self.tenants.entry(tenant_id.to_string()).or_default()
    }

    pub fn set_status(&mut self, tenant_id: &str, table: &str, record_id: &str, status: SyncStatus) {
        self.tenant_mut(tenant_id)
            .statuses
            .entry(table.to_string())
            .or_default()
            .insert(record_id.to_string(), status);
    }

    /// Status of a record. A record with an open conflict case always
    /// reports `Conflict`; unknown records are `Synced`.
    pub fn get_status(&self, tenant_id: &str, table: &str, record_id: &str) -> SyncStatus {
        if self.conflict(tenant_id, table, record_id).is_some() {
            return SyncStatus::Conflict;
        }
        self.tenant(tenant_id)
            .and_then(|t| t.statuses.get(table))
            .and_then(|records| records.get(record_id))
            .copied()
            .unwrap_or_default()
    }

    /// Forget a record entirely (used when it is purged).
    pub fn clear_status(&mut self, tenant_id: &str, table: &str, record_id: &str) {
        if let Some(records) = self.tenant_mut(tenant_id).statuses.get_mut(table) {
            records.remove(record_id);
        }
    }

    pub fn get_cursor(&self, tenant_id: &str, table: &str) -> Cursor {
        self.tenant(tenant_id)
            .and_then(|t| t.cursors.get(table))
            .copied()
            .unwrap_or_default()
    }

    /// Move a table's cursor forward. Returns false (and changes nothing)
    /// when `marker` is not past the current cursor.
    pub fn advance_cursor(&mut self, tenant_id: &str, table: &str, marker: Cursor) -> bool {
        let cursor = self
            .tenant_mut(tenant_id)
            .cursors
            .entry(table.to_string())
            .or_default();
        if marker <= *cursor {
            return false;
        }
        *cursor = marker;
        true
    }

    pub fn summary(&self, tenant_id: &str) -> SyncSummary {
        let Some(tenant) = self.tenant(tenant_id) else {
            return SyncSummary::default();
        };

        let pending_count = tenant
            .statuses
            .iter()
            .flat_map(|(table, records)| records.iter().map(move |(id, s)| (table, id, s)))
            .filter(|(table, id, status)| {
                **status == SyncStatus::Pending
                    && !tenant
                        .conflicts
                        .iter()
                        .any(|c| &c.table == *table && &c.record_id == *id)
            })
            .count();

        SyncSummary {
            pending_count,
            conflict_count: tenant.conflicts.len(),
            last_sync_at: tenant.last_sync_at,
        }
    }

    pub fn mark_synced_at(&mut self, tenant_id: &str, now: Timestamp) {
        self.tenant_mut(tenant_id).last_sync_at = Some(now);
    }

    /// Start a new sync cycle. Resolution records older than the previous
    /// cycle are dropped, so each one survives at least one full cycle.
    pub fn begin_cycle(&mut self, tenant_id: &str) -> u64 {
        let tenant = self.tenant_mut(tenant_id);
        tenant.cycle += 1;
        let keep_from = tenant.cycle.saturating_sub(1);
        tenant.resolutions.retain(|r| r.cycle >= keep_from);
        tenant.cycle
    }

    pub fn current_cycle(&self, tenant_id: &str) -> u64 {
        self.tenant(tenant_id).map(|t| t.cycle).unwrap_or_default()
    }

    /// Open a conflict case, replacing any earlier case for the record.
    pub fn open_conflict(&mut self, case: ConflictCase) {
        let tenant = self.tenant_mut(&case.tenant_id);
        tenant
            .conflicts
            .retain(|c| !(c.table == case.table && c.record_id == case.record_id));
        tenant.conflicts.push(case);
    }

    pub fn conflicts(&self, tenant_id: &str) -> &[ConflictCase] {
        self.tenant(tenant_id)
            .map(|t| t.conflicts.as_slice())
            .unwrap_or_default()
    }

    pub fn conflict(&self, tenant_id: &str, table: &str, record_id: &str) -> Option<&ConflictCase> {
        self.conflicts(tenant_id)
            .iter()
            .find(|c| c.table == table && c.record_id == record_id)
    }

    /// Remove and return the open case for a record.
    pub fn take_conflict(
        &mut self,
        tenant_id: &str,
        table: &str,
        record_id: &str,
    ) -> Option<ConflictCase> {
        let tenant = self.tenants.get_mut(tenant_id)?;
        let index = tenant
            .conflicts
            .iter()
            .position(|c| c.table == table && c.record_id == record_id)?;
        Some(tenant.conflicts.remove(index))
    }

    /// Keep an open case's server side current when newer server state
    /// arrives while the user has not decided yet.
    pub fn refresh_conflict_remote(
        &mut self,
        tenant_id: &str,
        table: &str,
        record_id: &str,
        remote: &RemoteState,
    ) -> bool {
        let Some(tenant) = self.tenants.get_mut(tenant_id) else {
            return false;
        };
        let Some(case) = tenant
            .conflicts
            .iter_mut()
            .find(|c| c.table == table && c.record_id == record_id)
        else {
            return false;
        };
        case.remote_payload = remote.payload.clone();
        case.remote_deleted = remote.deleted;
        case.remote_version = Some(remote.version);
        true
    }

    pub fn record_resolution(&mut self, mut resolution: ResolutionRecord) {
        let tenant = self.tenant_mut(&resolution.tenant_id);
        resolution.cycle = tenant.cycle;
        tenant.resolutions.push(resolution);
    }

    /// Automatic resolutions still retained for audit.
    pub fn resolutions(&self, tenant_id: &str) -> &[ResolutionRecord] {
        self.tenant(tenant_id)
            .map(|t| t.resolutions.as_slice())
            .unwrap_or_default()
    }

    /// Tables this tenant has a cursor for.
    pub fn tracked_tables(&self, tenant_id: &str) -> Vec<TableName> {
        self.tenant(tenant_id)
            .map(|t| t.cursors.keys().cloned().collect())
            .unwrap_or_default()
    }
}
