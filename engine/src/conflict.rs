//! Conflict detection and resolution.
//!
//! A conflict exists when a local change is still pending for a record and a
//! newer server version of the same record shows up, either as a `stale`
//! push result or in a pull page. The policy, in order:
//!
//! 1. **Tombstone priority**: a delete wins over an edit when its timestamp
//!    is greater than or equal to the edit's.
//! 2. **Last writer wins**: otherwise the strictly later edit wins.
//! 3. **Tie**: equal timestamps with diverging payloads cannot be decided
//!    automatically and open a [`ConflictCase`].
//!
//! Changes the server rejects and changes that exhaust their delivery
//! attempts also end up as cases, so nothing is ever dropped silently.

use crate::{
    change_log::Disposition, error::Result, tombstone::TombstoneManager, ChangeAction, ChangeId,
    ChangeRecord, EntityRepository, Error, LocalRecord, Payload, PriorState, RecordId,
    RemoteVersion, Replica, SyncStatus, TableName, TenantId, Timestamp,
};
use serde::{Deserialize, Serialize};

/// Why a record needs a user decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ConflictReason {
    /// Both sides edited at the same instant with different payloads
    Tie,
    /// The server refused the change
    Rejected { reason: String },
    /// Delivery kept failing until the attempt budget ran out
    SyncTimeout,
}

impl std::fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictReason::Tie => write!(f, "tie"),
            ConflictReason::Rejected { reason } => write!(f, "rejected: {}", reason),
            ConflictReason::SyncTimeout => write!(f, "sync timeout"),
        }
    }
}

/// A conflict waiting for the user.
///
/// Holds both sides so either can be restored later. The local change that
/// caused it has left the change log; resolving the case may queue a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictCase {
    pub tenant_id: TenantId,
    pub table: TableName,
    pub record_id: RecordId,
    pub reason: ConflictReason,
    pub local_action: ChangeAction,
    /// Fields of the local change (empty for deletes)
    pub local_payload: Payload,
    pub local_base: Option<RemoteVersion>,
    /// Server-side record state, `None` if the server never had the record
    pub remote_payload: Option<Payload>,
    pub remote_deleted: bool,
    pub remote_version: Option<RemoteVersion>,
    pub detected_at: Timestamp,
}

/// Which side an automatic resolution kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Winner {
    Local,
    Remote,
}

/// Audit entry for a conflict resolved without user input.
///
/// Both payloads are retained for at least one full sync cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionRecord {
    pub tenant_id: TenantId,
    pub table: TableName,
    pub record_id: RecordId,
    pub winner: Winner,
    pub local_payload: Payload,
    pub remote_payload: Option<Payload>,
    pub remote_deleted: bool,
    pub resolved_at: Timestamp,
    /// Sync cycle the resolution happened in
    pub cycle: u64,
}

/// A user decision for an open [`ConflictCase`].
///
/// Serialized as `"keepLocal"`, `"keepRemote"` or `{"payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Resolution {
    KeepLocal,
    KeepRemote,
    /// A merged payload that replaces the record
    Payload(Payload),
}

/// Result of [`Replica::resolve`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveOutcome {
    /// The case that was closed
    pub case: ConflictCase,
    /// Change queued to carry the decision to the server, if any
    pub change_id: Option<ChangeId>,
}

/// The server's view of a record.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteState {
    pub version: RemoteVersion,
    /// Full record payload; `None` when unknown or deleted
    pub payload: Option<Payload>,
    pub deleted: bool,
}

impl RemoteState {
    pub fn live(version: RemoteVersion, payload: Payload) -> Self {
        Self {
            version,
            payload: Some(payload),
            deleted: false,
        }
    }

    pub fn deleted(version: RemoteVersion) -> Self {
        Self {
            version,
            payload: None,
            deleted: true,
        }
    }
}

/// Outcome of comparing a pending local change with a newer remote version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Verdict {
    LocalWins,
    RemoteWins,
    Tie,
}

/// The automatic conflict policy.
pub struct ConflictResolver;

impl ConflictResolver {
    /// Decide between a pending local change and a newer remote state.
    pub fn decide(local: &ChangeRecord, remote: &RemoteState) -> Verdict {
        let local_ts = local.edited_at;
        let remote_ts = remote.version.updated_at;
        let local_deleted = local.action == ChangeAction::Delete;

        match (local_deleted, remote.deleted) {
            // Both sides want the record gone; adopt the server's tombstone.
            (true, true) => Verdict::RemoteWins,
            (true, false) if local_ts >= remote_ts => Verdict::LocalWins,
            (true, false) => Verdict::RemoteWins,
            (false, true) if remote_ts >= local_ts => Verdict::RemoteWins,
            (false, true) => Verdict::LocalWins,
            (false, false) if local_ts > remote_ts => Verdict::LocalWins,
            (false, false) if local_ts < remote_ts => Verdict::RemoteWins,
            (false, false) => {
                if Self::already_applied(&local.payload, remote.payload.as_ref()) {
                    Verdict::RemoteWins
                } else {
                    Verdict::Tie
                }
            }
        }
    }

    /// Whether every field of the local patch already has the same value on
    /// the server.
    fn already_applied(local: &Payload, remote: Option<&Payload>) -> bool {
        match remote {
            Some(remote) => local.iter().all(|(k, v)| remote.get(k) == Some(v)),
            None => false,
        }
    }
}

impl<R: EntityRepository> Replica<R> {
    /// Settle a pending change against a newer remote state and apply the
    /// verdict. Returns the verdict plus the audit entry for automatic
    /// resolutions.
    pub(crate) fn settle(
        &mut self,
        change: &ChangeRecord,
        remote: &RemoteState,
        now: Timestamp,
    ) -> Result<(Verdict, Option<ResolutionRecord>)> {
        let tenant_id = change.tenant_id.as_str();
        let mut record = self
            .repository
            .get(tenant_id, &change.table, &change.record_id)?
            .unwrap_or_else(|| {
                LocalRecord::new(tenant_id, &change.table, &change.record_id, Payload::new())
            });

        let verdict = ConflictResolver::decide(change, remote);
        let resolution = match verdict {
            Verdict::RemoteWins => {
                TombstoneManager::apply_remote(&mut record, remote);
                self.commit(record, SyncStatus::Synced)?;
                self.change_log.dequeue(tenant_id, &change.id);
                Some(self.audit(change, remote, Winner::Remote, now))
            }
            Verdict::LocalWins => {
                record.observe_version(remote.version);
                // The server merges the pending patch into its own copy, so
                // hold the same fields locally.
                if let (false, Some(remote_payload)) = (remote.deleted, remote.payload.as_ref()) {
                    if change.action != ChangeAction::Delete {
                        record.payload = remote_payload.clone();
                        record.merge_payload(&change.payload);
                    }
                }
                // The server dropped the record; resend it whole so the
                // update can re-create it.
                let resurrect = remote.deleted && change.action != ChangeAction::Delete;
                let full_payload = record.payload.clone();
                self.commit(record, SyncStatus::Pending)?;
                if resurrect {
                    self.change_log.replace_payload(
                        tenant_id,
                        &change.id,
                        ChangeAction::Update,
                        full_payload,
                    );
                }
                self.change_log.rebase(tenant_id, &change.id, remote.version);
                Some(self.audit(change, remote, Winner::Local, now))
            }
            Verdict::Tie => {
                TombstoneManager::apply_remote(&mut record, remote);
                self.commit(record, SyncStatus::Conflict)?;
                self.change_log.dequeue(tenant_id, &change.id);
                self.state.open_conflict(ConflictCase {
                    tenant_id: change.tenant_id.clone(),
                    table: change.table.clone(),
                    record_id: change.record_id.clone(),
                    reason: ConflictReason::Tie,
                    local_action: change.action,
                    local_payload: change.payload.clone(),
                    local_base: change.base_version,
                    remote_payload: remote.payload.clone(),
                    remote_deleted: remote.deleted,
                    remote_version: Some(remote.version),
                    detected_at: now,
                });
                None
            }
        };

        Ok((verdict, resolution))
    }

    fn audit(
        &mut self,
        change: &ChangeRecord,
        remote: &RemoteState,
        winner: Winner,
        now: Timestamp,
    ) -> ResolutionRecord {
        let entry = ResolutionRecord {
            tenant_id: change.tenant_id.clone(),
            table: change.table.clone(),
            record_id: change.record_id.clone(),
            winner,
            local_payload: change.payload.clone(),
            remote_payload: remote.payload.clone(),
            remote_deleted: remote.deleted,
            resolved_at: now,
            cycle: 0,
        };
        self.state.record_resolution(entry.clone());
        let cycle = self.state.current_cycle(&change.tenant_id);
        ResolutionRecord { cycle, ..entry }
    }

    /// Park a change the server will never accept as it stands.
    ///
    /// The local record is left untouched so the user can see what they
    /// wrote; the case remembers the last state the server agreed with.
    pub(crate) fn park(
        &mut self,
        change: &ChangeRecord,
        reason: ConflictReason,
        now: Timestamp,
    ) -> Result<()> {
        let tenant_id = change.tenant_id.as_str();
        let record = self
            .repository
            .get(tenant_id, &change.table, &change.record_id)?
            .unwrap_or_else(|| {
                LocalRecord::new(tenant_id, &change.table, &change.record_id, Payload::new())
            });

        self.commit(record, SyncStatus::Conflict)?;
        self.change_log.dequeue(tenant_id, &change.id);
        self.state.open_conflict(ConflictCase {
            tenant_id: change.tenant_id.clone(),
            table: change.table.clone(),
            record_id: change.record_id.clone(),
            reason,
            local_action: change.action,
            local_payload: change.payload.clone(),
            local_base: change.base_version,
            remote_payload: change.prior.as_ref().map(|p| p.payload.clone()),
            remote_deleted: change.prior.as_ref().map(|p| p.deleted).unwrap_or(false),
            remote_version: change.base_version,
            detected_at: now,
        });
        Ok(())
    }

    /// Apply a user decision to an open conflict case.
    ///
    /// `table` may be omitted when the record id is unique among the
    /// tenant's open cases.
    pub fn resolve(
        &mut self,
        tenant_id: &str,
        table: Option<&str>,
        record_id: &str,
        resolution: Resolution,
        now: Timestamp,
    ) -> Result<ResolveOutcome> {
        let table = match table {
            Some(table) => table.to_string(),
            None => self.locate_conflict(tenant_id, record_id)?,
        };

        let case = self
            .state
            .take_conflict(tenant_id, &table, record_id)
            .ok_or_else(|| Error::ConflictNotFound(record_id.to_string()))?;

        match self.apply_resolution(&case, resolution, now) {
            Ok(change_id) => Ok(ResolveOutcome { case, change_id }),
            Err(e) => {
                self.state.open_conflict(case);
                Err(e)
            }
        }
    }

    fn locate_conflict(&self, tenant_id: &str, record_id: &str) -> Result<TableName> {
        let mut tables = self
            .state
            .conflicts(tenant_id)
            .iter()
            .filter(|c| c.record_id == record_id)
            .map(|c| c.table.clone());

        match (tables.next(), tables.next()) {
            (Some(table), None) => Ok(table),
            (Some(_), Some(_)) => Err(Error::AmbiguousConflict(record_id.to_string())),
            (None, _) => Err(Error::ConflictNotFound(record_id.to_string())),
        }
    }

    fn apply_resolution(
        &mut self,
        case: &ConflictCase,
        resolution: Resolution,
        now: Timestamp,
    ) -> Result<Option<ChangeId>> {
        let tenant_id = case.tenant_id.as_str();
        let mut record = self
            .repository
            .get(tenant_id, &case.table, &case.record_id)?
            .unwrap_or_else(|| {
                LocalRecord::new(tenant_id, &case.table, &case.record_id, Payload::new())
            });

        match resolution {
            Resolution::KeepLocal => {
                let (action, payload) = match case.local_action {
                    ChangeAction::Delete => {
                        TombstoneManager::bury(&mut record, now);
                        (ChangeAction::Delete, Payload::new())
                    }
                    ChangeAction::Create | ChangeAction::Update if !record.known_remotely() => {
                        record.merge_payload(&case.local_payload);
                        record.deleted_at = None;
                        (ChangeAction::Create, record.payload.clone())
                    }
                    ChangeAction::Create => {
                        record.payload = case.local_payload.clone();
                        record.deleted_at = None;
                        (ChangeAction::Update, record.payload.clone())
                    }
                    ChangeAction::Update if !record.is_active() => {
                        record.merge_payload(&case.local_payload);
                        record.deleted_at = None;
                        (ChangeAction::Update, record.payload.clone())
                    }
                    ChangeAction::Update => {
                        record.merge_payload(&case.local_payload);
                        (ChangeAction::Update, case.local_payload.clone())
                    }
                };
                self.requeue(case, record, action, payload, now)
            }
            Resolution::KeepRemote => {
                if case.remote_deleted {
                    let at = case.remote_version.map(|v| v.updated_at).unwrap_or(now);
                    TombstoneManager::bury(&mut record, at);
                } else if let Some(payload) = &case.remote_payload {
                    record.payload = payload.clone();
                    record.deleted_at = None;
                } else if !record.known_remotely() {
                    // The server never had this record.
                    self.repository
                        .delete(tenant_id, &case.table, &case.record_id)?;
                    self.state
                        .clear_status(tenant_id, &case.table, &case.record_id);
                    return Ok(None);
                }
                if let Some(version) = case.remote_version {
                    record.observe_version(version);
                }

                let status = if self
                    .change_log
                    .pending_for(tenant_id, &case.table, &case.record_id)
                    .is_some()
                {
                    SyncStatus::Pending
                } else {
                    SyncStatus::Synced
                };
                self.commit(record, status)?;
                Ok(None)
            }
            Resolution::Payload(merged) => {
                let action = if record.known_remotely() {
                    ChangeAction::Update
                } else {
                    ChangeAction::Create
                };
                self.schema.validate_change(&case.table, action, &merged)?;
                record.payload = merged.clone();
                record.deleted_at = None;
                self.requeue(case, record, action, merged, now)
            }
        }
    }

    /// Write a resolved record and queue the change that carries it.
    fn requeue(
        &mut self,
        case: &ConflictCase,
        record: LocalRecord,
        action: ChangeAction,
        payload: Payload,
        now: Timestamp,
    ) -> Result<Option<ChangeId>> {
        let base = record.remote_version;
        let prior = case.remote_payload.clone().map(|payload| PriorState {
            payload,
            deleted: case.remote_deleted,
        });

        self.commit(record, SyncStatus::Pending)?;
        let enqueued = self.change_log.enqueue(
            &case.tenant_id,
            &case.table,
            &case.record_id,
            action,
            payload,
            base,
            prior,
            now,
        );

        match enqueued.disposition {
            Disposition::Appended => Ok(Some(enqueued.change_id)),
            Disposition::Coalesced => match base {
                Some(version) => Ok(self
                    .change_log
                    .rebase(&case.tenant_id, &enqueued.change_id, version)),
                None => Ok(Some(enqueued.change_id)),
            },
            Disposition::Cancelled => {
                self.repository
                    .delete(&case.tenant_id, &case.table, &case.record_id)?;
                self.state
                    .clear_status(&case.tenant_id, &case.table, &case.record_id);
                Ok(None)
            }
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

    fn local(action: ChangeAction, value: serde_json::Value, edited_at: Timestamp) -> ChangeRecord {
        let mut change = ChangeRecord::new(
            "t1",
            "menu_items",
            "m1",
            action,
            payload(value),
            Some(RemoteVersion::new(100, 1)),
            edited_at,
        );
        change.edited_at = edited_at;
        change
    }

    fn remote(value: serde_json::Value, updated_at: Timestamp) -> RemoteState {
        RemoteState::live(RemoteVersion::new(updated_at, 2), payload(value))
    }

    #[test]
    fn later_edit_wins() {
        let change = local(ChangeAction::Update, json!({"price": 5}), 2000);
        assert_eq!(
            ConflictResolver::decide(&change, &remote(json!({"price": 6}), 1000)),
            Verdict::LocalWins
        );
        assert_eq!(
            ConflictResolver::decide(&change, &remote(json!({"price": 6}), 3000)),
            Verdict::RemoteWins
        );
    }

    #[test]
    fn equal_timestamps_with_different_payloads_tie() {
        let change = local(ChangeAction::Update, json!({"price": 5}), 2000);
        assert_eq!(
            ConflictResolver::decide(&change, &remote(json!({"price": 6}), 2000)),
            Verdict::Tie
        );
    }

    #[test]
    fn equal_timestamps_with_matching_payload_settle_remote() {
        let change = local(ChangeAction::Update, json!({"price": 5}), 2000);
        assert_eq!(
            ConflictResolver::decide(&change, &remote(json!({"name": "Tea", "price": 5}), 2000)),
            Verdict::RemoteWins
        );
    }

    #[test]
    fn delete_wins_ties_against_edits() {
        let delete = local(ChangeAction::Delete, json!({}), 2000);
        assert_eq!(
            ConflictResolver::decide(&delete, &remote(json!({"price": 6}), 2000)),
            Verdict::LocalWins
        );
        assert_eq!(
            ConflictResolver::decide(&delete, &remote(json!({"price": 6}), 2001)),
            Verdict::RemoteWins
        );

        let edit = local(ChangeAction::Update, json!({"price": 5}), 2000);
        let tombstone = RemoteState::deleted(RemoteVersion::new(2000, 2));
        assert_eq!(ConflictResolver::decide(&edit, &tombstone), Verdict::RemoteWins);

        let later_edit = local(ChangeAction::Update, json!({"price": 5}), 2500);
        assert_eq!(
            ConflictResolver::decide(&later_edit, &tombstone),
            Verdict::LocalWins
        );
    }

    #[test]
    fn double_delete_adopts_remote() {
        let delete = local(ChangeAction::Delete, json!({}), 5000);
        let tombstone = RemoteState::deleted(RemoteVersion::new(1000, 2));
        assert_eq!(ConflictResolver::decide(&delete, &tombstone), Verdict::RemoteWins);
    }

    #[test]
    fn resolution_wire_format() {
        let keep: Resolution = serde_json::from_str("\"keepLocal\"").unwrap();
        assert_eq!(keep, Resolution::KeepLocal);
        let remote: Resolution = serde_json::from_str("\"keepRemote\"").unwrap();
        assert_eq!(remote, Resolution::KeepRemote);
        let merged: Resolution = serde_json::from_str(r#"{"payload": {"price": 7}}"#).unwrap();
        assert_eq!(merged, Resolution::Payload(payload(json!({"price": 7}))));
    }

    #[test]
    fn reason_wire_format() {
        let json = serde_json::to_value(ConflictReason::Rejected {
            reason: "price must be positive".into(),
        })
        .unwrap();
        assert_eq!(
            json,
            json!({"kind": "rejected", "reason": "price must be positive"})
        );
        assert_eq!(
            serde_json::to_value(ConflictReason::SyncTimeout).unwrap(),
            json!({"kind": "sync-timeout"})
        );
    }
}
