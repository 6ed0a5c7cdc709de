//! Change records: the unit of work queued for push.
//!
//! Edits are not sent as they happen. Each one is folded into the single
//! pending [`ChangeRecord`] for its record, which is what eventually reaches
//! the server.

use crate::{
    ChangeId, Payload, RecordId, RecordKey, RemoteVersion, TableName, TenantId, Timestamp,
};
use serde::{Deserialize, Serialize};

/// Kind of mutation a change carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeAction::Create => write!(f, "create"),
            ChangeAction::Update => write!(f, "update"),
            ChangeAction::Delete => write!(f, "delete"),
        }
    }
}

/// Record state captured when a change was first queued.
///
/// This is the last state the server agreed with, used to roll the record
/// back if the change is abandoned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorState {
    pub payload: Payload,
    pub deleted: bool,
}

/// One pending local mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    /// Client-generated id, also the idempotency key on the server
    pub id: ChangeId,
    pub tenant_id: TenantId,
    pub table: TableName,
    pub record_id: RecordId,
    pub action: ChangeAction,
    /// Changed fields; empty for deletes
    pub payload: Payload,
    /// Server version the edit was made against
    pub base_version: Option<RemoteVersion>,
    /// When the first edit was queued (queue order)
    pub enqueued_at: Timestamp,
    /// When the latest coalesced edit was made (conflict order)
    pub edited_at: Timestamp,
    /// Failed transport attempts
    pub attempts: u32,
    /// Bumped on every coalesce
    pub revision: u32,
    /// State before the first edit, `None` if the record did not exist
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior: Option<PriorState>,
}

/// What coalescing did to a pending change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Coalesced {
    /// The change absorbed the edit and stays queued
    Merged,
    /// The edits cancel out and the change should be dropped
    Cancelled,
}

impl ChangeRecord {
    /// Create a new change with a fresh id.
    pub fn new(
        tenant_id: impl Into<TenantId>,
        table: impl Into<TableName>,
        record_id: impl Into<RecordId>,
        action: ChangeAction,
        payload: Payload,
        base_version: Option<RemoteVersion>,
        now: Timestamp,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            table: table.into(),
            record_id: record_id.into(),
            action,
            payload: if action == ChangeAction::Delete {
                Payload::new()
            } else {
                payload
            },
            base_version,
            enqueued_at: now,
            edited_at: now,
            attempts: 0,
            revision: 0,
            prior: None,
        }
    }

    /// Attach the pre-edit record state.
    pub fn with_prior(mut self, prior: Option<PriorState>) -> Self {
        self.prior = prior;
        self
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(&self.tenant_id, &self.table, &self.record_id)
    }

    pub fn targets(&self, table: &str, record_id: &str) -> bool {
        self.table == table && self.record_id == record_id
    }

    /// Fold a newer edit of the same record into this change.
    ///
    /// - `Update` merges field by field and keeps the stronger action
    ///   (`Create` stays `Create`).
    /// - `Delete` always wins and discards the payload, unless the record
    ///   was never seen by the server, in which case both cancel out.
    /// - `Create` or `Update` after a `Delete` re-creates the record and
    ///   becomes an `Update` carrying the new payload in full.
    pub(crate) fn coalesce(
        &mut self,
        action: ChangeAction,
        payload: Payload,
        now: Timestamp,
    ) -> Coalesced {
        match (self.action, action) {
            (ChangeAction::Create, ChangeAction::Delete) if self.base_version.is_none() => {
                return Coalesced::Cancelled;
            }
            (_, ChangeAction::Delete) => {
                self.action = ChangeAction::Delete;
                self.payload.clear();
            }
            (ChangeAction::Delete, _) => {
                self.action = if self.base_version.is_some() {
                    ChangeAction::Update
                } else {
                    ChangeAction::Create
                };
                self.payload = payload;
            }
            (_, _) => {
                for (field, value) in payload {
                    self.payload.insert(field, value);
                }
            }
        }

        self.edited_at = self.edited_at.max(now);
        self.revision += 1;
        Coalesced::Merged
    }

    /// Re-target the change at a newer server version.
    ///
    /// Used once the server has acknowledged or superseded the version the
    /// change was based on. A `Create` the server now knows about becomes an
    /// `Update`. The change gets a fresh id: the server has already recorded
    /// an outcome under the old one.
    pub(crate) fn rebase(&mut self, version: RemoteVersion) {
        self.id = uuid::Uuid::new_v4().to_string();
        self.base_version = Some(version);
        if self.action == ChangeAction::Create {
            self.action = ChangeAction::Update;
        }
        self.attempts = 0;
    }
}
