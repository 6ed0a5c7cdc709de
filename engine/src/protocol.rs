//! Wire types of the push/pull protocol.
//!
//! Shared by the device agent and the server so both ends agree on the JSON
//! shape. All field names are camelCase.

use crate::{
    ChangeAction, ChangeId, ChangeRecord, Cursor, Payload, RecordId, RemoteVersion, TableName,
    Timestamp,
};
use serde::{Deserialize, Serialize};

/// One change as sent to `POST /sync/push`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushChange {
    /// Idempotency key
    pub id: ChangeId,
    pub table: TableName,
    pub record_id: RecordId,
    pub action: ChangeAction,
    #[serde(default)]
    pub payload: Payload,
    #[serde(default)]
    pub base_version: Option<RemoteVersion>,
    pub edited_at: Timestamp,
}

impl From<&ChangeRecord> for PushChange {
    fn from(change: &ChangeRecord) -> Self {
        Self {
            id: change.id.clone(),
            table: change.table.clone(),
            record_id: change.record_id.clone(),
            action: change.action,
            payload: change.payload.clone(),
            base_version: change.base_version,
            edited_at: change.edited_at,
        }
    }
}

/// Request body for `POST /sync/push`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub changes: Vec<PushChange>,
}

/// What the server did with a pushed change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushOutcome {
    /// Written; `remoteVersion` is the record's new version
    Applied,
    /// The base version is behind the server; carries the current state
    Stale,
    /// Failed validation and will never be applied as is
    Rejected,
}

/// Per-change result in a push response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResult {
    pub id: ChangeId,
    pub outcome: PushOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_version: Option<RemoteVersion>,
    /// Current server payload, sent with `stale`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_payload: Option<Payload>,
    #[serde(default)]
    pub server_deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PushResult {
    pub fn applied(id: impl Into<ChangeId>, version: RemoteVersion) -> Self {
        Self {
            id: id.into(),
            outcome: PushOutcome::Applied,
            remote_version: Some(version),
            server_payload: None,
            server_deleted: false,
            reason: None,
        }
    }

    pub fn stale(
        id: impl Into<ChangeId>,
        version: RemoteVersion,
        server_payload: Option<Payload>,
        server_deleted: bool,
    ) -> Self {
        Self {
            id: id.into(),
            outcome: PushOutcome::Stale,
            remote_version: Some(version),
            server_payload,
            server_deleted,
            reason: None,
        }
    }

    pub fn rejected(id: impl Into<ChangeId>, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            outcome: PushOutcome::Rejected,
            remote_version: None,
            server_payload: None,
            server_deleted: false,
            reason: Some(reason.into()),
        }
    }
}

/// Response body for `POST /sync/push`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    pub results: Vec<PushResult>,
}

impl PushResponse {
    pub fn result_for(&self, change_id: &str) -> Option<&PushResult> {
        self.results.iter().find(|r| r.id == change_id)
    }
}

/// Query string of `GET /sync/pull`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullQuery {
    pub table: TableName,
    #[serde(default)]
    pub cursor: Cursor,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// One server-side change in a pull page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullChange {
    pub record_id: RecordId,
    pub action: ChangeAction,
    /// Full record payload after the change; empty for deletes
    #[serde(default)]
    pub payload: Payload,
    pub remote_version: RemoteVersion,
}

/// Response body for `GET /sync/pull`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    /// Changes in server sequence order
    pub changes: Vec<PullChange>,
    /// Cursor to resume from
    pub next_cursor: Cursor,
    pub has_more: bool,
}
