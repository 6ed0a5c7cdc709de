//! Push handler - applies device changes to the system of record.
//!
//! Each change is handled in its own transaction so one bad change never
//! holds back the rest of the batch. Within the transaction the record key
//! is locked, the ledger is checked, and the change is either applied,
//! answered as stale, or rejected.

use crate::db::{self, NewFeedEntry, StoredRecord};
use crate::error::{AppError, Result};
use sqlx::PgPool;
use tillsync_engine::{
    ChangeAction, Payload, PushChange, PushRequest, PushResponse, PushResult, Schema,
};

/// Largest batch accepted in one request.
pub const MAX_BATCH: usize = 500;

/// What to do with one pushed change.
#[derive(Debug, PartialEq)]
pub enum Decision {
    /// Write this state and append it to the feed
    Apply(NextState),
    /// Answer without writing
    Reply(PushResult),
}

/// Record state after an applied change.
#[derive(Debug, PartialEq)]
pub struct NextState {
    /// Action as published on the feed
    pub action: ChangeAction,
    pub payload: Payload,
    pub deleted: bool,
    pub updated_at: i64,
}

/// Decide a change against the record's current server state.
///
/// A change is stale unless its base version is the current version, so a
/// device that has not seen the latest write gets that write back instead.
/// The stored `updated_at` never moves backwards, which keeps the version
/// devices compare against monotonic per record.
pub fn decide(schema: &Schema, change: &PushChange, current: Option<&StoredRecord>) -> Decision {
    if let Err(e) = schema.validate_change(&change.table, change.action, &change.payload) {
        return Decision::Reply(PushResult::rejected(&change.id, e.to_string()));
    }

    match current {
        Some(current) => {
            let base_seq = change.base_version.map(|base| base.seq as i64);
            if base_seq != Some(current.seq) {
                return Decision::Reply(PushResult::stale(
                    &change.id,
                    current.version(),
                    (!current.deleted).then(|| current.payload.clone()),
                    current.deleted,
                ));
            }
        }
        None if change.action == ChangeAction::Update => {
            return Decision::Reply(PushResult::rejected(&change.id, "record does not exist"));
        }
        None => {}
    }

    let edited_at = change.edited_at as i64;
    let updated_at = current.map_or(edited_at, |c| c.updated_at.max(edited_at));

    let next = match change.action {
        ChangeAction::Create => NextState {
            action: if current.is_some() {
                ChangeAction::Update
            } else {
                ChangeAction::Create
            },
            payload: change.payload.clone(),
            deleted: false,
            updated_at,
        },
        ChangeAction::Update => {
            let mut payload = current.map(|c| c.payload.clone()).unwrap_or_default();
            for (field, value) in &change.payload {
                payload.insert(field.clone(), value.clone());
            }
            NextState {
                action: ChangeAction::Update,
                payload,
                deleted: false,
                updated_at,
            }
        }
        ChangeAction::Delete => NextState {
            action: ChangeAction::Delete,
            payload: current.map(|c| c.payload.clone()).unwrap_or_default(),
            deleted: true,
            updated_at,
        },
    };

    Decision::Apply(next)
}

/// Process a push request from a device.
pub async fn handle_push(
    pool: &PgPool,
    schema: &Schema,
    tenant_id: &str,
    request: PushRequest,
) -> Result<PushResponse> {
    if request.changes.len() > MAX_BATCH {
        return Err(AppError::BatchTooLarge {
            size: request.changes.len(),
            max: MAX_BATCH,
        });
    }

    let mut results = Vec::with_capacity(request.changes.len());
    for change in &request.changes {
        let result = push_one(pool, schema, tenant_id, change).await?;
        tracing::debug!(
            tenant = tenant_id,
            change_id = %change.id,
            table = %change.table,
            record_id = %change.record_id,
            action = %change.action,
            outcome = ?result.outcome,
            "push change"
        );
        results.push(result);
    }

    Ok(PushResponse { results })
}

async fn push_one(
    pool: &PgPool,
    schema: &Schema,
    tenant_id: &str,
    change: &PushChange,
) -> Result<PushResult> {
    let mut tx = pool.begin().await?;

    // The ledger is read under the record lock: a concurrent retry of the
    // same change waits here and then finds it applied.
    db::lock_record_key(&mut tx, tenant_id, &change.table, &change.record_id).await?;

    if let Some(version) = db::find_applied(&mut tx, tenant_id, &change.id).await? {
        tx.rollback().await?;
        return Ok(PushResult::applied(&change.id, version));
    }

    let current = db::get_record(&mut tx, tenant_id, &change.table, &change.record_id).await?;

    let next = match decide(schema, change, current.as_ref()) {
        Decision::Reply(result) => {
            tx.rollback().await?;
            return Ok(result);
        }
        Decision::Apply(next) => next,
    };

    // Held until commit: the next writer of this tenant draws a higher seq
    // only after this row is visible.
    db::lock_tenant_feed(&mut tx, tenant_id).await?;
    let seq = db::append_feed(
        &mut tx,
        &NewFeedEntry {
            tenant_id,
            table_name: &change.table,
            record_id: &change.record_id,
            action: next.action,
            payload: &next.payload,
            updated_at: next.updated_at,
            change_id: &change.id,
        },
    )
    .await?;

    let record = StoredRecord {
        tenant_id: tenant_id.to_string(),
        table_name: change.table.clone(),
        record_id: change.record_id.clone(),
        payload: next.payload,
        deleted: next.deleted,
        updated_at: next.updated_at,
        seq,
    };
    db::upsert_record(&mut tx, &record).await?;

    let version = record.version();
    db::record_applied(&mut tx, tenant_id, &change.id, version).await?;
    tx.commit().await?;

    Ok(PushResult::applied(&change.id, version))
}
