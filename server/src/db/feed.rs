//! Database operations for the sync feed.

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Row};
use tillsync_engine::{ChangeAction, Payload, PullChange, RemoteVersion};

/// A row of the change feed.
#[derive(Debug)]
pub struct FeedEntry {
    pub seq: i64,
    pub record_id: String,
    pub action: String,
    pub payload: Payload,
    pub updated_at: i64,
    pub recorded_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for FeedEntry {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        let payload: Json<Payload> = row.try_get("payload")?;
        Ok(FeedEntry {
            seq: row.try_get("seq")?,
            record_id: row.try_get("record_id")?,
            action: row.try_get("action")?,
            payload: payload.0,
            updated_at: row.try_get("updated_at")?,
            recorded_at: row.try_get("recorded_at")?,
        })
    }
}

impl FeedEntry {
    /// Convert a feed row to its wire form.
    pub fn to_pull_change(&self) -> Result<PullChange, String> {
        let action = parse_action(&self.action)?;
        Ok(PullChange {
            record_id: self.record_id.clone(),
            action,
            payload: if action == ChangeAction::Delete {
                Payload::new()
            } else {
                self.payload.clone()
            },
            remote_version: RemoteVersion::new(
                self.updated_at.max(0) as u64,
                self.seq.max(0) as u64,
            ),
        })
    }
}

fn parse_action(value: &str) -> Result<ChangeAction, String> {
    match value {
        "create" => Ok(ChangeAction::Create),
        "update" => Ok(ChangeAction::Update),
        "delete" => Ok(ChangeAction::Delete),
        other => Err(format!("Unknown change action: {}", other)),
    }
}

/// A change about to be appended to the feed.
#[derive(Debug)]
pub struct NewFeedEntry<'a> {
    pub tenant_id: &'a str,
    pub table_name: &'a str,
    pub record_id: &'a str,
    pub action: ChangeAction,
    /// Full record payload after the change
    pub payload: &'a Payload,
    pub updated_at: i64,
    pub change_id: &'a str,
}

/// First key of the two-key advisory locks that guard a tenant's feed. The
/// two-key space is disjoint from the single-key record locks.
const FEED_LOCK_CLASS: i32 = 1;

/// Serialize feed appends of one tenant until the transaction ends.
///
/// `seq` is drawn at insert time but becomes visible at commit. Without this
/// lock a later seq could commit first, a puller would move its cursor past
/// it, and the earlier row would never be served.
pub async fn lock_tenant_feed(conn: &mut PgConnection, tenant_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock($1, hashtext($2))")
        .bind(FEED_LOCK_CLASS)
        .bind(tenant_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Append a change to the feed and return its sequence number.
///
/// Callers hold [`lock_tenant_feed`] so that sequence order matches commit
/// order within the tenant.
pub async fn append_feed(conn: &mut PgConnection, entry: &NewFeedEntry<'_>) -> Result<i64, sqlx::Error> {
    let result: (i64,) = sqlx::query_as(
        r#"
        INSERT INTO sync_feed (
            tenant_id, table_name, record_id, action, payload, updated_at, change_id
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING seq
        "#,
    )
    .bind(entry.tenant_id)
    .bind(entry.table_name)
    .bind(entry.record_id)
    .bind(entry.action.to_string())
    .bind(Json(entry.payload))
    .bind(entry.updated_at)
    .bind(entry.change_id)
    .fetch_one(conn)
    .await?;

    Ok(result.0)
}

/// Feed entries of one tenant's table after `cursor`, in sequence order.
pub async fn feed_since(
    pool: &PgPool,
    tenant_id: &str,
    table_name: &str,
    cursor: i64,
    limit: i64,
) -> Result<Vec<FeedEntry>, sqlx::Error> {
    sqlx::query_as::<_, FeedEntry>(
        r#"
        SELECT seq, record_id, action, payload, updated_at, recorded_at
        FROM sync_feed
        WHERE tenant_id = $1 AND table_name = $2 AND seq > $3
        ORDER BY seq ASC
        LIMIT $4
        "#,
    )
    .bind(tenant_id)
    .bind(table_name)
    .bind(cursor)
    .bind(limit)
    .fetch_all(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(action: &str) -> FeedEntry {
        FeedEntry {
            seq: 42,
            record_id: "o1".into(),
            action: action.into(),
            payload: json!({"total": 12.5}).as_object().cloned().unwrap(),
            updated_at: 1_700_000_000_000,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn update_row_carries_payload_and_version() {
        let change = entry("update").to_pull_change().unwrap();
        assert_eq!(change.action, ChangeAction::Update);
        assert_eq!(change.remote_version, RemoteVersion::new(1_700_000_000_000, 42));
        assert_eq!(change.payload.get("total"), Some(&json!(12.5)));
    }

    #[test]
    fn delete_row_has_empty_payload() {
        let change = entry("delete").to_pull_change().unwrap();
        assert!(change.payload.is_empty());
    }

    #[test]
    fn unknown_action_is_an_error() {
        assert!(entry("upsert").to_pull_change().is_err());
    }
}
