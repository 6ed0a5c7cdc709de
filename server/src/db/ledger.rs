//! Idempotency ledger of applied change ids.
//!
//! Only applied outcomes are kept. A change that was stale or rejected can
//! be sent again with the same id after the device retries, and the answer
//! is then computed against the record as it is at that point.

use sqlx::PgConnection;
use tillsync_engine::RemoteVersion;

/// Version a change produced, if it was already applied.
pub async fn find_applied(
    conn: &mut PgConnection,
    tenant_id: &str,
    change_id: &str,
) -> Result<Option<RemoteVersion>, sqlx::Error> {
    let row: Option<(i64, i64)> = sqlx::query_as(
        r#"SELECT updated_at, seq FROM applied_changes WHERE tenant_id = $1 AND change_id = $2"#,
    )
    .bind(tenant_id)
    .bind(change_id)
    .fetch_optional(conn)
    .await?;

    Ok(row.map(|(updated_at, seq)| {
        RemoteVersion::new(updated_at.max(0) as u64, seq.max(0) as u64)
    }))
}

/// Remember that a change was applied.
pub async fn record_applied(
    conn: &mut PgConnection,
    tenant_id: &str,
    change_id: &str,
    version: RemoteVersion,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO applied_changes (tenant_id, change_id, updated_at, seq)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(tenant_id)
    .bind(change_id)
    .bind(version.updated_at as i64)
    .bind(version.seq as i64)
    .execute(conn)
    .await?;

    Ok(())
}
