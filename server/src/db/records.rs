//! Database operations for the records table.

use sqlx::types::Json;
use sqlx::{PgConnection, Row};
use tillsync_engine::{Payload, RemoteVersion};

/// A stored record row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub tenant_id: String,
    pub table_name: String,
    pub record_id: String,
    pub payload: Payload,
    pub deleted: bool,
    /// Edit time of the change that produced this state
    pub updated_at: i64,
    /// Feed sequence of that change
    pub seq: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredRecord {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        let payload: Json<Payload> = row.try_get("payload")?;
        Ok(StoredRecord {
            tenant_id: row.try_get("tenant_id")?,
            table_name: row.try_get("table_name")?,
            record_id: row.try_get("record_id")?,
            payload: payload.0,
            deleted: row.try_get("deleted")?,
            updated_at: row.try_get("updated_at")?,
            seq: row.try_get("seq")?,
        })
    }
}

impl StoredRecord {
    /// The version devices see for this state.
    pub fn version(&self) -> RemoteVersion {
        RemoteVersion::new(self.updated_at.max(0) as u64, self.seq.max(0) as u64)
    }
}

/// Serialize writers of one record for the rest of the transaction.
///
/// Row locks cannot cover a record that does not exist yet, so two creates
/// of the same id would both see nothing. An advisory lock on the key can.
pub async fn lock_record_key(
    conn: &mut PgConnection,
    tenant_id: &str,
    table_name: &str,
    record_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(format!("{}\u{1f}{}\u{1f}{}", tenant_id, table_name, record_id))
        .execute(conn)
        .await?;
    Ok(())
}

/// Get a record by tenant, table and ID.
pub async fn get_record(
    conn: &mut PgConnection,
    tenant_id: &str,
    table_name: &str,
    record_id: &str,
) -> Result<Option<StoredRecord>, sqlx::Error> {
    sqlx::query_as::<_, StoredRecord>(
        r#"
        SELECT tenant_id, table_name, record_id, payload, deleted, updated_at, seq
        FROM records
        WHERE tenant_id = $1 AND table_name = $2 AND record_id = $3
        "#,
    )
    .bind(tenant_id)
    .bind(table_name)
    .bind(record_id)
    .fetch_optional(conn)
    .await
}

/// Upsert a record (insert or update).
pub async fn upsert_record(conn: &mut PgConnection, record: &StoredRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO records (
            tenant_id, table_name, record_id, payload, deleted, updated_at, seq
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (tenant_id, table_name, record_id) DO UPDATE SET
            payload = EXCLUDED.payload,
            deleted = EXCLUDED.deleted,
            updated_at = EXCLUDED.updated_at,
            seq = EXCLUDED.seq,
            modified_at = NOW()
        "#,
    )
    .bind(&record.tenant_id)
    .bind(&record.table_name)
    .bind(&record.record_id)
    .bind(Json(&record.payload))
    .bind(record.deleted)
    .bind(record.updated_at)
    .bind(record.seq)
    .execute(conn)
    .await?;

    Ok(())
}
