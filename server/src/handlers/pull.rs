//! Pull handler - serves the change feed to devices.

use crate::db;
use crate::error::{AppError, Result};
use sqlx::PgPool;
use tillsync_engine::{Error as EngineError, PullQuery, PullResponse, Schema};

/// Default limit for pull operations.
const DEFAULT_LIMIT: usize = 100;

/// Maximum limit for pull operations.
const MAX_LIMIT: usize = 1000;

/// Process a pull request from a device.
pub async fn handle_pull(
    pool: &PgPool,
    schema: &Schema,
    tenant_id: &str,
    query: PullQuery,
) -> Result<PullResponse> {
    if schema.get_table(&query.table).is_none() {
        return Err(EngineError::TableNotFound(query.table).into());
    }

    let limit = query
        .limit
        .map(|l| l.clamp(1, MAX_LIMIT))
        .unwrap_or(DEFAULT_LIMIT);
    let cursor = i64::try_from(query.cursor)
        .map_err(|_| AppError::BadRequest(format!("cursor out of range: {}", query.cursor)))?;

    // Fetch one more than requested to check if there are more
    let entries =
        db::feed_since(pool, tenant_id, &query.table, cursor, limit as i64 + 1).await?;

    let has_more = entries.len() > limit;
    let page: Vec<_> = entries.into_iter().take(limit).collect();

    let mut changes = Vec::with_capacity(page.len());
    for entry in &page {
        let change = entry.to_pull_change().map_err(|e| {
            AppError::Internal(format!("feed entry {} is corrupt: {}", entry.seq, e))
        })?;
        changes.push(change);
    }

    let next_cursor = page
        .last()
        .map(|entry| entry.seq.max(0) as u64)
        .unwrap_or(query.cursor);

    tracing::debug!(
        tenant = tenant_id,
        table = %query.table,
        cursor = query.cursor,
        next_cursor,
        count = changes.len(),
        has_more,
        oldest = ?page.first().map(|entry| entry.recorded_at),
        "pull page"
    );

    Ok(PullResponse {
        changes,
        next_cursor,
        has_more,
    })
}
