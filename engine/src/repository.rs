//! Entity storage seam.
//!
//! Business-entity storage belongs to the entity layer. The engine reads and
//! writes records only through [`EntityRepository`], and only ever changes
//! the sync-owned fields plus whatever payload a sync decision dictates.

use crate::{error::Result, LocalRecord, RecordId, TableName, TenantId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Keyed access to the local entity store.
///
/// `get` and `list` return tombstoned records too; callers filter on
/// [`LocalRecord::is_active`].
pub trait EntityRepository {
    fn get(&self, tenant_id: &str, table: &str, id: &str) -> Result<Option<LocalRecord>>;

    fn put(&mut self, record: LocalRecord) -> Result<()>;

    /// Physically remove a record.
    fn delete(&mut self, tenant_id: &str, table: &str, id: &str) -> Result<Option<LocalRecord>>;

    fn list(&self, tenant_id: &str, table: &str) -> Result<Vec<LocalRecord>>;
}

/// In-memory repository, persisted as part of a replica snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRepository {
    tenants: BTreeMap<TenantId, BTreeMap<TableName, BTreeMap<RecordId, LocalRecord>>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count all records including tombstones.
    pub fn record_count(&self) -> usize {
        self.tenants
            .values()
            .flat_map(|tables| tables.values())
            .map(|records| records.len())
            .sum()
    }

    /// Count live records.
    pub fn active_count(&self) -> usize {
        self.tenants
            .values()
            .flat_map(|tables| tables.values())
            .flat_map(|records| records.values())
            .filter(|r| r.is_active())
            .count()
    }

    /// Tables that hold at least one record, across tenants.
    pub fn table_names(&self) -> impl Iterator<Item = &TableName> {
        self.tenants.values().flat_map(|tables| tables.keys())
    }
}

impl EntityRepository for MemoryRepository {
    fn get(&self, tenant_id: &str, table: &str, id: &str) -> Result<Option<LocalRecord>> {
        Ok(self
            .tenants
            .get(tenant_id)
            .and_then(|tables| tables.get(table))
            .and_then(|records| records.get(id))
            .cloned())
    }

    fn put(&mut self, record: LocalRecord) -> Result<()> {
        self.tenants
            .entry(record.tenant_id.clone())
            .or_default()
            .entry(record.table.clone())
            .or_default()
            .insert(record.id.clone(), record);
        Ok(())
    }

    fn delete(&mut self, tenant_id: &str, table: &str, id: &str) -> Result<Option<LocalRecord>> {
        Ok(self
            .tenants
            .get_mut(tenant_id)
            .and_then(|tables| tables.get_mut(table))
            .and_then(|records| records.remove(id)))
    }

    fn list(&self, tenant_id: &str, table: &str) -> Result<Vec<LocalRecord>> {
        Ok(self
            .tenants
            .get(tenant_id)
            .and_then(|tables| tables.get(table))
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }
}
