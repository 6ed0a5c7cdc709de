//! Local change log - the durable queue of pending mutations.
//!
//! Changes are kept per tenant in enqueue order. At most one change per
//! record is ever queued: newer edits coalesce into it in place, so the
//! queue position of a record is that of its first unsynced edit.

use crate::{
    change::Coalesced, ChangeAction, ChangeId, ChangeRecord, Payload, PriorState, RemoteVersion,
    TenantId, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How an enqueue landed in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Appended as a new change
    Appended,
    /// Folded into the record's pending change
    Coalesced,
    /// Cancelled the record's pending change, nothing left to push
    Cancelled,
}

/// Result of [`ChangeLog::enqueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enqueued {
    pub change_id: ChangeId,
    pub disposition: Disposition,
}

/// Pending changes for every tenant on this device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeLog {
    queues: BTreeMap<TenantId, Vec<ChangeRecord>>,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a local mutation, coalescing with a pending change for the
    /// same record if there is one.
    #[allow(clippy::too_many_arguments)]
    pub fn enqueue(
        &mut self,
        tenant_id: &str,
        table: &str,
        record_id: &str,
        action: ChangeAction,
        payload: Payload,
        base_version: Option<RemoteVersion>,
        prior: Option<PriorState>,
        now: Timestamp,
    ) -> Enqueued {
        let queue = self.queues.entry(tenant_id.to_string()).or_default();

        if let Some(index) = queue.iter().position(|c| c.targets(table, record_id)) {
            let change_id = queue[index].id.clone();
            let disposition = match queue[index].coalesce(action, payload, now) {
                Coalesced::Merged => Disposition::Coalesced,
                Coalesced::Cancelled => {
                    queue.remove(index);
                    if queue.is_empty() {
                        self.queues.remove(tenant_id);
                    }
                    Disposition::Cancelled
                }
            };
            return Enqueued {
                change_id,
                disposition,
            };
        }

        let change = ChangeRecord::new(
            tenant_id,
            table,
            record_id,
            action,
            payload,
            base_version,
            now,
        )
        .with_prior(prior);
        let change_id = change.id.clone();
        queue.push(change);

        Enqueued {
            change_id,
            disposition: Disposition::Appended,
        }
    }

    /// Remove an acknowledged or abandoned change.
    pub fn dequeue(&mut self, tenant_id: &str, change_id: &str) -> Option<ChangeRecord> {
        let queue = self.queues.get_mut(tenant_id)?;
        let index = queue.iter().position(|c| c.id == change_id)?;
        let removed = queue.remove(index);
        if queue.is_empty() {
            self.queues.remove(tenant_id);
        }
        Some(removed)
    }

    /// All pending changes of a tenant, oldest first.
    pub fn list_pending(&self, tenant_id: &str) -> &[ChangeRecord] {
        self.queues
            .get(tenant_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// The first `batch_size` pending changes of a tenant.
    pub fn next_batch(&self, tenant_id: &str, batch_size: usize) -> Vec<ChangeRecord> {
        self.list_pending(tenant_id)
            .iter()
            .take(batch_size)
            .cloned()
            .collect()
    }

    pub fn get(&self, tenant_id: &str, change_id: &str) -> Option<&ChangeRecord> {
        self.list_pending(tenant_id)
            .iter()
            .find(|c| c.id == change_id)
    }

    /// The outstanding change for a record, if any.
    pub fn pending_for(&self, tenant_id: &str, table: &str, record_id: &str) -> Option<&ChangeRecord> {
        self.list_pending(tenant_id)
            .iter()
            .find(|c| c.targets(table, record_id))
    }

    fn get_mut(&mut self, tenant_id: &str, change_id: &str) -> Option<&mut ChangeRecord> {
        self.queues
            .get_mut(tenant_id)?
            .iter_mut()
            .find(|c| c.id == change_id)
    }

    /// Point a change at a newer server version. Returns the change's new
    /// id, or `None` if it is no longer queued.
    pub fn rebase(
        &mut self,
        tenant_id: &str,
        change_id: &str,
        version: RemoteVersion,
    ) -> Option<ChangeId> {
        let change = self.get_mut(tenant_id, change_id)?;
        change.rebase(version);
        Some(change.id.clone())
    }

    /// Replace the payload of a queued change.
    pub(crate) fn replace_payload(
        &mut self,
        tenant_id: &str,
        change_id: &str,
        action: ChangeAction,
        payload: Payload,
    ) {
        if let Some(change) = self.get_mut(tenant_id, change_id) {
            change.action = action;
            change.payload = payload;
        }
    }

    /// Count a failed delivery attempt, returning the new attempt count.
    pub fn record_attempt(&mut self, tenant_id: &str, change_id: &str) -> Option<u32> {
        let change = self.get_mut(tenant_id, change_id)?;
        change.attempts += 1;
        Some(change.attempts)
    }

    pub fn len(&self, tenant_id: &str) -> usize {
        self.list_pending(tenant_id).len()
    }

    pub fn is_empty(&self, tenant_id: &str) -> bool {
        self.len(tenant_id) == 0
    }

    /// Tenants with at least one pending change.
    pub fn tenants(&self) -> impl Iterator<Item = &TenantId> {
        self.queues.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    fn enqueue(
        log: &mut ChangeLog,
        record_id: &str,
        action: ChangeAction,
        value: serde_json::Value,
        now: Timestamp,
    ) -> Enqueued {
        log.enqueue(
            "t1",
            "customers",
            record_id,
            action,
            payload(value),
            None,
            None,
            now,
        )
    }

    #[test]
    fn enqueue_appends_in_fifo_order() {
        let mut log = ChangeLog::new();
        enqueue(&mut log, "c1", ChangeAction::Create, json!({"name": "A"}), 1);
        enqueue(&mut log, "c2", ChangeAction::Create, json!({"name": "B"}), 2);
        enqueue(&mut log, "c3", ChangeAction::Create, json!({"name": "C"}), 3);

        let ids: Vec<_> = log
            .list_pending("t1")
            .iter()
            .map(|c| c.record_id.as_str())
            .collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
    }

    #[test]
    fn edits_to_same_record_coalesce_in_place() {
        let mut log = ChangeLog::new();
        let first = enqueue(&mut log, "c1", ChangeAction::Create, json!({"name": "A"}), 1);
        enqueue(&mut log, "c2", ChangeAction::Create, json!({"name": "B"}), 2);
        let second = enqueue(&mut log, "c1", ChangeAction::Update, json!({"phone": "555"}), 3);

        assert_eq!(second.disposition, Disposition::Coalesced);
        assert_eq!(first.change_id, second.change_id);
        assert_eq!(log.len("t1"), 2);

        let head = &log.list_pending("t1")[0];
        assert_eq!(head.record_id, "c1");
        assert_eq!(head.action, ChangeAction::Create);
        assert_eq!(
            serde_json::Value::Object(head.payload.clone()),
            json!({"name": "A", "phone": "555"})
        );
    }

    #[test]
    fn create_then_delete_leaves_nothing() {
        let mut log = ChangeLog::new();
        enqueue(&mut log, "c1", ChangeAction::Create, json!({"name": "A"}), 1);
        let result = enqueue(&mut log, "c1", ChangeAction::Delete, json!({}), 2);

        assert_eq!(result.disposition, Disposition::Cancelled);
        assert!(log.is_empty("t1"));
        assert_eq!(log.tenants().count(), 0);
    }

    #[test]
    fn dequeue_removes_only_target() {
        let mut log = ChangeLog::new();
        let a = enqueue(&mut log, "c1", ChangeAction::Create, json!({"name": "A"}), 1);
        enqueue(&mut log, "c2", ChangeAction::Create, json!({"name": "B"}), 2);

        let removed = log.dequeue("t1", &a.change_id).unwrap();
        assert_eq!(removed.record_id, "c1");
        assert_eq!(log.len("t1"), 1);
        assert!(log.dequeue("t1", &a.change_id).is_none());
    }

    #[test]
    fn tenants_are_isolated() {
        let mut log = ChangeLog::new();
        log.enqueue(
            "t1",
            "orders",
            "o1",
            ChangeAction::Create,
            Payload::new(),
            None,
            None,
            1,
        );
        log.enqueue(
            "t2",
            "orders",
            "o1",
            ChangeAction::Create,
            Payload::new(),
            None,
            None,
            1,
        );

        assert_eq!(log.len("t1"), 1);
        assert_eq!(log.len("t2"), 1);
        assert!(log.pending_for("t1", "orders", "o1").is_some());
        assert!(log.pending_for("t3", "orders", "o1").is_none());
    }

    #[test]
    fn next_batch_respects_size() {
        let mut log = ChangeLog::new();
        for i in 0..5 {
            enqueue(
                &mut log,
                &format!("c{i}"),
                ChangeAction::Create,
                json!({"name": "x"}),
                i,
            );
        }
        let batch = log.next_batch("t1", 3);
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].record_id, "c0");
        assert_eq!(batch[2].record_id, "c2");
    }

    #[test]
    fn attempts_and_rebase() {
        let mut log = ChangeLog::new();
        let e = enqueue(&mut log, "c1", ChangeAction::Create, json!({"name": "A"}), 1);

        assert_eq!(log.record_attempt("t1", &e.change_id), Some(1));
        assert_eq!(log.record_attempt("t1", &e.change_id), Some(2));

        let new_id = log
            .rebase("t1", &e.change_id, RemoteVersion::new(10, 4))
            .unwrap();
        assert!(log.get("t1", &e.change_id).is_none());
        let change = log.get("t1", &new_id).unwrap();
        assert_eq!(change.attempts, 0);
        assert_eq!(change.action, ChangeAction::Update);
        assert_eq!(log.pending_for("t1", "customers", "c1").map(|c| &c.id), Some(&new_id));
        assert!(log.rebase("t1", "missing", RemoteVersion::new(10, 4)).is_none());
    }

    #[test]
    fn survives_serialization() {
        let mut log = ChangeLog::new();
        enqueue(&mut log, "c1", ChangeAction::Create, json!({"name": "A"}), 1);
        enqueue(&mut log, "c2", ChangeAction::Create, json!({"name": "B"}), 2);

        let json = serde_json::to_string(&log).unwrap();
        let restored: ChangeLog = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, log);
        assert_eq!(restored.list_pending("t1")[1].record_id, "c2");
    }
}
