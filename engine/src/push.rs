//! Push side of a sync cycle.
//!
//! The engine hands out a batch of the oldest pending changes and later
//! folds the server's per-change results back into local state. Transport
//! is the caller's job.
//!
//! A change can be edited again while its batch is in flight. Such changes
//! carry a higher `revision` than the copy that was sent, and an `applied`
//! result only rebases them instead of clearing them.

use crate::{
    error::Result, ChangeAction, ChangeRecord, ConflictReason, EntityRepository, LocalRecord,
    Payload, PushOutcome, PushRequest, PushResponse, PushResult, RemoteState, RemoteVersion,
    Replica, ResolutionRecord, SyncStatus, TenantId, Timestamp, Verdict,
};

/// A batch of changes taken from the head of a tenant's log.
#[derive(Debug, Clone, PartialEq)]
pub struct PushBatch {
    pub tenant_id: TenantId,
    /// Snapshot of the changes as they were when the batch was built
    pub changes: Vec<ChangeRecord>,
}

impl PushBatch {
    /// Wire request for this batch.
    pub fn request(&self) -> PushRequest {
        PushRequest {
            changes: self.changes.iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// What a push response did to local state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushReport {
    /// Changes cleared from the log
    pub applied: usize,
    /// Applied, but edited meanwhile and still pending
    pub rebased: usize,
    /// Stale results settled by the conflict policy
    pub stale: usize,
    pub rejected: usize,
    /// Changes that will be retried
    pub retried: usize,
    /// Changes parked after running out of attempts
    pub timed_out: usize,
    /// Ties that opened a conflict case
    pub ties: usize,
    /// Automatic resolutions made while settling stale results
    pub resolutions: Vec<ResolutionRecord>,
}

impl PushReport {
    /// Whether any change failed to reach the server.
    pub fn has_failures(&self) -> bool {
        self.retried > 0
    }
}

impl<R: EntityRepository> Replica<R> {
    /// Take up to `batch_size` changes from the head of the tenant's log.
    pub fn prepare_push(&self, tenant_id: &str, batch_size: usize) -> Option<PushBatch> {
        let changes = self.change_log.next_batch(tenant_id, batch_size.max(1));
        if changes.is_empty() {
            return None;
        }
        Some(PushBatch {
            tenant_id: tenant_id.to_string(),
            changes,
        })
    }

    /// Fold the server's results for `batch` into local state.
    ///
    /// Changes with no result in the response count as failed deliveries.
    /// Applying the same response twice is harmless.
    pub fn apply_push_response(
        &mut self,
        batch: &PushBatch,
        response: &PushResponse,
        max_attempts: u32,
        now: Timestamp,
    ) -> Result<PushReport> {
        let mut report = PushReport::default();

        for sent in &batch.changes {
            match response.result_for(&sent.id) {
                Some(PushResult {
                    outcome: PushOutcome::Applied,
                    remote_version: Some(version),
                    ..
                }) => self.acknowledge(sent, *version, now, &mut report)?,
                Some(PushResult {
                    outcome: PushOutcome::Stale,
                    remote_version: Some(version),
                    server_payload,
                    server_deleted,
                    ..
                }) => {
                    let remote = RemoteState {
                        version: *version,
                        payload: server_payload.clone(),
                        deleted: *server_deleted,
                    };
                    self.settle_stale(sent, &remote, now, &mut report)?;
                }
                Some(PushResult {
                    outcome: PushOutcome::Rejected,
                    reason,
                    ..
                }) => {
                    let reason = reason
                        .clone()
                        .unwrap_or_else(|| "rejected by server".to_string());
                    if let Some(current) = self.change_log.get(&sent.tenant_id, &sent.id).cloned() {
                        self.park(&current, ConflictReason::Rejected { reason }, now)?;
                        report.rejected += 1;
                    }
                }
                // Missing result, or applied/stale without a version.
                _ => self.fail_delivery(sent, max_attempts, now, &mut report)?,
            }
        }

        Ok(report)
    }

    /// Count a failed delivery for every change in `batch`.
    pub fn record_push_failure(
        &mut self,
        batch: &PushBatch,
        max_attempts: u32,
        now: Timestamp,
    ) -> Result<PushReport> {
        let mut report = PushReport::default();
        for sent in &batch.changes {
            self.fail_delivery(sent, max_attempts, now, &mut report)?;
        }
        Ok(report)
    }

    fn acknowledge(
        &mut self,
        sent: &ChangeRecord,
        version: RemoteVersion,
        now: Timestamp,
        report: &mut PushReport,
    ) -> Result<()> {
        let tenant_id = sent.tenant_id.as_str();
        let mut record = match self
            .repository
            .get(tenant_id, &sent.table, &sent.record_id)?
        {
            Some(record) => record,
            None if sent.action == ChangeAction::Delete => {
                self.change_log.dequeue(tenant_id, &sent.id);
                return Ok(());
            }
            None => {
                // Created and then deleted again while the create was in
                // flight. Keep a tombstone so the delete can follow.
                let mut ghost = LocalRecord::new(
                    tenant_id,
                    &sent.table,
                    &sent.record_id,
                    sent.payload.clone(),
                );
                ghost.deleted_at = Some(now);
                ghost
            }
        };

        // A newer version is already known: this result was applied before.
        if record
            .remote_version
            .is_some_and(|seen| seen.is_newer_than(&version))
        {
            return Ok(());
        }
        record.observe_version(version);

        let revision = self
            .change_log
            .get(tenant_id, &sent.id)
            .map(|c| c.revision);
        match revision {
            Some(revision) if revision == sent.revision => {
                self.commit(record, SyncStatus::Synced)?;
                self.change_log.dequeue(tenant_id, &sent.id);
                report.applied += 1;
            }
            Some(_) => {
                self.commit(record, SyncStatus::Pending)?;
                self.change_log.rebase(tenant_id, &sent.id, version);
                report.rebased += 1;
            }
            None => {
                // The change left the log while in flight. A create the user
                // deleted meanwhile now exists on the server and needs a
                // delete to follow it.
                let pending = self
                    .change_log
                    .pending_for(tenant_id, &sent.table, &sent.record_id)
                    .is_some();
                let compensate =
                    sent.action != ChangeAction::Delete && !record.is_active() && !pending;
                if compensate {
                    let deleted_at = record.deleted_at.unwrap_or(now);
                    self.commit(record, SyncStatus::Pending)?;
                    self.change_log.enqueue(
                        tenant_id,
                        &sent.table,
                        &sent.record_id,
                        ChangeAction::Delete,
                        Payload::new(),
                        Some(version),
                        None,
                        deleted_at,
                    );
                } else {
                    let status = if pending {
                        SyncStatus::Pending
                    } else {
                        SyncStatus::Synced
                    };
                    self.commit(record, status)?;
                }
                report.applied += 1;
            }
        }
        Ok(())
    }

    fn settle_stale(
        &mut self,
        sent: &ChangeRecord,
        remote: &RemoteState,
        now: Timestamp,
        report: &mut PushReport,
    ) -> Result<()> {
        let Some(current) = self.change_log.get(&sent.tenant_id, &sent.id).cloned() else {
            return Ok(());
        };
        let (verdict, resolution) = self.settle(&current, remote, now)?;
        report.stale += 1;
        if verdict == Verdict::Tie {
            report.ties += 1;
        }
        report.resolutions.extend(resolution);
        Ok(())
    }

    fn fail_delivery(
        &mut self,
        sent: &ChangeRecord,
        max_attempts: u32,
        now: Timestamp,
        report: &mut PushReport,
    ) -> Result<()> {
        let Some(attempts) = self.change_log.record_attempt(&sent.tenant_id, &sent.id) else {
            return Ok(());
        };
        if attempts >= max_attempts.max(1) {
            if let Some(current) = self.change_log.get(&sent.tenant_id, &sent.id).cloned() {
                self.park(&current, ConflictReason::SyncTimeout, now)?;
            }
            report.timed_out += 1;
        } else {
            report.retried += 1;
        }
        Ok(())
    }
}
