//! Pull side of a sync cycle.
//!
//! Pages of server changes are applied one table at a time. The cursor for
//! a table only advances once the whole page has been applied, so a crash
//! in the middle of a page re-pulls it and replays it idempotently.

use crate::{
    error::Result, tombstone::TombstoneManager, ChangeAction, Cursor, EntityRepository,
    LocalRecord, Payload, PullChange, PullResponse, RemoteState, Replica, ResolutionRecord,
    SyncStatus, Timestamp, Verdict,
};

impl From<&PullChange> for RemoteState {
    fn from(change: &PullChange) -> Self {
        if change.action == ChangeAction::Delete {
            RemoteState::deleted(change.remote_version)
        } else {
            RemoteState::live(change.remote_version, change.payload.clone())
        }
    }
}

/// What a pull page did to local state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PullReport {
    /// Remote changes written locally
    pub applied: usize,
    /// Remote deletes turned into tombstones
    pub tombstoned: usize,
    /// Already seen, or older than the pending local change's base
    pub skipped: usize,
    /// Live snapshots older than a local tombstone
    pub suppressed: usize,
    /// Changes that met a pending local change
    pub conflicts: usize,
    /// Conflicts that became a case
    pub ties: usize,
    pub resolutions: Vec<ResolutionRecord>,
    /// Cursor after the page
    pub cursor: Cursor,
    pub has_more: bool,
}

impl<R: EntityRepository> Replica<R> {
    /// Apply one page of remote changes for `table` and advance its cursor.
    pub fn apply_pull_page(
        &mut self,
        tenant_id: &str,
        table: &str,
        page: &PullResponse,
        now: Timestamp,
    ) -> Result<PullReport> {
        let mut report = PullReport {
            has_more: page.has_more,
            ..PullReport::default()
        };

        for change in &page.changes {
            self.apply_remote_change(tenant_id, table, change, now, &mut report)?;
        }

        self.state.advance_cursor(tenant_id, table, page.next_cursor);
        report.cursor = self.state.get_cursor(tenant_id, table);
        Ok(report)
    }

    fn apply_remote_change(
        &mut self,
        tenant_id: &str,
        table: &str,
        change: &PullChange,
        now: Timestamp,
        report: &mut PullReport,
    ) -> Result<()> {
        let remote = RemoteState::from(change);
        let existing = self.repository.get(tenant_id, table, &change.record_id)?;

        if existing
            .as_ref()
            .is_some_and(|r| r.has_seen(&remote.version))
        {
            report.skipped += 1;
            return Ok(());
        }

        if let Some(pending) = self
            .change_log
            .pending_for(tenant_id, table, &change.record_id)
            .cloned()
        {
            let behind_base = pending
                .base_version
                .is_some_and(|base| base.seq >= remote.version.seq);
            if behind_base {
                report.skipped += 1;
                return Ok(());
            }

            let (verdict, resolution) = self.settle(&pending, &remote, now)?;
            report.conflicts += 1;
            if verdict == Verdict::Tie {
                report.ties += 1;
            }
            report.resolutions.extend(resolution);
            return Ok(());
        }

        self.state
            .refresh_conflict_remote(tenant_id, table, &change.record_id, &remote);

        let mut record = existing.unwrap_or_else(|| {
            LocalRecord::new(tenant_id, table, &change.record_id, Payload::new())
        });

        if remote.deleted {
            TombstoneManager::apply_remote(&mut record, &remote);
            self.commit(record, SyncStatus::Synced)?;
            report.tombstoned += 1;
        } else if TombstoneManager::suppresses(&record, &remote) {
            report.suppressed += 1;
        } else {
            TombstoneManager::apply_remote(&mut record, &remote);
            self.commit(record, SyncStatus::Synced)?;
            report.applied += 1;
        }
        Ok(())
    }
}
