//! Per-tenant sync orchestrator.
//!
//! A cycle pushes the tenant's change log, then pulls every table, moving
//! through `Idle -> Pushing -> Pulling -> Idle`. Cycles of one tenant never
//! overlap: the timer, reconnects and manual syncs all queue on the same
//! async lock. Going offline or calling [`Orchestrator::cancel`] abandons
//! the request in flight; whatever was not acknowledged stays pending and
//! the cursor of an abandoned page does not move.

use crate::config::SyncSettings;
use crate::connectivity::Connectivity;
use crate::error::{Result, SyncError};
use crate::remote::Remote;
use crate::store::Store;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tillsync_engine::{
    Backoff, PullQuery, PullReport, PushReport, ResolutionRecord, SyncSummary, Timestamp, Winner,
};
use tokio::sync::{watch, Mutex};

/// Upper bound on push round trips in one cycle. Rebased changes go out
/// again in the same cycle, so the drain loop needs a bound of its own.
const MAX_PUSH_ROUNDS: usize = 32;

/// Where a tenant's sync loop is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    Idle,
    Pushing,
    Pulling,
}

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub cycle: u64,
    pub pushed: usize,
    pub rebased: usize,
    pub stale: usize,
    pub rejected: usize,
    pub timed_out: usize,
    pub pulled: usize,
    pub tombstoned: usize,
    pub conflicts: usize,
    pub resolved: usize,
    pub purged: usize,
}

impl CycleReport {
    fn add_push(&mut self, report: &PushReport) {
        self.pushed += report.applied;
        self.rebased += report.rebased;
        self.stale += report.stale;
        self.rejected += report.rejected;
        self.timed_out += report.timed_out;
        self.conflicts += report.ties + report.rejected + report.timed_out;
        self.resolved += report.resolutions.len();
    }

    fn add_pull(&mut self, report: &PullReport) {
        self.pulled += report.applied;
        self.tombstoned += report.tombstoned;
        self.conflicts += report.ties;
        self.resolved += report.resolutions.len();
    }
}

/// Status surfaced to the point-of-sale UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusView {
    pub pending_count: usize,
    pub conflict_count: usize,
    pub last_sync_at: Option<Timestamp>,
    pub state: SyncPhase,
    pub online: bool,
    /// Consecutive failed cycles
    pub failures: u32,
}

/// Drives sync cycles for one tenant.
pub struct Orchestrator<R: Remote> {
    tenant_id: String,
    store: Arc<Store>,
    remote: Arc<R>,
    connectivity: Connectivity,
    settings: SyncSettings,
    /// Held for the whole cycle
    cycle_lock: Mutex<Backoff>,
    /// Mirror of the backoff's failure streak, readable without the lock
    failures: AtomicU32,
    phase: watch::Sender<SyncPhase>,
    cancel: watch::Sender<u64>,
}

impl<R: Remote> Orchestrator<R> {
    pub fn new(
        tenant_id: impl Into<String>,
        store: Arc<Store>,
        remote: Arc<R>,
        connectivity: Connectivity,
        settings: SyncSettings,
    ) -> Self {
        let backoff = Backoff::new(settings.backoff);
        Self {
            tenant_id: tenant_id.into(),
            store,
            remote,
            connectivity,
            settings,
            cycle_lock: Mutex::new(backoff),
            failures: AtomicU32::new(0),
            phase: watch::channel(SyncPhase::Idle).0,
            cancel: watch::channel(0).0,
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn phase(&self) -> SyncPhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<SyncPhase> {
        self.phase.subscribe()
    }

    /// Abandon the cycle in flight, if any.
    pub fn cancel(&self) {
        self.cancel.send_modify(|generation| *generation += 1);
    }

    pub fn status(&self) -> Result<SyncStatusView> {
        let failures = self.failures.load(Ordering::Relaxed);
        let SyncSummary {
            pending_count,
            conflict_count,
            last_sync_at,
        } = self.store.with(|r| r.summary(&self.tenant_id))?;

        Ok(SyncStatusView {
            pending_count,
            conflict_count,
            last_sync_at,
            state: self.phase(),
            online: self.connectivity.is_online(),
            failures,
        })
    }

    /// Run one full cycle now, waiting for a running one to finish first.
    pub async fn sync_now(&self) -> Result<CycleReport> {
        let mut backoff = self.cycle_lock.lock().await;

        if !self.connectivity.is_online() {
            return Err(SyncError::TransientNetwork("device is offline".to_string()));
        }

        let cancel_rx = self.cancel.subscribe();
        let online_rx = self.connectivity.subscribe();
        let result = tokio::select! {
            result = self.cycle() => result,
            _ = interrupted(cancel_rx, online_rx) => Err(SyncError::Cancelled),
        };
        self.phase.send_replace(SyncPhase::Idle);

        match &result {
            Ok(report) => {
                backoff.reset();
                tracing::info!(
                    tenant = %self.tenant_id,
                    cycle = report.cycle,
                    pushed = report.pushed,
                    pulled = report.pulled,
                    conflicts = report.conflicts,
                    "sync cycle complete"
                );
            }
            Err(SyncError::Cancelled) => {
                tracing::info!(tenant = %self.tenant_id, "sync cycle cancelled");
            }
            Err(e) if e.is_transient() => {
                let delay = backoff.on_failure();
                tracing::warn!(
                    tenant = %self.tenant_id,
                    error = %e,
                    failures = backoff.failures(),
                    retry_in_ms = delay.as_millis() as u64,
                    "sync cycle failed"
                );
            }
            Err(e) => {
                tracing::error!(tenant = %self.tenant_id, error = %e, "sync cycle aborted");
            }
        }

        self.failures.store(backoff.failures(), Ordering::Relaxed);

        // A cancelled or failed cycle may still have applied acknowledged
        // work in memory.
        self.store.persist().await?;
        result
    }

    async fn cycle(&self) -> Result<CycleReport> {
        let cycle = self.store.with(|r| r.begin_cycle(&self.tenant_id))?;
        let mut report = CycleReport {
            cycle,
            ..CycleReport::default()
        };

        self.phase.send_replace(SyncPhase::Pushing);
        self.push_phase(&mut report).await?;

        self.phase.send_replace(SyncPhase::Pulling);
        self.pull_phase(&mut report).await?;

        let now = self.store.now();
        let retention = self.settings.tombstone_retention.as_millis() as Timestamp;
        report.purged = self.store.apply(|r| {
            r.mark_synced_at(&self.tenant_id, now);
            r.purge_tombstones(&self.tenant_id, now.saturating_sub(retention))
        })?;
        Ok(report)
    }

    async fn push_phase(&self, report: &mut CycleReport) -> Result<()> {
        let max_attempts = self.settings.backoff.max_attempts;

        for _ in 0..MAX_PUSH_ROUNDS {
            let batch = self
                .store
                .with(|r| r.prepare_push(&self.tenant_id, self.settings.batch_size))?;
            let Some(batch) = batch else {
                return Ok(());
            };

            tracing::debug!(tenant = %self.tenant_id, changes = batch.len(), "pushing batch");
            let response = match self.remote.push(&self.tenant_id, &batch.request()).await {
                Ok(response) => response,
                Err(e) if e.is_transient() => {
                    let now = self.store.now();
                    let failed = self
                        .store
                        .apply(|r| r.record_push_failure(&batch, max_attempts, now))?;
                    report.add_push(&failed);
                    self.store.persist().await?;
                    return Err(e);
                }
                Err(e) => return Err(e),
            };

            let now = self.store.now();
            let push = self
                .store
                .apply(|r| r.apply_push_response(&batch, &response, max_attempts, now))?;
            self.store.persist().await?;
            self.log_resolutions(&push.resolutions);
            report.add_push(&push);

            if push.has_failures() {
                return Err(SyncError::TransientNetwork(format!(
                    "{} changes got no result",
                    push.retried
                )));
            }
        }

        tracing::warn!(tenant = %self.tenant_id, "push round limit reached, continuing next cycle");
        Ok(())
    }

    async fn pull_phase(&self, report: &mut CycleReport) -> Result<()> {
        let tables = self.store.with(|r| r.tables())?;

        for table in tables {
            loop {
                let cursor = self
                    .store
                    .with(|r| r.state().get_cursor(&self.tenant_id, &table))?;
                let query = PullQuery {
                    table: table.clone(),
                    cursor,
                    limit: Some(self.settings.pull_limit),
                };
                let page = self.remote.pull(&self.tenant_id, &query).await?;

                let now = self.store.now();
                let pull = self
                    .store
                    .apply(|r| r.apply_pull_page(&self.tenant_id, &table, &page, now))?;
                self.store.persist().await?;
                self.log_resolutions(&pull.resolutions);
                report.add_pull(&pull);

                // A server that reports more but does not move the cursor
                // would spin forever.
                if !page.has_more || pull.cursor <= cursor {
                    break;
                }
            }
        }
        Ok(())
    }

    fn log_resolutions(&self, resolutions: &[ResolutionRecord]) {
        for resolution in resolutions {
            let winner = match resolution.winner {
                Winner::Local => "local",
                Winner::Remote => "remote",
            };
            tracing::info!(
                tenant = %resolution.tenant_id,
                table = %resolution.table,
                record_id = %resolution.record_id,
                winner,
                remote_deleted = resolution.remote_deleted,
                cycle = resolution.cycle,
                "conflict resolved automatically"
            );
            tracing::debug!(
                record_id = %resolution.record_id,
                local = ?resolution.local_payload,
                remote = ?resolution.remote_payload,
                "resolution payloads"
            );
        }
    }

    /// Delay before the next scheduled cycle.
    async fn next_delay(&self) -> Duration {
        let backoff = self.cycle_lock.lock().await;
        backoff
            .current_delay()
            .unwrap_or(self.settings.interval)
    }

    /// Scheduler loop: timer, reconnects and shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut online_rx = self.connectivity.subscribe();
        tracing::info!(tenant = %self.tenant_id, "sync loop started");

        if self.connectivity.is_online() {
            self.scheduled_cycle().await;
        }

        loop {
            let delay = self.next_delay().await;
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    if self.connectivity.is_online() {
                        self.scheduled_cycle().await;
                    }
                }
                changed = online_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let online = *online_rx.borrow_and_update();
                    if online {
                        tracing::info!(tenant = %self.tenant_id, "back online, syncing");
                        self.scheduled_cycle().await;
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!(tenant = %self.tenant_id, "sync loop stopped");
    }
}

impl<R: Remote> Orchestrator<R> {
    /// Cycle started by the loop. Outcomes are already logged by
    /// [`Orchestrator::sync_now`]; only a failed snapshot write is left.
    async fn scheduled_cycle(&self) {
        if let Err(SyncError::LocalStorage(e)) = self.sync_now().await {
            tracing::error!(tenant = %self.tenant_id, error = %e, "could not persist replica");
        }
    }
}

/// Resolves when the cycle must stop: a cancel request or loss of
/// connectivity.
async fn interrupted(mut cancel: watch::Receiver<u64>, mut online: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            changed = cancel.changed() => {
                if changed.is_ok() {
                    return;
                }
                std::future::pending::<()>().await;
            }
            changed = online.changed() => {
                if changed.is_err() {
                    std::future::pending::<()>().await;
                }
                if !*online.borrow_and_update() {
                    return;
                }
            }
        }
    }
}
