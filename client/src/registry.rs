//! Per-tenant sync loops, started and stopped with the tenant's session.

use crate::config::SyncSettings;
use crate::connectivity::Connectivity;
use crate::orchestrator::Orchestrator;
use crate::remote::Remote;
use crate::store::Store;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

struct TenantLoop<R: Remote> {
    orchestrator: Arc<Orchestrator<R>>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Map of tenant to running orchestrator.
pub struct SyncRegistry<R: Remote> {
    store: Arc<Store>,
    remote: Arc<R>,
    connectivity: Connectivity,
    settings: SyncSettings,
    loops: DashMap<String, TenantLoop<R>>,
}

impl<R: Remote> SyncRegistry<R> {
    pub fn new(
        store: Arc<Store>,
        remote: Arc<R>,
        connectivity: Connectivity,
        settings: SyncSettings,
    ) -> Self {
        Self {
            store,
            remote,
            connectivity,
            settings,
            loops: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    /// Start the tenant's loop, or return the one already running.
    pub fn start(&self, tenant_id: &str) -> Arc<Orchestrator<R>> {
        let entry = self.loops.entry(tenant_id.to_string()).or_insert_with(|| {
            let orchestrator = Arc::new(Orchestrator::new(
                tenant_id,
                self.store.clone(),
                self.remote.clone(),
                self.connectivity.clone(),
                self.settings.clone(),
            ));
            let (shutdown, shutdown_rx) = watch::channel(false);
            let task = tokio::spawn(orchestrator.clone().run(shutdown_rx));
            TenantLoop {
                orchestrator,
                shutdown,
                task,
            }
        });
        entry.orchestrator.clone()
    }

    /// Stop the tenant's loop; an in-flight cycle is cancelled.
    pub fn stop(&self, tenant_id: &str) -> bool {
        match self.loops.remove(tenant_id) {
            Some((_, tenant_loop)) => {
                Self::shut_down(tenant_loop);
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) {
        let tenants: Vec<String> = self.tenants();
        for tenant_id in tenants {
            self.stop(&tenant_id);
        }
    }

    pub fn get(&self, tenant_id: &str) -> Option<Arc<Orchestrator<R>>> {
        self.loops
            .get(tenant_id)
            .map(|entry| entry.orchestrator.clone())
    }

    pub fn tenants(&self) -> Vec<String> {
        let mut tenants: Vec<String> = self.loops.iter().map(|e| e.key().clone()).collect();
        tenants.sort();
        tenants
    }

    fn shut_down(tenant_loop: TenantLoop<R>) {
        tenant_loop.orchestrator.cancel();
        let _ = tenant_loop.shutdown.send(true);
        tracing::info!(tenant = tenant_loop.orchestrator.tenant_id(), "sync loop stopping");
        // The loop exits on its own once the cancelled cycle unwinds.
        drop(tenant_loop.task);
    }
}

impl<R: Remote> Drop for SyncRegistry<R> {
    fn drop(&mut self) {
        for entry in self.loops.iter() {
            entry.orchestrator.cancel();
            entry.task.abort();
        }
    }
}
