//! Online/offline signal shared by the orchestrators.

use crate::remote::Remote;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Current connectivity plus change notifications.
#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Record a transition. Subscribers only wake when the value changes.
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Probe the server's health endpoint and publish what it says.
pub async fn probe_loop<R: Remote>(
    remote: Arc<R>,
    connectivity: Connectivity,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let online = remote.is_reachable().await;
                if online != connectivity.is_online() {
                    tracing::info!(online, "connectivity changed");
                }
                connectivity.set_online(online);
            }
            _ = shutdown.changed() => break,
        }
    }
}
