use std::sync::Arc;
use std::time::Duration;
use tillsync_client::{
    probe_loop, router, AgentState, Config, Connectivity, HttpRemote, Remote, SnapshotFile,
    Store, SyncRegistry,
};
use tillsync_engine::SystemClock;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const PROBE_INTERVAL: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tillsync_agent=debug,tillsync_client=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!(
        server = %config.server_url,
        tenants = config.tenant_ids.len(),
        data_dir = %config.data_dir.display(),
        "Starting Tillsync agent"
    );

    let store = Arc::new(
        Store::open(
            config.schema.clone(),
            SnapshotFile::new(config.snapshot_path()),
            Arc::new(SystemClock),
        )
        .await?,
    );

    let remote = Arc::new(HttpRemote::new(
        config.server_url.clone(),
        config.auth_token.clone(),
        config.sync.request_timeout,
    )?);

    let connectivity = Connectivity::new(remote.is_reachable().await);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let probe = tokio::spawn(probe_loop(
        remote.clone(),
        connectivity.clone(),
        PROBE_INTERVAL,
        shutdown_rx.clone(),
    ));

    let registry = Arc::new(SyncRegistry::new(
        store.clone(),
        remote,
        connectivity,
        config.sync.clone(),
    ));
    for tenant_id in &config.tenant_ids {
        registry.start(tenant_id);
    }

    let listener = tokio::net::TcpListener::bind(&config.status_addr).await?;
    tracing::info!("Status surface listening on {}", config.status_addr);

    let app = router(AgentState {
        registry: registry.clone(),
    });
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    registry.stop_all();
    let _ = probe.await;
    store.persist().await?;

    Ok(())
}
