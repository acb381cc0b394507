use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vendra_api::{app, AppState};
use vendra_catalog::SyncService;
use vendra_dispatch::{DispatchEngine, FixedRateSource, RetryPolicy};
use vendra_providers::DriverRegistry;
use vendra_store::{
    DbClient, StoreIntegrationRepository, StoreOrderRepository, StoreRouteRepository,
    StoreSnapshotRepository,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vendra_api=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = vendra_store::app_config::Config::load().expect("Failed to load config");
    tracing::info!("Starting Vendra API on port {}", config.server.port);

    let db = DbClient::new(&config.database.url)
        .await
        .expect("Failed to connect to Postgres");
    db.migrate().await.expect("Failed to run migrations");

    let orders = Arc::new(StoreOrderRepository::new(db.pool.clone()));
    let routes = Arc::new(StoreRouteRepository::new(db.pool.clone()));
    let integrations = Arc::new(StoreIntegrationRepository::new(db.pool.clone()));
    let snapshots = Arc::new(StoreSnapshotRepository::new(db.pool.clone()));

    let registry = Arc::new(DriverRegistry::with_defaults());

    let policy = RetryPolicy {
        max_attempts: config.dispatch.max_attempts,
        base_delay: Duration::from_secs(config.dispatch.base_delay_seconds),
        max_delay: Duration::from_secs(config.dispatch.max_delay_seconds),
    };
    let engine = Arc::new(DispatchEngine::new(
        orders.clone(),
        integrations.clone(),
        routes.clone(),
        registry.clone(),
        Arc::new(FixedRateSource(config.dispatch.fx_rate)),
        policy,
    ));

    let sync = Arc::new(SyncService::new(
        integrations.clone(),
        snapshots.clone(),
        registry.clone(),
    ));

    // Background workers: retry pump and snapshot sync.
    tokio::spawn(vendra_api::worker::start_retry_pump(
        engine.clone(),
        Duration::from_secs(config.dispatch.pump_interval_seconds),
        config.dispatch.pump_batch_size,
    ));
    tokio::spawn(vendra_api::worker::start_sync_scheduler(
        sync.clone(),
        Duration::from_secs(config.sync.interval_seconds),
    ));

    let app_state = AppState {
        engine,
        orders,
        snapshots,
        sync,
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
