pub mod app_config;
pub mod database;
pub mod integration_repo;
pub mod order_repo;
pub mod route_repo;
pub mod snapshot_repo;

pub use database::DbClient;
pub use integration_repo::StoreIntegrationRepository;
pub use order_repo::StoreOrderRepository;
pub use route_repo::StoreRouteRepository;
pub use snapshot_repo::StoreSnapshotRepository;
