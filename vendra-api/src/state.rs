use std::sync::Arc;

use vendra_catalog::{SnapshotStore, SyncService};
use vendra_core::repository::OrderRepository;
use vendra_dispatch::DispatchEngine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DispatchEngine>,
    pub orders: Arc<dyn OrderRepository>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub sync: Arc<SyncService>,
}
