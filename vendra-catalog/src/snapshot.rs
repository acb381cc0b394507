use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use vendra_core::{BalanceResult, NormalizedProduct};

/// Last known provider balance for one integration. Overwritten on every
/// successful sync pass; `error` is set when the fetch failed so a real zero
/// balance and "could not fetch" are never the same row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub integration_id: Uuid,
    pub balance: f64,
    pub error: Option<String>,
    pub message: Option<String>,
    pub refreshed_at: DateTime<Utc>,
}

impl BalanceSnapshot {
    pub fn from_result(integration_id: Uuid, result: &BalanceResult) -> Self {
        Self {
            integration_id,
            balance: if result.is_ok() { result.balance } else { 0.0 },
            error: result.error.as_ref().map(|kind| kind.to_string()),
            message: result.message.clone(),
            refreshed_at: Utc::now(),
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.error.is_none()
    }
}

/// Last known provider catalog for one integration. An empty product list
/// with `error` set means the fetch failed; an empty list without an error
/// means the provider genuinely offers nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub integration_id: Uuid,
    pub products: Vec<NormalizedProduct>,
    pub error: Option<String>,
    pub refreshed_at: DateTime<Utc>,
}

/// Storage seam for sync snapshots. Read by the admin surface, written only
/// by the sync service.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn put_balance(
        &self,
        snapshot: &BalanceSnapshot,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    async fn put_catalog(
        &self,
        snapshot: &CatalogSnapshot,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    async fn get_balance(
        &self,
        integration_id: Uuid,
    ) -> Result<Option<BalanceSnapshot>, Box<dyn std::error::Error + Send + Sync>>;

    async fn get_catalog(
        &self,
        integration_id: Uuid,
    ) -> Result<Option<CatalogSnapshot>, Box<dyn std::error::Error + Send + Sync>>;
}
