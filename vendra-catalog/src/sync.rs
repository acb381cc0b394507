use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use vendra_core::repository::IntegrationRepository;
use vendra_core::{DriverLookup, IntegrationConfig};

use crate::snapshot::{BalanceSnapshot, CatalogSnapshot, SnapshotStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced,
    /// A run for this integration was already in flight.
    Skipped,
    Failed,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub synced: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Periodic best-effort refresh of balance and catalog snapshots. Providers
/// are polled independently; one outage never blocks the others, and two
/// runs for the same integration never overlap.
pub struct SyncService {
    integrations: Arc<dyn IntegrationRepository>,
    snapshots: Arc<dyn SnapshotStore>,
    drivers: Arc<dyn DriverLookup>,
    in_flight: Mutex<HashSet<Uuid>>,
}

impl SyncService {
    pub fn new(
        integrations: Arc<dyn IntegrationRepository>,
        snapshots: Arc<dyn SnapshotStore>,
        drivers: Arc<dyn DriverLookup>,
    ) -> Self {
        Self {
            integrations,
            snapshots,
            drivers,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// One pass over every enabled integration, concurrently.
    pub async fn sync_all(self: Arc<Self>) -> SyncReport {
        let integrations = match self.integrations.list_enabled().await {
            Ok(integrations) => integrations,
            Err(err) => {
                error!("sync pass aborted, integration list unavailable: {}", err);
                return SyncReport::default();
            }
        };

        let mut handles = Vec::with_capacity(integrations.len());
        for config in integrations {
            let service = Arc::clone(&self);
            handles.push(tokio::spawn(
                async move { service.sync_one(&config).await },
            ));
        }

        let mut report = SyncReport::default();
        for handle in handles {
            match handle.await {
                Ok(SyncOutcome::Synced) => report.synced += 1,
                Ok(SyncOutcome::Skipped) => report.skipped += 1,
                Ok(SyncOutcome::Failed) => report.failed += 1,
                Err(err) => {
                    error!("sync task panicked: {}", err);
                    report.failed += 1;
                }
            }
        }
        info!(
            synced = report.synced,
            skipped = report.skipped,
            failed = report.failed,
            "sync pass finished"
        );
        report
    }

    /// Refresh one integration's snapshots.
    pub async fn sync_one(&self, config: &IntegrationConfig) -> SyncOutcome {
        {
            let mut in_flight = self.in_flight.lock().await;
            if !in_flight.insert(config.id) {
                warn!(integration = %config.id, "sync already running, skipping");
                return SyncOutcome::Skipped;
            }
        }

        let outcome = self.refresh(config).await;

        self.in_flight.lock().await.remove(&config.id);
        outcome
    }

    async fn refresh(&self, config: &IntegrationConfig) -> SyncOutcome {
        let Some(driver) = self.drivers.driver_for(config.kind) else {
            error!(integration = %config.id, kind = config.kind.as_str(), "no driver registered");
            return SyncOutcome::Failed;
        };

        let balance = driver.get_balance(config).await;
        let balance_snapshot = BalanceSnapshot::from_result(config.id, &balance);
        let balance_failed = !balance_snapshot.is_fresh();
        if let Err(err) = self.snapshots.put_balance(&balance_snapshot).await {
            error!(integration = %config.id, "balance snapshot write failed: {}", err);
            return SyncOutcome::Failed;
        }

        let products = driver.list_products(config).await;
        // list_products swallows fetch errors into an empty list by contract;
        // the balance probe from the same run stands in as the integration's
        // health signal so an outage is not recorded as an empty catalog.
        let catalog_error = if products.is_empty() && balance_failed {
            balance_snapshot.error.clone()
        } else {
            None
        };
        let catalog_snapshot = CatalogSnapshot {
            integration_id: config.id,
            products,
            error: catalog_error,
            refreshed_at: Utc::now(),
        };
        if let Err(err) = self.snapshots.put_catalog(&catalog_snapshot).await {
            error!(integration = %config.id, "catalog snapshot write failed: {}", err);
            return SyncOutcome::Failed;
        }

        if balance_failed {
            SyncOutcome::Failed
        } else {
            SyncOutcome::Synced
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use vendra_core::{
        BalanceResult, Credential, ExternalStatus, NormalizedProduct, OrderPayload,
        ProviderDriver, ProviderErrorKind, ProviderKind, StatusResult, SubmitResult,
    };
    use vendra_shared::Masked;

    struct MemIntegrations {
        configs: Vec<IntegrationConfig>,
    }

    #[async_trait]
    impl IntegrationRepository for MemIntegrations {
        async fn get_integration(
            &self,
            id: Uuid,
        ) -> Result<Option<IntegrationConfig>, Box<dyn std::error::Error + Send + Sync>> {
            Ok(self.configs.iter().find(|c| c.id == id).cloned())
        }

        async fn list_enabled(
            &self,
        ) -> Result<Vec<IntegrationConfig>, Box<dyn std::error::Error + Send + Sync>> {
            Ok(self.configs.iter().filter(|c| c.enabled).cloned().collect())
        }
    }

    #[derive(Default)]
    struct MemSnapshots {
        balances: StdMutex<HashMap<Uuid, BalanceSnapshot>>,
        catalogs: StdMutex<HashMap<Uuid, CatalogSnapshot>>,
    }

    #[async_trait]
    impl SnapshotStore for MemSnapshots {
        async fn put_balance(
            &self,
            snapshot: &BalanceSnapshot,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.balances
                .lock()
                .unwrap()
                .insert(snapshot.integration_id, snapshot.clone());
            Ok(())
        }

        async fn put_catalog(
            &self,
            snapshot: &CatalogSnapshot,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.catalogs
                .lock()
                .unwrap()
                .insert(snapshot.integration_id, snapshot.clone());
            Ok(())
        }

        async fn get_balance(
            &self,
            integration_id: Uuid,
        ) -> Result<Option<BalanceSnapshot>, Box<dyn std::error::Error + Send + Sync>> {
            Ok(self.balances.lock().unwrap().get(&integration_id).cloned())
        }

        async fn get_catalog(
            &self,
            integration_id: Uuid,
        ) -> Result<Option<CatalogSnapshot>, Box<dyn std::error::Error + Send + Sync>> {
            Ok(self.catalogs.lock().unwrap().get(&integration_id).cloned())
        }
    }

    /// Driver whose balance answer depends on the integration's base_url.
    struct ScriptedDriver;

    #[async_trait]
    impl ProviderDriver for ScriptedDriver {
        async fn get_balance(&self, config: &IntegrationConfig) -> BalanceResult {
            if config.base_url.contains("down") {
                BalanceResult::failed(ProviderErrorKind::Remote5xx, "HTTP 502", Some(502))
            } else {
                BalanceResult::ok(150.0)
            }
        }

        async fn list_products(&self, config: &IntegrationConfig) -> Vec<NormalizedProduct> {
            if config.base_url.contains("down") {
                Vec::new()
            } else {
                vec![NormalizedProduct {
                    external_id: "p1".to_string(),
                    name: "Pack".to_string(),
                    price: 2.5,
                    currency: None,
                    available: true,
                }]
            }
        }

        async fn submit_order(&self, _: &IntegrationConfig, _: &OrderPayload) -> SubmitResult {
            SubmitResult::accepted("x".to_string(), ExternalStatus::Sent)
        }

        async fn check_order_status(&self, _: &IntegrationConfig, _: &str) -> StatusResult {
            StatusResult {
                external_status: ExternalStatus::Unknown,
                external_order_id: None,
                message: None,
            }
        }
    }

    struct ScriptedLookup;

    impl DriverLookup for ScriptedLookup {
        fn driver_for(&self, _: ProviderKind) -> Option<Arc<dyn ProviderDriver>> {
            Some(Arc::new(ScriptedDriver))
        }
    }

    fn config_with_url(url: &str) -> IntegrationConfig {
        IntegrationConfig::new(
            Uuid::new_v4(),
            ProviderKind::PinDeck,
            url.to_string(),
            Credential::Token {
                token: Masked("tok".to_string()),
            },
        )
    }

    #[tokio::test]
    async fn test_one_failing_provider_does_not_block_the_rest() {
        let healthy = config_with_url("https://up.example.com");
        let broken = config_with_url("https://down.example.com");
        let healthy_id = healthy.id;
        let broken_id = broken.id;

        let snapshots = Arc::new(MemSnapshots::default());
        let service = Arc::new(SyncService::new(
            Arc::new(MemIntegrations {
                configs: vec![healthy, broken],
            }),
            snapshots.clone(),
            Arc::new(ScriptedLookup),
        ));

        let report = service.clone().sync_all().await;
        assert_eq!(report.synced, 1);
        assert_eq!(report.failed, 1);

        let fresh = snapshots.get_balance(healthy_id).await.unwrap().unwrap();
        assert!(fresh.is_fresh());
        assert_eq!(fresh.balance, 150.0);

        let stale = snapshots.get_balance(broken_id).await.unwrap().unwrap();
        assert_eq!(stale.error.as_deref(), Some("REMOTE_5XX"));

        // The broken integration's empty catalog is marked as a failed fetch,
        // not an empty offering.
        let catalog = snapshots.get_catalog(broken_id).await.unwrap().unwrap();
        assert!(catalog.products.is_empty());
        assert!(catalog.error.is_some());

        let catalog = snapshots.get_catalog(healthy_id).await.unwrap().unwrap();
        assert_eq!(catalog.products.len(), 1);
        assert!(catalog.error.is_none());
    }

    #[tokio::test]
    async fn test_overlapping_run_is_skipped() {
        let config = config_with_url("https://up.example.com");
        let service = Arc::new(SyncService::new(
            Arc::new(MemIntegrations {
                configs: vec![config.clone()],
            }),
            Arc::new(MemSnapshots::default()),
            Arc::new(ScriptedLookup),
        ));

        service.in_flight.lock().await.insert(config.id);
        assert_eq!(service.sync_one(&config).await, SyncOutcome::Skipped);

        service.in_flight.lock().await.remove(&config.id);
        assert_eq!(service.sync_one(&config).await, SyncOutcome::Synced);
    }
}
