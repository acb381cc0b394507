use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use vendra_api::{app, AppState};
use vendra_catalog::{BalanceSnapshot, CatalogSnapshot, SnapshotStore, SyncService};
use vendra_core::repository::{
    DispatchUpdate, IntegrationRepository, OrderRepository, RouteRepository,
};
use vendra_core::{
    BalanceResult, Credential, DriverLookup, ExternalStatus, FxSnapshot, IntegrationConfig,
    NewOrder, NormalizedProduct, Order, OrderPayload, PackageRoute, ProviderDriver, ProviderKind,
    StatusResult, SubmitResult,
};
use vendra_dispatch::{DispatchEngine, FixedRateSource, RetryPolicy};
use vendra_shared::Masked;

// ----------------------------------------------------------------------
// In-memory fixtures standing in for Postgres and the network
// ----------------------------------------------------------------------

#[derive(Default)]
struct MemOrders {
    orders: Mutex<HashMap<Uuid, Order>>,
}

#[async_trait]
impl OrderRepository for MemOrders {
    async fn create_order(
        &self,
        new: &NewOrder,
    ) -> Result<Order, Box<dyn std::error::Error + Send + Sync>> {
        let mut orders = self.orders.lock().unwrap();
        if let Some(key) = new.idempotency_key {
            if let Some(existing) = orders.values().find(|o| {
                o.tenant_id == new.tenant_id
                    && o.requester_id == new.requester_id
                    && o.idempotency_key == Some(key)
            }) {
                return Ok(existing.clone());
            }
        }
        let order = Order::from_new(new);
        orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn get_order(
        &self,
        id: Uuid,
    ) -> Result<Option<Order>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.orders.lock().unwrap().get(&id).cloned())
    }

    async fn find_by_idempotency_key(
        &self,
        tenant_id: Uuid,
        requester_id: Uuid,
        key: Uuid,
    ) -> Result<Option<Order>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .values()
            .find(|o| {
                o.tenant_id == tenant_id
                    && o.requester_id == requester_id
                    && o.idempotency_key == Some(key)
            })
            .cloned())
    }

    async fn record_attempt(
        &self,
        id: Uuid,
        message: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut orders = self.orders.lock().unwrap();
        let order = orders.get_mut(&id).ok_or("order not found")?;
        order.attempts += 1;
        order.last_message = Some(message.to_string());
        Ok(())
    }

    async fn update_dispatch_state(
        &self,
        id: Uuid,
        update: DispatchUpdate,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut orders = self.orders.lock().unwrap();
        let order = orders.get_mut(&id).ok_or("order not found")?;
        if let Some(status) = update.external_status {
            order.external_status = status;
        }
        if update.external_order_id.is_some() {
            order.external_order_id = update.external_order_id;
        }
        if update.message.is_some() {
            order.last_message = update.message;
        }
        if update.sent_at.is_some() {
            order.sent_at = update.sent_at;
        }
        if update.completed_at.is_some() {
            order.completed_at = update.completed_at;
        }
        order.next_attempt_at = update.next_attempt_at;
        if update.reset_attempts {
            order.attempts = 0;
        }
        Ok(())
    }

    async fn freeze_fx(
        &self,
        id: Uuid,
        snapshot: &FxSnapshot,
    ) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        let mut orders = self.orders.lock().unwrap();
        let order = orders.get_mut(&id).ok_or("order not found")?;
        if order.fx_locked {
            return Ok(false);
        }
        order.fx_rate = Some(snapshot.fx_rate);
        order.cost_amount = Some(snapshot.cost_amount);
        order.sell_amount = Some(snapshot.sell_amount);
        order.profit_amount = Some(snapshot.profit_amount);
        order.fx_locked = true;
        Ok(true)
    }

    async fn list_due_for_dispatch(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Order>, Box<dyn std::error::Error + Send + Sync>> {
        let orders = self.orders.lock().unwrap();
        let mut due: Vec<Order> = orders
            .values()
            .filter(|o| {
                !o.external_status.is_terminal()
                    && o.next_attempt_at.map(|at| at <= now).unwrap_or(false)
            })
            .cloned()
            .collect();
        due.truncate(limit as usize);
        Ok(due)
    }
}

#[derive(Default)]
struct MemRoutes {
    routes: Mutex<HashMap<(Uuid, Uuid), PackageRoute>>,
}

#[async_trait]
impl RouteRepository for MemRoutes {
    async fn find_route(
        &self,
        tenant_id: Uuid,
        package_id: Uuid,
    ) -> Result<Option<PackageRoute>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self
            .routes
            .lock()
            .unwrap()
            .get(&(tenant_id, package_id))
            .cloned())
    }

    async fn upsert_route(
        &self,
        route: &PackageRoute,
    ) -> Result<PackageRoute, Box<dyn std::error::Error + Send + Sync>> {
        self.routes
            .lock()
            .unwrap()
            .insert((route.tenant_id, route.package_id), route.clone());
        Ok(route.clone())
    }

    async fn delete_route(
        &self,
        tenant_id: Uuid,
        package_id: Uuid,
    ) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self
            .routes
            .lock()
            .unwrap()
            .remove(&(tenant_id, package_id))
            .is_some())
    }
}

#[derive(Default)]
struct MemIntegrations {
    configs: Mutex<HashMap<Uuid, IntegrationConfig>>,
}

#[async_trait]
impl IntegrationRepository for MemIntegrations {
    async fn get_integration(
        &self,
        id: Uuid,
    ) -> Result<Option<IntegrationConfig>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.configs.lock().unwrap().get(&id).cloned())
    }

    async fn list_enabled(
        &self,
    ) -> Result<Vec<IntegrationConfig>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self
            .configs
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.enabled)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct MemSnapshots {
    balances: Mutex<HashMap<Uuid, BalanceSnapshot>>,
    catalogs: Mutex<HashMap<Uuid, CatalogSnapshot>>,
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

/// Always accepts; counts submissions.
#[derive(Default)]
struct AcceptingDriver {
    submits: Mutex<usize>,
}

#[async_trait]
impl ProviderDriver for AcceptingDriver {
    async fn get_balance(&self, _: &IntegrationConfig) -> BalanceResult {
        BalanceResult::ok(75.0)
    }

    async fn list_products(&self, _: &IntegrationConfig) -> Vec<NormalizedProduct> {
        Vec::new()
    }

    async fn submit_order(&self, _: &IntegrationConfig, _: &OrderPayload) -> SubmitResult {
        *self.submits.lock().unwrap() += 1;
        SubmitResult::accepted("EXT-42".to_string(), ExternalStatus::Sent)
    }

    async fn check_order_status(&self, _: &IntegrationConfig, _: &str) -> StatusResult {
        StatusResult {
            external_status: ExternalStatus::Sent,
            external_order_id: None,
            message: None,
        }
    }
}

struct SingleLookup(Arc<AcceptingDriver>);

impl DriverLookup for SingleLookup {
    fn driver_for(&self, _: ProviderKind) -> Option<Arc<dyn ProviderDriver>> {
        Some(Arc::clone(&self.0) as Arc<dyn ProviderDriver>)
    }
}

struct Fixture {
    state: AppState,
    driver: Arc<AcceptingDriver>,
    snapshots: Arc<MemSnapshots>,
    tenant_id: Uuid,
    package_id: Uuid,
    integration_id: Uuid,
}

fn fixture() -> Fixture {
    let orders = Arc::new(MemOrders::default());
    let routes = Arc::new(MemRoutes::default());
    let integrations = Arc::new(MemIntegrations::default());
    let snapshots = Arc::new(MemSnapshots::default());
    let driver = Arc::new(AcceptingDriver::default());
    let lookup = Arc::new(SingleLookup(Arc::clone(&driver)));

    let tenant_id = Uuid::new_v4();
    let package_id = Uuid::new_v4();

    let config = IntegrationConfig::new(
        tenant_id,
        ProviderKind::PinDeck,
        "https://api.pindeck.example".to_string(),
        Credential::Token {
            token: Masked("tok".to_string()),
        },
    );
    let integration_id = config.id;
    integrations
        .configs
        .lock()
        .unwrap()
        .insert(config.id, config);
    routes.routes.lock().unwrap().insert(
        (tenant_id, package_id),
        PackageRoute::new(tenant_id, package_id, integration_id, "P-1".to_string()),
    );

    let engine = Arc::new(DispatchEngine::new(
        orders.clone(),
        integrations.clone(),
        routes.clone(),
        lookup.clone(),
        Arc::new(FixedRateSource(1.0)),
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        },
    ));
    let sync = Arc::new(SyncService::new(
        integrations.clone(),
        snapshots.clone(),
        lookup,
    ));

    Fixture {
        state: AppState {
            engine,
            orders,
            snapshots: snapshots.clone(),
            sync,
        },
        driver,
        snapshots,
        tenant_id,
        package_id,
        integration_id,
    }
}

async fn post_json(router: axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn get_json(router: axum::Router, uri: &str) -> (StatusCode, Value) {
    let response = router
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

// ----------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------

#[tokio::test]
async fn test_dispatch_and_readback() {
    let f = fixture();
    let router = app(f.state.clone());

    let request = json!({
        "tenant_id": f.tenant_id,
        "requester_id": Uuid::new_v4(),
        "package_id": f.package_id,
        "quantity": 1,
        "fields": {"target": "0812000111"},
        "base_cost": 900,
        "base_sell": 1100,
    });
    let (status, body) = post_json(router.clone(), "/v1/orders/dispatch", request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "SENT");
    assert_eq!(body["order"]["external_status"], "SENT");
    assert_eq!(body["order"]["external_order_id"], "EXT-42");
    assert_eq!(body["order"]["attempts"], 1);
    assert_eq!(body["order"]["fx_locked"], true);

    let order_id = body["order"]["id"].as_str().unwrap().to_string();
    let (status, body) = get_json(router, &format!("/v1/orders/{}", order_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["external_order_id"], "EXT-42");
}

#[tokio::test]
async fn test_redelivered_dispatch_request_is_idempotent() {
    let f = fixture();
    let router = app(f.state.clone());

    let request = json!({
        "tenant_id": f.tenant_id,
        "requester_id": Uuid::new_v4(),
        "package_id": f.package_id,
        "fields": {"target": "0812000111"},
        "order_uuid": Uuid::new_v4(),
        "base_cost": 900,
        "base_sell": 1100,
    });

    let (_, first) = post_json(router.clone(), "/v1/orders/dispatch", request.clone()).await;
    let (status, second) = post_json(router, "/v1/orders/dispatch", request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["outcome"], "ALREADY_SUBMITTED");
    assert_eq!(second["order"]["id"], first["order"]["id"]);
    assert_eq!(second["order"]["external_order_id"], "EXT-42");
    assert_eq!(*f.driver.submits.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_invalid_quantity_is_rejected() {
    let f = fixture();
    let router = app(f.state);

    let request = json!({
        "tenant_id": Uuid::new_v4(),
        "requester_id": Uuid::new_v4(),
        "package_id": Uuid::new_v4(),
        "quantity": 0,
        "base_cost": 1,
        "base_sell": 2,
    });
    let (status, body) = post_json(router, "/v1/orders/dispatch", request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("quantity"));
}

#[tokio::test]
async fn test_failed_balance_snapshot_reads_as_could_not_fetch() {
    let f = fixture();

    f.snapshots
        .put_balance(&BalanceSnapshot {
            integration_id: f.integration_id,
            balance: 0.0,
            error: Some("REMOTE_500".to_string()),
            message: Some("Unknown error".to_string()),
            refreshed_at: Utc::now(),
        })
        .await
        .unwrap();

    let router = app(f.state);
    let (status, body) = get_json(
        router,
        &format!("/v1/integrations/{}/balance", f.integration_id),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    // Never a bare zero: the balance is absent and the error is shown.
    assert!(body["balance"].is_null());
    assert_eq!(body["error"], "REMOTE_500");
}

#[tokio::test]
async fn test_sync_pass_populates_snapshots() {
    let f = fixture();
    f.state.sync.clone().sync_all().await;

    let snapshot = f
        .snapshots
        .get_balance(f.integration_id)
        .await
        .unwrap()
        .expect("snapshot written");
    assert_eq!(snapshot.balance, 75.0);
    assert!(snapshot.error.is_none());
}

#[tokio::test]
async fn test_unknown_order_is_404() {
    let f = fixture();
    let router = app(f.state);
    let (status, _) = get_json(router, &format!("/v1/orders/{}", Uuid::new_v4())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
