use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::driver::ExternalStatus;
use crate::integration::IntegrationConfig;
use crate::order::{FxSnapshot, NewOrder, Order, PackageRoute};

/// State transition applied to an order's dispatch fields. `external_order_id`
/// is only written when `Some` (a later failure never erases the id a
/// provider already assigned); `next_attempt_at` always overwrites, with
/// `None` clearing any pending retry.
#[derive(Debug, Clone, Default)]
pub struct DispatchUpdate {
    pub external_status: Option<ExternalStatus>,
    pub external_order_id: Option<String>,
    pub message: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Operator re-drive zeroes the counter so the retry budget starts over.
    pub reset_attempts: bool,
}

/// Repository trait for order dispatch state. The dispatch engine is the only
/// writer of these fields.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Create an order, honoring the idempotency key: when the key is present
    /// and a (tenant, requester, key) order already exists, the existing
    /// order is returned and nothing is created.
    async fn create_order(
        &self,
        order: &NewOrder,
    ) -> Result<Order, Box<dyn std::error::Error + Send + Sync>>;

    async fn get_order(
        &self,
        id: Uuid,
    ) -> Result<Option<Order>, Box<dyn std::error::Error + Send + Sync>>;

    async fn find_by_idempotency_key(
        &self,
        tenant_id: Uuid,
        requester_id: Uuid,
        key: Uuid,
    ) -> Result<Option<Order>, Box<dyn std::error::Error + Send + Sync>>;

    /// Increment the attempt counter and record the adapter's message. Called
    /// for every external call, success or failure.
    async fn record_attempt(
        &self,
        id: Uuid,
        message: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    async fn update_dispatch_state(
        &self,
        id: Uuid,
        update: DispatchUpdate,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Write the frozen economics exactly once. Returns `false` without
    /// touching the row when it is already locked.
    async fn freeze_fx(
        &self,
        id: Uuid,
        snapshot: &FxSnapshot,
    ) -> Result<bool, Box<dyn std::error::Error + Send + Sync>>;

    /// Orders whose `next_attempt_at` has come due, oldest first.
    async fn list_due_for_dispatch(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Order>, Box<dyn std::error::Error + Send + Sync>>;
}

/// Repository trait for package routes. Owned by admin catalog management;
/// the resolver re-reads on every dispatch attempt.
#[async_trait]
pub trait RouteRepository: Send + Sync {
    async fn find_route(
        &self,
        tenant_id: Uuid,
        package_id: Uuid,
    ) -> Result<Option<PackageRoute>, Box<dyn std::error::Error + Send + Sync>>;

    /// Create or replace the route for (tenant, package). A second route for
    /// the same pair replaces the first, it never duplicates it.
    async fn upsert_route(
        &self,
        route: &PackageRoute,
    ) -> Result<PackageRoute, Box<dyn std::error::Error + Send + Sync>>;

    async fn delete_route(
        &self,
        tenant_id: Uuid,
        package_id: Uuid,
    ) -> Result<bool, Box<dyn std::error::Error + Send + Sync>>;
}

/// Repository trait for integration configs, read-only from this side.
#[async_trait]
pub trait IntegrationRepository: Send + Sync {
    async fn get_integration(
        &self,
        id: Uuid,
    ) -> Result<Option<IntegrationConfig>, Box<dyn std::error::Error + Send + Sync>>;

    async fn list_enabled(
        &self,
    ) -> Result<Vec<IntegrationConfig>, Box<dyn std::error::Error + Send + Sync>>;
}
