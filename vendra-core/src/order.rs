use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::driver::ExternalStatus;

/// An order as the dispatch core sees it: the internal package to fulfill,
/// the buyer's input parameters, and the full audit trail of delivery
/// attempts. Rows are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// The client (API consumer) that originated the order. Scopes the
    /// idempotency key together with the tenant.
    pub requester_id: Uuid,
    pub package_id: Uuid,
    pub quantity: i32,
    /// Buyer-supplied parameters (player id, zone, msisdn, ...), opaque to
    /// the engine and forwarded to the provider as-is.
    pub fields: Value,
    /// Caller-supplied idempotency key; unique per (tenant, requester) when
    /// present.
    pub idempotency_key: Option<Uuid>,
    pub external_order_id: Option<String>,
    pub external_status: ExternalStatus,
    pub attempts: i32,
    pub last_message: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Platform-currency amounts computed by pricing before approval.
    pub base_cost: i64,
    pub base_sell: i64,
    /// Frozen economics, set exactly once when the order enters dispatch.
    pub fx_rate: Option<f64>,
    pub cost_amount: Option<i64>,
    pub sell_amount: Option<i64>,
    pub profit_amount: Option<i64>,
    pub fx_locked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn from_new(new: &NewOrder) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id: new.tenant_id,
            requester_id: new.requester_id,
            package_id: new.package_id,
            quantity: new.quantity,
            fields: new.fields.clone(),
            idempotency_key: new.idempotency_key,
            external_order_id: None,
            external_status: ExternalStatus::NotSent,
            attempts: 0,
            last_message: None,
            sent_at: None,
            completed_at: None,
            next_attempt_at: None,
            base_cost: new.base_cost,
            base_sell: new.base_sell,
            fx_rate: None,
            cost_amount: None,
            sell_amount: None,
            profit_amount: None,
            fx_locked: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Creation payload for an approved order entering dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub tenant_id: Uuid,
    pub requester_id: Uuid,
    pub package_id: Uuid,
    pub quantity: i32,
    pub fields: Value,
    pub idempotency_key: Option<Uuid>,
    pub base_cost: i64,
    pub base_sell: i64,
}

/// Economics captured at the instant an order enters dispatch. Once a row is
/// locked with one of these, no later process may overwrite it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FxSnapshot {
    pub fx_rate: f64,
    pub cost_amount: i64,
    pub sell_amount: i64,
    pub profit_amount: i64,
}

impl FxSnapshot {
    /// Convert the order's platform-currency amounts at the given rate.
    pub fn capture(base_cost: i64, base_sell: i64, fx_rate: f64) -> Self {
        let cost_amount = (base_cost as f64 * fx_rate).round() as i64;
        let sell_amount = (base_sell as f64 * fx_rate).round() as i64;
        Self {
            fx_rate,
            cost_amount,
            sell_amount,
            profit_amount: sell_amount - cost_amount,
        }
    }
}

/// Mapping from an internal (tenant, package) pair to the provider and
/// external package that fulfills it. Exactly one active route per pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageRoute {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub package_id: Uuid,
    pub integration_id: Uuid,
    pub external_package_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PackageRoute {
    pub fn new(
        tenant_id: Uuid,
        package_id: Uuid,
        integration_id: Uuid,
        external_package_id: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            package_id,
            integration_id,
            external_package_id,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fx_capture_rounds_to_minor_units() {
        let snapshot = FxSnapshot::capture(1000, 1500, 1.337);
        assert_eq!(snapshot.cost_amount, 1337);
        assert_eq!(snapshot.sell_amount, 2006);
        assert_eq!(snapshot.profit_amount, 669);
    }

    #[test]
    fn test_new_order_starts_unsent_and_unlocked() {
        let new = NewOrder {
            tenant_id: Uuid::new_v4(),
            requester_id: Uuid::new_v4(),
            package_id: Uuid::new_v4(),
            quantity: 1,
            fields: serde_json::json!({"player_id": "44812"}),
            idempotency_key: Some(Uuid::new_v4()),
            base_cost: 900,
            base_sell: 1100,
        };
        let order = Order::from_new(&new);
        assert_eq!(order.external_status, ExternalStatus::NotSent);
        assert_eq!(order.attempts, 0);
        assert!(!order.fx_locked);
        assert!(order.external_order_id.is_none());
    }
}
