use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use vendra_core::{NewOrder, Order};
use vendra_dispatch::{DispatchError, DispatchOutcome};

use crate::error::AppError;
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct DispatchOrderRequest {
    pub tenant_id: Uuid,
    pub requester_id: Uuid,
    pub package_id: Uuid,
    #[serde(default = "default_quantity")]
    pub quantity: i32,
    #[serde(default)]
    pub fields: serde_json::Value,
    /// Client-side idempotency key; replays return the original order.
    pub order_uuid: Option<Uuid>,
    pub base_cost: i64,
    pub base_sell: i64,
}

fn default_quantity() -> i32 {
    1
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub package_id: Uuid,
    pub quantity: i32,
    pub external_status: String,
    pub external_order_id: Option<String>,
    pub attempts: i32,
    pub last_message: Option<String>,
    pub sent_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub fx_locked: bool,
    pub fx_rate: Option<f64>,
    pub cost_amount: Option<i64>,
    pub sell_amount: Option<i64>,
    pub profit_amount: Option<i64>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id,
            tenant_id: order.tenant_id,
            package_id: order.package_id,
            quantity: order.quantity,
            external_status: order.external_status.as_str().to_string(),
            external_order_id: order.external_order_id,
            attempts: order.attempts,
            last_message: order.last_message,
            sent_at: order.sent_at,
            completed_at: order.completed_at,
            fx_locked: order.fx_locked,
            fx_rate: order.fx_rate,
            cost_amount: order.cost_amount,
            sell_amount: order.sell_amount,
            profit_amount: order.profit_amount,
            created_at: order.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DispatchResponse {
    pub outcome: String,
    pub order: OrderResponse,
}

fn outcome_label(outcome: &DispatchOutcome) -> &'static str {
    match outcome {
        DispatchOutcome::Delivered { .. } => "DELIVERED",
        DispatchOutcome::Sent { .. } => "SENT",
        DispatchOutcome::AlreadySubmitted { .. } => "ALREADY_SUBMITTED",
        DispatchOutcome::RetryScheduled { .. } => "RETRY_SCHEDULED",
        DispatchOutcome::AwaitingStatusCheck { .. } => "AWAITING_STATUS_CHECK",
        DispatchOutcome::Failed { .. } => "FAILED",
        DispatchOutcome::InFlight => "IN_FLIGHT",
    }
}

fn engine_error(err: DispatchError) -> AppError {
    match err {
        DispatchError::OrderNotFound(id) => AppError::NotFoundError(format!("Order not found: {}", id)),
        DispatchError::Storage(msg) => AppError::InternalServerError(msg),
    }
}

// ============================================================================
// Handlers
// ============================================================================

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/orders/dispatch", post(dispatch_order))
        .route("/v1/orders/{id}/dispatch", post(redrive_order))
        .route("/v1/orders/{id}", get(get_order))
}

/// Inbound "order approved for dispatch" call. Safe to redeliver: the
/// idempotency key guarantees at most one external order.
async fn dispatch_order(
    State(state): State<AppState>,
    Json(request): Json<DispatchOrderRequest>,
) -> Result<Json<DispatchResponse>, AppError> {
    if request.quantity < 1 {
        return Err(AppError::ValidationError(
            "quantity must be at least 1".to_string(),
        ));
    }

    let new = NewOrder {
        tenant_id: request.tenant_id,
        requester_id: request.requester_id,
        package_id: request.package_id,
        quantity: request.quantity,
        fields: request.fields,
        idempotency_key: request.order_uuid,
        base_cost: request.base_cost,
        base_sell: request.base_sell,
    };

    let (order, outcome) = state.engine.accept(&new).await.map_err(engine_error)?;
    Ok(Json(DispatchResponse {
        outcome: outcome_label(&outcome).to_string(),
        order: order.into(),
    }))
}

/// Operator re-drive of an existing order.
async fn redrive_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DispatchResponse>, AppError> {
    let outcome = state.engine.redrive(id).await.map_err(engine_error)?;
    let order = state
        .orders
        .get_order(id)
        .await
        .map_err(|err| AppError::InternalServerError(err.to_string()))?
        .ok_or_else(|| AppError::NotFoundError(format!("Order not found: {}", id)))?;
    Ok(Json(DispatchResponse {
        outcome: outcome_label(&outcome).to_string(),
        order: order.into(),
    }))
}

async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderResponse>, AppError> {
    let order = state
        .orders
        .get_order(id)
        .await
        .map_err(|err| AppError::InternalServerError(err.to_string()))?
        .ok_or_else(|| AppError::NotFoundError(format!("Order not found: {}", id)))?;
    Ok(Json(order.into()))
}
