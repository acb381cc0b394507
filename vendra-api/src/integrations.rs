use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use uuid::Uuid;

use vendra_core::NormalizedProduct;

use crate::error::AppError;
use crate::state::AppState;

/// Balance readback. `balance` is null whenever the last fetch failed so a
/// broken provider is shown as "could not fetch", never as zero.
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub integration_id: Uuid,
    pub balance: Option<f64>,
    pub error: Option<String>,
    pub message: Option<String>,
    pub refreshed_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
pub struct CatalogResponse {
    pub integration_id: Uuid,
    pub products: Vec<NormalizedProduct>,
    pub error: Option<String>,
    pub refreshed_at: chrono::DateTime<chrono::Utc>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/integrations/{id}/balance", get(get_balance))
        .route("/v1/integrations/{id}/catalog", get(get_catalog))
}

async fn get_balance(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<BalanceResponse>, AppError> {
    let snapshot = state
        .snapshots
        .get_balance(id)
        .await
        .map_err(|err| AppError::InternalServerError(err.to_string()))?
        .ok_or_else(|| AppError::NotFoundError(format!("No balance snapshot for {}", id)))?;

    Ok(Json(BalanceResponse {
        integration_id: snapshot.integration_id,
        balance: snapshot.is_fresh().then_some(snapshot.balance),
        error: snapshot.error,
        message: snapshot.message,
        refreshed_at: snapshot.refreshed_at,
    }))
}

async fn get_catalog(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CatalogResponse>, AppError> {
    let snapshot = state
        .snapshots
        .get_catalog(id)
        .await
        .map_err(|err| AppError::InternalServerError(err.to_string()))?
        .ok_or_else(|| AppError::NotFoundError(format!("No catalog snapshot for {}", id)))?;

    Ok(Json(CatalogResponse {
        integration_id: snapshot.integration_id,
        products: snapshot.products,
        error: snapshot.error,
        refreshed_at: snapshot.refreshed_at,
    }))
}
