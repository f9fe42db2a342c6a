use axum::{
    extract::{Path, Query, State},
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::{location_stock, movement};
use crate::errors::ServiceError;
use crate::handlers::AppState;

const DEFAULT_HISTORY_LIMIT: u64 = 50;
const MAX_HISTORY_LIMIT: u64 = 500;

#[derive(Debug, Deserialize)]
pub struct MinimumStockBody {
    pub minimum_stock: i32,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u64>,
}

async fn get_stock_level(
    State(state): State<Arc<AppState>>,
    Path((product_id, location_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<location_stock::Model>, ServiceError> {
    let level = state.engine.stock_level(product_id, location_id).await?;
    Ok(Json(level))
}

async fn set_minimum_stock(
    State(state): State<Arc<AppState>>,
    Path((product_id, location_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<MinimumStockBody>,
) -> Result<Json<location_stock::Model>, ServiceError> {
    let level = state
        .engine
        .ledger
        .set_minimum_stock(product_id, location_id, body.minimum_stock)
        .await?;
    Ok(Json(level))
}

async fn movement_history(
    State(state): State<Arc<AppState>>,
    Path((product_id, location_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<movement::Model>>, ServiceError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    let history = state
        .engine
        .ledger
        .movement_history(product_id, location_id, limit)
        .await?;
    Ok(Json(history))
}

async fn low_stock_alerts(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<location_stock::Model>>, ServiceError> {
    Ok(Json(state.engine.ledger.list_low_stock().await?))
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/stock/:product_id/:location_id", get(get_stock_level))
        .route(
            "/stock/:product_id/:location_id/minimum",
            put(set_minimum_stock),
        )
        .route(
            "/stock/:product_id/:location_id/movements",
            get(movement_history),
        )
        .route("/alerts/low-stock", get(low_stock_alerts))
}
