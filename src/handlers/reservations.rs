use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::stock_reservation;
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::stock_reservation::{ReservationReceipt, ReserveStock};

#[derive(Debug, Deserialize)]
pub struct ReserveBody {
    pub location_id: Uuid,
    pub quantity: i32,
    pub request_id: Uuid,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseQuery {
    pub request_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ReleaseResponse {
    pub product_id: Uuid,
    pub request_id: Uuid,
    pub released: u64,
}

async fn reserve_stock(
    State(state): State<Arc<AppState>>,
    Path(product_id): Path<Uuid>,
    Json(body): Json<ReserveBody>,
) -> Result<(StatusCode, Json<ReservationReceipt>), ServiceError> {
    let receipt = state
        .engine
        .reserve_stock(ReserveStock {
            product_id,
            location_id: body.location_id,
            quantity: body.quantity,
            request_id: body.request_id,
            reason: body.reason,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn release_reservation(
    State(state): State<Arc<AppState>>,
    Path(product_id): Path<Uuid>,
    Query(query): Query<ReleaseQuery>,
) -> Result<Json<ReleaseResponse>, ServiceError> {
    let released = state
        .engine
        .release_reservation(product_id, query.request_id)
        .await?;
    Ok(Json(ReleaseResponse {
        product_id,
        request_id: query.request_id,
        released,
    }))
}

async fn list_for_request(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<Uuid>,
) -> Result<Json<Vec<stock_reservation::Model>>, ServiceError> {
    Ok(Json(
        state
            .engine
            .reservations
            .list_for_request(request_id)
            .await?,
    ))
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/products/:id/reserve",
            post(reserve_stock).delete(release_reservation),
        )
        .route("/requests/:id/reservations", get(list_for_request))
}
