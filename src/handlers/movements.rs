use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::movement::{self, MovementType};
use crate::errors::ServiceError;
use crate::handlers::{resolve_actor, AppState};
use crate::services::actors::ActorRef;
use crate::services::batch_movements::{BatchMovementInput, BatchResult};
use crate::services::stock_ledger::{MovementDraft, MovementMetadata};

#[derive(Debug, Deserialize)]
pub struct RecordMovementBody {
    pub product_id: Uuid,
    pub location_id: Uuid,
    pub movement_type: String,
    pub quantity: i32,
    pub supervisor: Option<ActorRef>,
    pub requester: Option<ActorRef>,
    pub storekeeper: Option<ActorRef>,
    pub reference: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchBody {
    pub movements: Vec<BatchMovementInput>,
    pub storekeeper: Option<ActorRef>,
}

async fn record_movement(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RecordMovementBody>,
) -> Result<(StatusCode, Json<movement::Model>), ServiceError> {
    let movement_type = MovementType::from_str(&body.movement_type).ok_or_else(|| {
        ServiceError::InvalidInput(format!("unknown movement type '{}'", body.movement_type))
    })?;

    let metadata = MovementMetadata {
        supervisor_id: resolve_actor(&state, body.supervisor.as_ref()).await?,
        requester_id: resolve_actor(&state, body.requester.as_ref()).await?,
        storekeeper_id: resolve_actor(&state, body.storekeeper.as_ref()).await?,
        reference: body.reference,
    };

    let draft = MovementDraft::new(
        body.product_id,
        body.location_id,
        movement_type,
        body.quantity,
    )
    .with_metadata(metadata);

    let movement = state.engine.record_movement(draft).await?;
    Ok((StatusCode::CREATED, Json(movement)))
}

async fn apply_batch(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BatchBody>,
) -> Result<Json<BatchResult>, ServiceError> {
    let storekeeper_id = resolve_actor(&state, body.storekeeper.as_ref()).await?;
    let result = state
        .engine
        .apply_batch_movements(body.movements, storekeeper_id)
        .await?;
    Ok(Json(result))
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/movements", post(record_movement))
        .route("/movements/batch", post(apply_batch))
}
