use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::request;
use crate::errors::ServiceError;
use crate::handlers::{optional_body, resolve_actor, AppState};
use crate::services::actors::ActorRef;
use crate::services::request_fulfillment::{
    ApprovalOutcome, NewRequest, NewRequestItem, RequestDetails,
};

#[derive(Debug, Deserialize)]
pub struct CreateRequestBody {
    pub requester: Option<ActorRef>,
    pub supervisor: Option<ActorRef>,
    pub location_id: Uuid,
    pub items: Vec<NewRequestItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ApproveBody {
    pub storekeeper: Option<ActorRef>,
    pub note: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RejectBody {
    pub reason: String,
    pub actor: Option<ActorRef>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CompleteBody {
    pub actor: Option<ActorRef>,
}

async fn create_request(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateRequestBody>,
) -> Result<(StatusCode, Json<RequestDetails>), ServiceError> {
    let input = NewRequest {
        requester_id: resolve_actor(&state, body.requester.as_ref()).await?,
        supervisor_id: resolve_actor(&state, body.supervisor.as_ref()).await?,
        location_id: body.location_id,
        items: body.items,
    };
    let details = state.engine.create_request(input).await?;
    Ok((StatusCode::CREATED, Json(details)))
}

async fn get_request(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<Uuid>,
) -> Result<Json<RequestDetails>, ServiceError> {
    Ok(Json(state.engine.get_request(request_id).await?))
}

async fn approve_request(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<Uuid>,
    body: Result<Json<ApproveBody>, JsonRejection>,
) -> Result<Json<ApprovalOutcome>, ServiceError> {
    let body = optional_body(body)?;
    let storekeeper_id = resolve_actor(&state, body.storekeeper.as_ref()).await?;
    let outcome = state
        .engine
        .approve_request(request_id, storekeeper_id, body.note)
        .await?;
    Ok(Json(outcome))
}

async fn reject_request(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<Uuid>,
    body: Result<Json<RejectBody>, JsonRejection>,
) -> Result<Json<request::Model>, ServiceError> {
    let body = optional_body(body)?;
    let actor_id = resolve_actor(&state, body.actor.as_ref()).await?;
    let request = state
        .engine
        .reject_request(request_id, body.reason, actor_id)
        .await?;
    Ok(Json(request))
}

async fn complete_request(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<Uuid>,
    body: Result<Json<CompleteBody>, JsonRejection>,
) -> Result<Json<request::Model>, ServiceError> {
    let body = optional_body(body)?;
    let actor_id = resolve_actor(&state, body.actor.as_ref()).await?;
    Ok(Json(state.engine.complete_request(request_id, actor_id).await?))
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/requests", post(create_request))
        .route("/requests/:id", get(get_request))
        .route("/requests/:id/approve", post(approve_request))
        .route("/requests/:id/reject", post(reject_request))
        .route("/requests/:id/complete", post(complete_request))
}
