pub mod health;
pub mod movements;
pub mod requests;
pub mod reservations;
pub mod stock;

use axum::{extract::rejection::JsonRejection, Json};

use crate::errors::ServiceError;
use crate::services::actors::ActorRef;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Resolves an optional actor reference at the request boundary.
pub(crate) async fn resolve_actor(
    state: &AppState,
    actor: Option<&ActorRef>,
) -> Result<Option<uuid::Uuid>, ServiceError> {
    state.engine.actors.resolve_optional(actor).await
}

/// Body of an action route whose fields are all optional. A request sent without a JSON body
/// gets the defaults; a JSON body that does not parse is still rejected.
pub(crate) fn optional_body<T: Default>(
    body: Result<Json<T>, JsonRejection>,
) -> Result<T, ServiceError> {
    match body {
        Ok(Json(value)) => Ok(value),
        Err(JsonRejection::MissingJsonContentType(_)) => Ok(T::default()),
        Err(rejection) => Err(ServiceError::InvalidInput(rejection.body_text())),
    }
}
