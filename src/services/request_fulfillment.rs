//! Withdrawal requests: creation, approval with partial fulfillment, rejection and completion.

use chrono::Utc;
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    DatabaseTransaction, DbBackend, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::db::{begin_write, commit_or_rollback};
use crate::entities::movement::MovementType;
use crate::entities::request::{self, RequestStatus};
use crate::entities::{location, location_stock, product, request_item};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::stock_ledger::{LedgerEntry, MovementDraft, MovementMetadata, StockLedger};

const DEFAULT_APPROVAL_NOTE: &str = "Automatic approval";

/// Units that can be handed out for a line: never more than requested, never below zero.
pub fn approved_quantity(requested: i32, available: i32) -> i32 {
    requested.min(available.max(0)).max(0)
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewRequestItem {
    pub product_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewRequest {
    pub requester_id: Option<Uuid>,
    pub supervisor_id: Option<Uuid>,
    pub location_id: Uuid,
    #[validate]
    pub items: Vec<NewRequestItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestDetails {
    #[serde(flatten)]
    pub request: request::Model,
    pub items: Vec<RequestItemDetails>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestItemDetails {
    #[serde(flatten)]
    pub item: request_item::Model,
    /// Stock at the request's location when the request was read; 0 if never stocked there.
    pub current_stock: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovedItem {
    pub product_id: Uuid,
    /// None when nothing could be handed out for this line.
    pub movement_id: Option<Uuid>,
    pub requested_quantity: i32,
    pub approved_quantity: i32,
    pub previous_stock: i32,
    pub resulting_stock: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalOutcome {
    pub request_id: Uuid,
    pub status: RequestStatus,
    pub partial: bool,
    pub movements_created: usize,
    pub items: Vec<ApprovedItem>,
}

pub struct RequestFulfillment {
    db_pool: Arc<DatabaseConnection>,
    ledger: Arc<StockLedger>,
    events: Option<EventSender>,
}

impl RequestFulfillment {
    pub fn new(
        db_pool: Arc<DatabaseConnection>,
        ledger: Arc<StockLedger>,
        events: Option<EventSender>,
    ) -> Self {
        Self {
            db_pool,
            ledger,
            events,
        }
    }

    /// Creates a pending request. Items keep the order they were given in.
    #[instrument(skip(self, input), fields(location_id = %input.location_id))]
    pub async fn create_request(&self, input: NewRequest) -> Result<RequestDetails, ServiceError> {
        if input.items.is_empty() {
            return Err(ServiceError::InvalidInput(
                "a request needs at least one item".to_string(),
            ));
        }
        input.validate()?;

        let txn = begin_write(&self.db_pool).await?;
        let result = Self::insert_request(&txn, input).await;
        let details = commit_or_rollback(txn, "create_request", result).await?;

        info!(request_id = %details.request.id, items = details.items.len(), "Request created");
        Ok(details)
    }

    async fn insert_request(
        txn: &DatabaseTransaction,
        input: NewRequest,
    ) -> Result<RequestDetails, ServiceError> {
        if location::Entity::find_by_id(input.location_id)
            .one(txn)
            .await
            .map_err(ServiceError::db_error)?
            .is_none()
        {
            return Err(ServiceError::NotFound(format!(
                "Location {}",
                input.location_id
            )));
        }

        for item in &input.items {
            if product::Entity::find_by_id(item.product_id)
                .one(txn)
                .await
                .map_err(ServiceError::db_error)?
                .is_none()
            {
                return Err(ServiceError::NotFound(format!("Product {}", item.product_id)));
            }
        }

        let request = request::ActiveModel {
            id: Set(Uuid::new_v4()),
            requester_id: Set(input.requester_id),
            supervisor_id: Set(input.supervisor_id),
            location_id: Set(input.location_id),
            status: Set(RequestStatus::Pending.as_str().to_string()),
            created_at: Set(Utc::now()),
            processed_at: Set(None),
            processed_by: Set(None),
            rejection_reason: Set(None),
        }
        .insert(txn)
        .await
        .map_err(ServiceError::db_error)?;

        let mut items = Vec::with_capacity(input.items.len());
        for (position, item) in input.items.into_iter().enumerate() {
            let saved = request_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                request_id: Set(request.id),
                product_id: Set(item.product_id),
                quantity: Set(item.quantity),
                position: Set(position as i32),
            }
            .insert(txn)
            .await
            .map_err(ServiceError::db_error)?;
            items.push(saved);
        }

        let items = with_current_stock(txn, request.location_id, items).await?;
        Ok(RequestDetails { request, items })
    }

    #[instrument(skip(self))]
    pub async fn get_request(&self, request_id: Uuid) -> Result<RequestDetails, ServiceError> {
        let db = &*self.db_pool;
        let request = request::Entity::find_by_id(request_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| request_not_found(request_id))?;

        let items = request_item::Entity::find()
            .filter(request_item::Column::RequestId.eq(request_id))
            .order_by_asc(request_item::Column::Position)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let items = with_current_stock(db, request.location_id, items).await?;
        Ok(RequestDetails { request, items })
    }

    /// Approves a pending request, handing out as much of each line as stock allows.
    ///
    /// Stock reads, movements and the status change commit together. A short line makes the
    /// request `partially_approved`; lines with nothing available create no movement.
    #[instrument(skip(self, note))]
    pub async fn approve(
        &self,
        request_id: Uuid,
        storekeeper_id: Option<Uuid>,
        note: Option<String>,
    ) -> Result<ApprovalOutcome, ServiceError> {
        let txn = begin_write(&self.db_pool).await?;
        let result = Self::approve_in(&txn, request_id, storekeeper_id, note).await;
        let (outcome, entries) = commit_or_rollback(txn, "approve_request", result).await?;

        self.ledger.publish(&entries).await;

        counter!("inventory.requests.approved", 1, "partial" => if outcome.partial { "true" } else { "false" });
        if outcome.partial {
            warn!(%request_id, "Request approved with shortages");
        } else {
            info!(%request_id, "Request approved");
        }

        if let Some(events) = &self.events {
            events
                .send_or_log(Event::RequestApproved {
                    request_id,
                    partial: outcome.partial,
                    movements_created: outcome.movements_created,
                })
                .await;
        }

        Ok(outcome)
    }

    async fn approve_in(
        txn: &DatabaseTransaction,
        request_id: Uuid,
        storekeeper_id: Option<Uuid>,
        note: Option<String>,
    ) -> Result<(ApprovalOutcome, Vec<LedgerEntry>), ServiceError> {
        let mut query = request::Entity::find_by_id(request_id);
        if txn.get_database_backend() != DbBackend::Sqlite {
            query = query.lock_exclusive();
        }
        let request = query
            .one(txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| request_not_found(request_id))?;
        ensure_pending(&request)?;

        let lines = request_item::Entity::find()
            .filter(request_item::Column::RequestId.eq(request_id))
            .order_by_asc(request_item::Column::Position)
            .all(txn)
            .await
            .map_err(ServiceError::db_error)?;

        // Rows are locked in product order so approvals sharing products cannot deadlock;
        // lines are still handed out in request order below.
        let mut products: Vec<Uuid> = lines.iter().map(|line| line.product_id).collect();
        products.sort_unstable();
        products.dedup();
        for product_id in products {
            StockLedger::lock_stock(txn, product_id, request.location_id).await?;
        }

        let reference = format!(
            "Request {} - {}",
            request_id,
            note.as_deref().unwrap_or(DEFAULT_APPROVAL_NOTE)
        );

        let mut items = Vec::with_capacity(lines.len());
        let mut entries = Vec::new();
        let mut partial = false;

        for line in lines {
            let available = StockLedger::lock_stock(txn, line.product_id, request.location_id)
                .await?
                .map(|row| row.stock)
                .unwrap_or(0);
            let approved = approved_quantity(line.quantity, available);
            if approved < line.quantity {
                partial = true;
            }

            if approved == 0 {
                items.push(ApprovedItem {
                    product_id: line.product_id,
                    movement_id: None,
                    requested_quantity: line.quantity,
                    approved_quantity: 0,
                    previous_stock: available,
                    resulting_stock: available,
                });
                continue;
            }

            let draft = MovementDraft::new(
                line.product_id,
                request.location_id,
                MovementType::Outbound,
                approved,
            )
            .with_metadata(MovementMetadata {
                supervisor_id: request.supervisor_id,
                requester_id: request.requester_id,
                storekeeper_id,
                reference: Some(reference.clone()),
            });
            let entry = StockLedger::apply_movement_in(txn, draft).await?;

            items.push(ApprovedItem {
                product_id: line.product_id,
                movement_id: Some(entry.movement.id),
                requested_quantity: line.quantity,
                approved_quantity: approved,
                previous_stock: entry.movement.previous_stock,
                resulting_stock: entry.movement.resulting_stock,
            });
            entries.push(entry);
        }

        let status = if partial {
            RequestStatus::PartiallyApproved
        } else {
            RequestStatus::Approved
        };
        transition_from(
            txn,
            request_id,
            &[RequestStatus::Pending],
            status,
            storekeeper_id,
            None,
        )
        .await?;

        Ok((
            ApprovalOutcome {
                request_id,
                status,
                partial,
                movements_created: entries.len(),
                items,
            },
            entries,
        ))
    }

    /// Rejects a pending request. Stock is never touched.
    #[instrument(skip(self, reason))]
    pub async fn reject(
        &self,
        request_id: Uuid,
        reason: String,
        actor_id: Option<Uuid>,
    ) -> Result<request::Model, ServiceError> {
        let db = &*self.db_pool;
        transition_from(
            db,
            request_id,
            &[RequestStatus::Pending],
            RequestStatus::Rejected,
            actor_id,
            Some(reason.clone()),
        )
        .await?;

        counter!("inventory.requests.rejected", 1);
        info!(%request_id, "Request rejected");

        if let Some(events) = &self.events {
            events
                .send_or_log(Event::RequestRejected { request_id, reason })
                .await;
        }

        request::Entity::find_by_id(request_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| request_not_found(request_id))
    }

    /// Marks an approved request as handed over.
    #[instrument(skip(self))]
    pub async fn complete(
        &self,
        request_id: Uuid,
        actor_id: Option<Uuid>,
    ) -> Result<request::Model, ServiceError> {
        let db = &*self.db_pool;
        transition_from(
            db,
            request_id,
            &[RequestStatus::Approved, RequestStatus::PartiallyApproved],
            RequestStatus::Completed,
            actor_id,
            None,
        )
        .await?;

        info!(%request_id, "Request completed");
        if let Some(events) = &self.events {
            events.send_or_log(Event::RequestCompleted(request_id)).await;
        }

        request::Entity::find_by_id(request_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| request_not_found(request_id))
    }
}

/// Moves a request to `to` only while it is in one of `from`.
///
/// The status filter sits in the UPDATE itself, so of two racing callers exactly one wins.
async fn transition_from<C: ConnectionTrait>(
    conn: &C,
    request_id: Uuid,
    from: &[RequestStatus],
    to: RequestStatus,
    actor_id: Option<Uuid>,
    rejection_reason: Option<String>,
) -> Result<(), ServiceError> {
    let mut update = request::Entity::update_many()
        .col_expr(request::Column::Status, Expr::value(to.as_str()))
        .filter(request::Column::Id.eq(request_id))
        .filter(request::Column::Status.is_in(from.iter().map(RequestStatus::as_str)));

    // Completion keeps the approval's processing metadata.
    if to != RequestStatus::Completed {
        update = update
            .col_expr(request::Column::ProcessedAt, Expr::value(Utc::now()))
            .col_expr(request::Column::ProcessedBy, Expr::value(actor_id));
    }
    if let Some(reason) = rejection_reason {
        update = update.col_expr(request::Column::RejectionReason, Expr::value(reason));
    }

    let result = update.exec(conn).await.map_err(ServiceError::db_error)?;
    if result.rows_affected > 0 {
        return Ok(());
    }

    let current = request::Entity::find_by_id(request_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| request_not_found(request_id))?;
    Err(ServiceError::AlreadyProcessed(format!(
        "Request {} is {}",
        request_id, current.status
    )))
}

async fn with_current_stock<C: ConnectionTrait>(
    conn: &C,
    location_id: Uuid,
    items: Vec<request_item::Model>,
) -> Result<Vec<RequestItemDetails>, ServiceError> {
    let mut detailed = Vec::with_capacity(items.len());
    for item in items {
        let current_stock = location_stock::Entity::find_by_id((item.product_id, location_id))
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
            .map(|row| row.stock)
            .unwrap_or(0);
        detailed.push(RequestItemDetails {
            item,
            current_stock,
        });
    }
    Ok(detailed)
}

fn ensure_pending(request: &request::Model) -> Result<(), ServiceError> {
    if request.current_status() == Some(RequestStatus::Pending) {
        Ok(())
    } else {
        Err(ServiceError::AlreadyProcessed(format!(
            "Request {} is {}",
            request.id, request.status
        )))
    }
}

fn request_not_found(request_id: Uuid) -> ServiceError {
    ServiceError::NotFound(format!("Request {}", request_id))
}
