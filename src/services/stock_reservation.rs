//! Informational holds against stock. Reserving never changes `location_stock`, and other
//! active reservations are not subtracted when checking availability.

use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::entities::stock_reservation::{self, ReservationStatus};
use crate::entities::{location_stock, request};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

const DEFAULT_REASON: &str = "Automatic reservation";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReserveStock {
    pub product_id: Uuid,
    pub location_id: Uuid,
    pub quantity: i32,
    pub request_id: Uuid,
    pub reason: Option<String>,
}

/// A new hold plus the stock left over if it were handed out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationReceipt {
    #[serde(flatten)]
    pub reservation: stock_reservation::Model,
    pub available_after: i32,
}

pub struct ReservationManager {
    db_pool: Arc<DatabaseConnection>,
    events: Option<EventSender>,
}

impl ReservationManager {
    pub fn new(db_pool: Arc<DatabaseConnection>, events: Option<EventSender>) -> Self {
        Self { db_pool, events }
    }

    #[instrument(skip(self, input), fields(product_id = %input.product_id, request_id = %input.request_id))]
    pub async fn reserve(
        &self,
        input: ReserveStock,
    ) -> Result<ReservationReceipt, ServiceError> {
        if input.quantity <= 0 {
            return Err(ServiceError::InvalidQuantity(input.quantity));
        }

        let db = &*self.db_pool;
        let stock = location_stock::Entity::find_by_id((input.product_id, input.location_id))
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "No stock for product {} at location {}",
                    input.product_id, input.location_id
                ))
            })?;

        if stock.stock < input.quantity {
            return Err(ServiceError::InsufficientStock {
                product_id: input.product_id,
                location_id: input.location_id,
                available: stock.stock,
                requested: input.quantity,
            });
        }

        if request::Entity::find_by_id(input.request_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .is_none()
        {
            return Err(ServiceError::NotFound(format!("Request {}", input.request_id)));
        }

        let reservation = stock_reservation::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(input.product_id),
            location_id: Set(input.location_id),
            quantity: Set(input.quantity),
            request_id: Set(input.request_id),
            reason: Set(input
                .reason
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_REASON.to_string())),
            status: Set(ReservationStatus::Active.as_str().to_string()),
            created_at: Set(Utc::now()),
            released_at: Set(None),
        }
        .insert(db)
        .await
        .map_err(ServiceError::db_error)?;

        info!(reservation_id = %reservation.id, quantity = reservation.quantity, "Stock reserved");

        if let Some(events) = &self.events {
            events
                .send_or_log(Event::StockReserved {
                    reservation_id: reservation.id,
                    product_id: reservation.product_id,
                    request_id: reservation.request_id,
                    quantity: reservation.quantity,
                })
                .await;
        }

        Ok(ReservationReceipt {
            available_after: stock.stock - reservation.quantity,
            reservation,
        })
    }

    /// Releases every active reservation of `product_id` held for `request_id`.
    #[instrument(skip(self))]
    pub async fn release(&self, product_id: Uuid, request_id: Uuid) -> Result<u64, ServiceError> {
        let result = stock_reservation::Entity::update_many()
            .col_expr(
                stock_reservation::Column::Status,
                Expr::value(ReservationStatus::Released.as_str()),
            )
            .col_expr(stock_reservation::Column::ReleasedAt, Expr::value(Utc::now()))
            .filter(stock_reservation::Column::ProductId.eq(product_id))
            .filter(stock_reservation::Column::RequestId.eq(request_id))
            .filter(stock_reservation::Column::Status.eq(ReservationStatus::Active.as_str()))
            .exec(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Active reservation of product {} for request {}",
                product_id, request_id
            )));
        }

        info!(released = result.rows_affected, "Reservation released");

        if let Some(events) = &self.events {
            events
                .send_or_log(Event::ReservationReleased {
                    product_id,
                    request_id,
                    released_count: result.rows_affected,
                })
                .await;
        }

        Ok(result.rows_affected)
    }

    #[instrument(skip(self))]
    pub async fn list_for_request(
        &self,
        request_id: Uuid,
    ) -> Result<Vec<stock_reservation::Model>, ServiceError> {
        stock_reservation::Entity::find()
            .filter(stock_reservation::Column::RequestId.eq(request_id))
            .order_by_asc(stock_reservation::Column::CreatedAt)
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)
    }
}
