//! Stock ledger: the only writer of `location_stock`.
//!
//! Every stock change is an appended movement plus a guarded update of the stock row, executed
//! on the caller's connection. Callers that need several changes to commit together pass their
//! own transaction to [`StockLedger::apply_movement_in`].

use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    DbBackend, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::db::{begin_write, commit_or_rollback};
use crate::entities::{location, location_stock, movement, movement::MovementType, product};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::low_stock_notifier::{LowStockAlert, LowStockNotifier};

/// Who caused a movement and why.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementMetadata {
    pub supervisor_id: Option<Uuid>,
    pub requester_id: Option<Uuid>,
    pub storekeeper_id: Option<Uuid>,
    pub reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementDraft {
    pub product_id: Uuid,
    pub location_id: Uuid,
    pub movement_type: MovementType,
    pub quantity: i32,
    pub metadata: MovementMetadata,
    /// Overrides the recorded timestamp; defaults to now.
    pub occurred_at: Option<DateTime<Utc>>,
}

impl MovementDraft {
    pub fn new(
        product_id: Uuid,
        location_id: Uuid,
        movement_type: MovementType,
        quantity: i32,
    ) -> Self {
        Self {
            product_id,
            location_id,
            movement_type,
            quantity,
            metadata: MovementMetadata::default(),
            occurred_at: None,
        }
    }

    pub fn with_metadata(mut self, metadata: MovementMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A movement written inside a transaction, plus the alert to dispatch once it commits.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub movement: movement::Model,
    pub movement_type: MovementType,
    pub low_stock_alert: Option<LowStockAlert>,
}

pub struct StockLedger {
    db_pool: Arc<DatabaseConnection>,
    notifier: Arc<LowStockNotifier>,
    events: Option<EventSender>,
}

impl StockLedger {
    pub fn new(
        db_pool: Arc<DatabaseConnection>,
        notifier: Arc<LowStockNotifier>,
        events: Option<EventSender>,
    ) -> Self {
        Self {
            db_pool,
            notifier,
            events,
        }
    }

    /// Current stock of a product at a location.
    #[instrument(skip(self))]
    pub async fn get_stock(&self, product_id: Uuid, location_id: Uuid) -> Result<i32, ServiceError> {
        Ok(self.get_stock_level(product_id, location_id).await?.stock)
    }

    #[instrument(skip(self))]
    pub async fn get_stock_level(
        &self,
        product_id: Uuid,
        location_id: Uuid,
    ) -> Result<location_stock::Model, ServiceError> {
        location_stock::Entity::find_by_id((product_id, location_id))
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| stock_not_found(product_id, location_id))
    }

    /// Reads the stock row, holding a row lock until `conn`'s transaction ends.
    ///
    /// SQLite has no row locks; there the write lock claimed by [`begin_write`] serializes
    /// writers instead.
    pub async fn lock_stock<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        location_id: Uuid,
    ) -> Result<Option<location_stock::Model>, ServiceError> {
        let mut query = location_stock::Entity::find_by_id((product_id, location_id));
        if conn.get_database_backend() != DbBackend::Sqlite {
            query = query.lock_exclusive();
        }
        query.one(conn).await.map_err(ServiceError::db_error)
    }

    /// Records one movement in its own transaction and dispatches any resulting alert.
    #[instrument(skip(self, draft), fields(product_id = %draft.product_id, location_id = %draft.location_id))]
    pub async fn apply_movement(&self, draft: MovementDraft) -> Result<movement::Model, ServiceError> {
        let txn = begin_write(&self.db_pool).await?;
        let result = Self::apply_movement_in(&txn, draft).await;
        let entry = commit_or_rollback(txn, "apply_movement", result).await?;

        self.publish(std::slice::from_ref(&entry)).await;
        Ok(entry.movement)
    }

    /// Writes a movement and its stock change through `conn` without committing.
    ///
    /// Outbound movements are checked against the locked row and applied with an update that
    /// only matches while `stock >= quantity`, so a concurrent writer can never drive the row
    /// negative. Inbound movements on an unstocked pair create the row.
    pub async fn apply_movement_in<C: ConnectionTrait>(
        conn: &C,
        draft: MovementDraft,
    ) -> Result<LedgerEntry, ServiceError> {
        let MovementDraft {
            product_id,
            location_id,
            movement_type,
            quantity,
            metadata,
            occurred_at,
        } = draft;

        if quantity <= 0 {
            return Err(ServiceError::InvalidQuantity(quantity));
        }

        let current = Self::lock_stock(conn, product_id, location_id).await?;
        let now = Utc::now();

        match (current, movement_type) {
            (None, MovementType::Outbound) => {
                return Err(ServiceError::InsufficientStock {
                    product_id,
                    location_id,
                    available: 0,
                    requested: quantity,
                });
            }
            (None, MovementType::Inbound) => {
                ensure_catalog_entries(conn, product_id, location_id).await?;
                debug!(%product_id, %location_id, "First stock at location");
                let row = location_stock::ActiveModel {
                    product_id: Set(product_id),
                    location_id: Set(location_id),
                    stock: Set(quantity),
                    minimum_stock: Set(0),
                    version: Set(1),
                    updated_at: Set(now),
                };
                location_stock::Entity::insert(row)
                    .exec_without_returning(conn)
                    .await
                    .map_err(ServiceError::db_error)?;
            }
            (Some(row), MovementType::Outbound) if row.stock < quantity => {
                return Err(ServiceError::InsufficientStock {
                    product_id,
                    location_id,
                    available: row.stock,
                    requested: quantity,
                });
            }
            (Some(_), kind) => {
                let stock_expr = match kind {
                    MovementType::Inbound => Expr::col(location_stock::Column::Stock).add(quantity),
                    MovementType::Outbound => {
                        Expr::col(location_stock::Column::Stock).sub(quantity)
                    }
                };

                let mut update = location_stock::Entity::update_many()
                    .col_expr(location_stock::Column::Stock, stock_expr)
                    .col_expr(
                        location_stock::Column::Version,
                        Expr::col(location_stock::Column::Version).add(1),
                    )
                    .col_expr(location_stock::Column::UpdatedAt, Expr::value(now))
                    .filter(location_stock::Column::ProductId.eq(product_id))
                    .filter(location_stock::Column::LocationId.eq(location_id));
                if kind == MovementType::Outbound {
                    update = update.filter(location_stock::Column::Stock.gte(quantity));
                }

                let result = update.exec(conn).await.map_err(ServiceError::db_error)?;
                if result.rows_affected == 0 {
                    let available = Self::lock_stock(conn, product_id, location_id)
                        .await?
                        .map(|row| row.stock)
                        .unwrap_or(0);
                    return Err(ServiceError::InsufficientStock {
                        product_id,
                        location_id,
                        available,
                        requested: quantity,
                    });
                }
            }
        }

        let resulting_stock = location_stock::Entity::find_by_id((product_id, location_id))
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
            .map(|row| row.stock)
            .ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "stock row for product {} at location {} vanished mid-update",
                    product_id, location_id
                ))
            })?;
        let previous_stock = resulting_stock - movement_type.signed(quantity);

        let movement = movement::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product_id),
            location_id: Set(location_id),
            movement_type: Set(movement_type.as_str().to_string()),
            quantity: Set(quantity),
            supervisor_id: Set(metadata.supervisor_id),
            requester_id: Set(metadata.requester_id),
            storekeeper_id: Set(metadata.storekeeper_id),
            reference: Set(metadata.reference),
            previous_stock: Set(previous_stock),
            resulting_stock: Set(resulting_stock),
            created_at: Set(occurred_at.unwrap_or(now)),
        }
        .insert(conn)
        .await
        .map_err(ServiceError::db_error)?;

        counter!("inventory.movements.applied", 1, "type" => movement_type.as_str());

        // Only decrements can cross the minimum.
        let low_stock_alert = if movement_type == MovementType::Outbound {
            match LowStockNotifier::evaluate(conn, product_id, location_id).await {
                Ok(alert) => alert,
                Err(e) => {
                    warn!(%product_id, %location_id, error = %e, "Low stock evaluation failed");
                    None
                }
            }
        } else {
            None
        };

        Ok(LedgerEntry {
            movement,
            movement_type,
            low_stock_alert,
        })
    }

    /// Dispatches alerts and movement events for entries whose transaction has committed.
    pub async fn publish(&self, entries: &[LedgerEntry]) {
        let alerts: Vec<&LowStockAlert> = entries
            .iter()
            .filter_map(|e| e.low_stock_alert.as_ref())
            .collect();
        self.notifier.notify_all(&alerts).await;

        if let Some(events) = &self.events {
            for entry in entries {
                let m = &entry.movement;
                events
                    .send_or_log(Event::MovementRecorded {
                        movement_id: m.id,
                        product_id: m.product_id,
                        location_id: m.location_id,
                        movement_type: m.movement_type.clone(),
                        quantity: m.quantity,
                        resulting_stock: m.resulting_stock,
                    })
                    .await;
            }
        }
    }

    /// Sets the threshold the notifier compares against.
    #[instrument(skip(self))]
    pub async fn set_minimum_stock(
        &self,
        product_id: Uuid,
        location_id: Uuid,
        minimum_stock: i32,
    ) -> Result<location_stock::Model, ServiceError> {
        if minimum_stock < 0 {
            return Err(ServiceError::InvalidQuantity(minimum_stock));
        }

        let result = location_stock::Entity::update_many()
            .col_expr(location_stock::Column::MinimumStock, Expr::value(minimum_stock))
            .col_expr(
                location_stock::Column::Version,
                Expr::col(location_stock::Column::Version).add(1),
            )
            .col_expr(location_stock::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(location_stock::Column::ProductId.eq(product_id))
            .filter(location_stock::Column::LocationId.eq(location_id))
            .exec(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)?;

        if result.rows_affected == 0 {
            return Err(stock_not_found(product_id, location_id));
        }

        info!(%product_id, %location_id, minimum_stock, "Minimum stock updated");
        self.get_stock_level(product_id, location_id).await
    }

    /// Movements for a product at a location, newest first.
    #[instrument(skip(self))]
    pub async fn movement_history(
        &self,
        product_id: Uuid,
        location_id: Uuid,
        limit: u64,
    ) -> Result<Vec<movement::Model>, ServiceError> {
        movement::Entity::find()
            .filter(movement::Column::ProductId.eq(product_id))
            .filter(movement::Column::LocationId.eq(location_id))
            .order_by_desc(movement::Column::CreatedAt)
            .limit(limit)
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Rows strictly below their minimum, lowest stock first.
    #[instrument(skip(self))]
    pub async fn list_low_stock(&self) -> Result<Vec<location_stock::Model>, ServiceError> {
        location_stock::Entity::find()
            .filter(
                Expr::col(location_stock::Column::Stock)
                    .lt(Expr::col(location_stock::Column::MinimumStock)),
            )
            .order_by_asc(location_stock::Column::Stock)
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)
    }
}

/// First stock at a pair needs both ends to exist; the foreign key would only say "storage".
async fn ensure_catalog_entries<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    location_id: Uuid,
) -> Result<(), ServiceError> {
    if product::Entity::find_by_id(product_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .is_none()
    {
        return Err(ServiceError::NotFound(format!("Product {}", product_id)));
    }
    if location::Entity::find_by_id(location_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .is_none()
    {
        return Err(ServiceError::NotFound(format!("Location {}", location_id)));
    }
    Ok(())
}

fn stock_not_found(product_id: Uuid, location_id: Uuid) -> ServiceError {
    ServiceError::NotFound(format!(
        "No stock for product {} at location {}",
        product_id, location_id
    ))
}
