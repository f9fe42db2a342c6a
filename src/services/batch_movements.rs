//! All-or-nothing application of a list of movements.

use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{DatabaseConnection, DatabaseTransaction};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::db::{begin_write, commit_or_rollback};
use crate::entities::movement::MovementType;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::stock_ledger::{LedgerEntry, MovementDraft, MovementMetadata, StockLedger};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BatchMovementInput {
    pub product_id: Uuid,
    pub location_id: Uuid,
    /// `inbound` or `outbound`
    pub movement_type: String,
    #[validate(range(min = 1))]
    pub quantity: i32,
    pub requester_id: Option<Uuid>,
    #[validate(length(max = 500))]
    pub observation: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
}

/// Stock change produced by one entry of the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDelta {
    pub movement_id: Uuid,
    pub product_id: Uuid,
    pub location_id: Uuid,
    pub movement_type: MovementType,
    pub delta: i32,
    pub previous_stock: i32,
    pub resulting_stock: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub applied_count: usize,
    pub deltas: Vec<StockDelta>,
}

/// Checks the whole batch before any storage work.
pub fn validate_batch(
    inputs: &[BatchMovementInput],
    storekeeper_id: Option<Uuid>,
) -> Result<Vec<MovementDraft>, ServiceError> {
    if inputs.is_empty() {
        return Err(ServiceError::InvalidInput(
            "a batch needs at least one movement".to_string(),
        ));
    }

    inputs
        .iter()
        .enumerate()
        .map(|(index, input)| -> Result<MovementDraft, ServiceError> {
            input.validate().map_err(|e| {
                ServiceError::InvalidInput(format!("movement {}: {}", index, e))
            })?;
            let movement_type = MovementType::from_str(&input.movement_type).ok_or_else(|| {
                ServiceError::InvalidInput(format!(
                    "movement {}: unknown movement type '{}'",
                    index, input.movement_type
                ))
            })?;

            Ok(MovementDraft {
                product_id: input.product_id,
                location_id: input.location_id,
                movement_type,
                quantity: input.quantity,
                metadata: MovementMetadata {
                    supervisor_id: None,
                    requester_id: input.requester_id,
                    storekeeper_id,
                    reference: input.observation.clone(),
                },
                occurred_at: input.occurred_at,
            })
        })
        .collect()
}

pub struct BatchMovementProcessor {
    db_pool: Arc<DatabaseConnection>,
    ledger: Arc<StockLedger>,
    events: Option<EventSender>,
}

impl BatchMovementProcessor {
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

    /// Applies every movement in order, or none of them.
    #[instrument(skip(self, inputs), fields(batch_size = inputs.len()))]
    pub async fn apply_batch(
        &self,
        inputs: Vec<BatchMovementInput>,
        storekeeper_id: Option<Uuid>,
    ) -> Result<BatchResult, ServiceError> {
        let drafts = validate_batch(&inputs, storekeeper_id)?;

        let txn = begin_write(&self.db_pool).await?;
        let result = Self::apply_all(&txn, drafts).await;
        let entries = match commit_or_rollback(txn, "apply_batch", result).await {
            Ok(entries) => entries,
            Err(e) => {
                counter!("inventory.batches.rejected", 1);
                return Err(e);
            }
        };

        self.ledger.publish(&entries).await;

        let deltas: Vec<StockDelta> = entries
            .iter()
            .map(|entry| {
                let m = &entry.movement;
                StockDelta {
                    movement_id: m.id,
                    product_id: m.product_id,
                    location_id: m.location_id,
                    movement_type: entry.movement_type,
                    delta: m.resulting_stock - m.previous_stock,
                    previous_stock: m.previous_stock,
                    resulting_stock: m.resulting_stock,
                }
            })
            .collect();

        counter!("inventory.batches.applied", 1);
        info!(applied_count = deltas.len(), "Batch applied");

        if let Some(events) = &self.events {
            events
                .send_or_log(Event::BatchApplied {
                    applied_count: deltas.len(),
                })
                .await;
        }

        Ok(BatchResult {
            applied_count: deltas.len(),
            deltas,
        })
    }

    async fn apply_all(
        txn: &DatabaseTransaction,
        drafts: Vec<MovementDraft>,
    ) -> Result<Vec<LedgerEntry>, ServiceError> {
        let mut entries = Vec::with_capacity(drafts.len());
        for draft in drafts {
            entries.push(StockLedger::apply_movement_in(txn, draft).await?);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn input(movement_type: &str, quantity: i32) -> BatchMovementInput {
        BatchMovementInput {
            product_id: Uuid::new_v4(),
            location_id: Uuid::new_v4(),
            movement_type: movement_type.to_string(),
            quantity,
            requester_id: None,
            observation: None,
            occurred_at: None,
        }
    }

    #[test]
    fn empty_batch_is_invalid() {
        assert_matches!(validate_batch(&[], None), Err(ServiceError::InvalidInput(_)));
    }

    #[test]
    fn unknown_direction_is_invalid() {
        let err = validate_batch(&[input("inbound", 1), input("sideways", 1)], None).unwrap_err();
        assert_matches!(err, ServiceError::InvalidInput(msg) if msg.contains("movement 1"));
    }

    #[test]
    fn non_positive_quantity_is_invalid() {
        assert_matches!(
            validate_batch(&[input("outbound", 0)], None),
            Err(ServiceError::InvalidInput(_))
        );
    }

    #[test]
    fn valid_batch_keeps_order_and_actor() {
        let storekeeper = Uuid::new_v4();
        let drafts =
            validate_batch(&[input("INBOUND", 5), input("outbound", 2)], Some(storekeeper)).unwrap();
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].movement_type, MovementType::Inbound);
        assert_eq!(drafts[1].movement_type, MovementType::Outbound);
        assert_eq!(drafts[1].metadata.storekeeper_id, Some(storekeeper));
    }
}
