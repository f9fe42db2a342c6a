// Ledger core
pub mod low_stock_notifier;
pub mod stock_ledger;

// Flows built on the ledger
pub mod batch_movements;
pub mod request_fulfillment;
pub mod stock_reservation;

// Boundary helpers
pub mod actors;

use std::sync::Arc;
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::{location_stock, movement, request};
use crate::errors::ServiceError;
use crate::events::EventSender;

use self::actors::ActorResolver;
use self::batch_movements::{BatchMovementInput, BatchMovementProcessor, BatchResult};
use self::low_stock_notifier::{LowStockNotifier, LowStockSink};
use self::request_fulfillment::{ApprovalOutcome, NewRequest, RequestDetails, RequestFulfillment};
use self::stock_ledger::{MovementDraft, StockLedger};
use self::stock_reservation::{ReservationManager, ReservationReceipt, ReserveStock};

/// Wires the ledger services over one pool and exposes the operations callers use.
#[derive(Clone)]
pub struct InventoryEngine {
    pub ledger: Arc<StockLedger>,
    pub notifier: Arc<LowStockNotifier>,
    pub requests: Arc<RequestFulfillment>,
    pub batches: Arc<BatchMovementProcessor>,
    pub reservations: Arc<ReservationManager>,
    pub actors: Arc<ActorResolver>,
}

impl InventoryEngine {
    pub fn new(
        db_pool: Arc<DbPool>,
        sink: Arc<dyn LowStockSink>,
        events: Option<EventSender>,
    ) -> Self {
        let notifier = Arc::new(LowStockNotifier::new(db_pool.clone(), sink));
        let ledger = Arc::new(StockLedger::new(
            db_pool.clone(),
            notifier.clone(),
            events.clone(),
        ));

        Self {
            requests: Arc::new(RequestFulfillment::new(
                db_pool.clone(),
                ledger.clone(),
                events.clone(),
            )),
            batches: Arc::new(BatchMovementProcessor::new(
                db_pool.clone(),
                ledger.clone(),
                events.clone(),
            )),
            reservations: Arc::new(ReservationManager::new(db_pool.clone(), events)),
            actors: Arc::new(ActorResolver::new(db_pool)),
            notifier,
            ledger,
        }
    }

    pub async fn approve_request(
        &self,
        request_id: Uuid,
        storekeeper_id: Option<Uuid>,
        note: Option<String>,
    ) -> Result<ApprovalOutcome, ServiceError> {
        self.requests.approve(request_id, storekeeper_id, note).await
    }

    pub async fn reject_request(
        &self,
        request_id: Uuid,
        reason: String,
        actor_id: Option<Uuid>,
    ) -> Result<request::Model, ServiceError> {
        self.requests.reject(request_id, reason, actor_id).await
    }

    pub async fn complete_request(
        &self,
        request_id: Uuid,
        actor_id: Option<Uuid>,
    ) -> Result<request::Model, ServiceError> {
        self.requests.complete(request_id, actor_id).await
    }

    pub async fn create_request(&self, input: NewRequest) -> Result<RequestDetails, ServiceError> {
        self.requests.create_request(input).await
    }

    pub async fn get_request(&self, request_id: Uuid) -> Result<RequestDetails, ServiceError> {
        self.requests.get_request(request_id).await
    }

    pub async fn apply_batch_movements(
        &self,
        movements: Vec<BatchMovementInput>,
        storekeeper_id: Option<Uuid>,
    ) -> Result<BatchResult, ServiceError> {
        self.batches.apply_batch(movements, storekeeper_id).await
    }

    pub async fn record_movement(
        &self,
        draft: MovementDraft,
    ) -> Result<movement::Model, ServiceError> {
        self.ledger.apply_movement(draft).await
    }

    pub async fn stock_level(
        &self,
        product_id: Uuid,
        location_id: Uuid,
    ) -> Result<location_stock::Model, ServiceError> {
        self.ledger.get_stock_level(product_id, location_id).await
    }

    pub async fn reserve_stock(
        &self,
        input: ReserveStock,
    ) -> Result<ReservationReceipt, ServiceError> {
        self.reservations.reserve(input).await
    }

    pub async fn release_reservation(
        &self,
        product_id: Uuid,
        request_id: Uuid,
    ) -> Result<u64, ServiceError> {
        self.reservations.release(product_id, request_id).await
    }
}
