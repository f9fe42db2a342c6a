use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("event channel closed")]
    ChannelClosed,
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a sender together with the receiving end of a bounded channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), EventError> {
        self.sender
            .send(event)
            .await
            .map_err(|_| EventError::ChannelClosed)
    }

    /// Sends an event, logging instead of failing when the channel is gone.
    pub async fn send_or_log(&self, event: Event) {
        let name = event.name();
        if let Err(e) = self.send(event).await {
            warn!(event = name, error = %e, "Dropping event");
        }
    }
}

/// Things that happened to the ledger, published after the owning transaction committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    MovementRecorded {
        movement_id: Uuid,
        product_id: Uuid,
        location_id: Uuid,
        movement_type: String,
        quantity: i32,
        resulting_stock: i32,
    },
    LowStockDetected {
        product_id: Uuid,
        location_id: Uuid,
        product_name: String,
        stock: i32,
        minimum_stock: i32,
        detected_at: DateTime<Utc>,
    },
    RequestApproved {
        request_id: Uuid,
        partial: bool,
        movements_created: usize,
    },
    RequestRejected {
        request_id: Uuid,
        reason: String,
    },
    RequestCompleted(Uuid),
    BatchApplied {
        applied_count: usize,
    },
    StockReserved {
        reservation_id: Uuid,
        product_id: Uuid,
        request_id: Uuid,
        quantity: i32,
    },
    ReservationReleased {
        product_id: Uuid,
        request_id: Uuid,
        released_count: u64,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::MovementRecorded { .. } => "movement_recorded",
            Event::LowStockDetected { .. } => "low_stock_detected",
            Event::RequestApproved { .. } => "request_approved",
            Event::RequestRejected { .. } => "request_rejected",
            Event::RequestCompleted(_) => "request_completed",
            Event::BatchApplied { .. } => "batch_applied",
            Event::StockReserved { .. } => "stock_reserved",
            Event::ReservationReleased { .. } => "reservation_released",
        }
    }
}

// Handlers registered with `process_events` see every event after it is logged.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: &Event) -> Result<(), String>;
}

/// Drains the channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, handlers: Vec<Arc<dyn EventHandler>>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::LowStockDetected {
                product_id,
                location_id,
                product_name,
                stock,
                minimum_stock,
                ..
            } => {
                warn!(
                    %product_id,
                    %location_id,
                    stock,
                    minimum_stock,
                    "Low stock: {} is at or below its minimum",
                    product_name
                );
            }
            Event::MovementRecorded {
                movement_id,
                product_id,
                movement_type,
                quantity,
                resulting_stock,
                ..
            } => {
                info!(
                    %movement_id,
                    %product_id,
                    movement_type = movement_type.as_str(),
                    quantity,
                    resulting_stock,
                    "Movement recorded"
                );
            }
            Event::RequestApproved {
                request_id,
                partial,
                movements_created,
            } => {
                if *partial {
                    warn!(%request_id, movements_created, "Request partially approved");
                } else {
                    info!(%request_id, movements_created, "Request approved");
                }
            }
            other => info!(event = other.name(), "Received event: {:?}", other),
        }

        for handler in &handlers {
            if let Err(e) = handler.handle_event(&event).await {
                error!(event = event.name(), error = %e, "Event handler failed");
            }
        }
    }

    warn!("Event processing loop has ended");
}
