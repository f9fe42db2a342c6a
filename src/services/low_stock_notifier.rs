//! Low-stock detection and alert dispatch.
//!
//! Detection reads through whatever connection the caller holds, so it sees the caller's own
//! uncommitted writes. Dispatch happens separately, once the caller knows its work committed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, EntityTrait};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::entities::{location_stock, product};
use crate::events::{Event, EventSender};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockAlert {
    pub product_id: Uuid,
    pub location_id: Uuid,
    pub product_name: String,
    pub stock: i32,
    pub minimum_stock: i32,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("notification sink unavailable: {0}")]
    SinkUnavailable(String),
    #[error("stock lookup failed: {0}")]
    Lookup(#[from] DbErr),
}

/// Destination for low-stock alerts.
#[async_trait]
pub trait LowStockSink: Send + Sync {
    async fn deliver(&self, alert: &LowStockAlert) -> Result<(), NotificationError>;
}

/// Publishes alerts on the in-process event channel.
pub struct EventChannelSink {
    sender: EventSender,
}

impl EventChannelSink {
    pub fn new(sender: EventSender) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl LowStockSink for EventChannelSink {
    async fn deliver(&self, alert: &LowStockAlert) -> Result<(), NotificationError> {
        self.sender
            .send(Event::LowStockDetected {
                product_id: alert.product_id,
                location_id: alert.location_id,
                product_name: alert.product_name.clone(),
                stock: alert.stock,
                minimum_stock: alert.minimum_stock,
                detected_at: alert.detected_at,
            })
            .await
            .map_err(|e| NotificationError::SinkUnavailable(e.to_string()))
    }
}

/// Writes alerts to the log only.
pub struct LogSink;

#[async_trait]
impl LowStockSink for LogSink {
    async fn deliver(&self, alert: &LowStockAlert) -> Result<(), NotificationError> {
        warn!(
            product_id = %alert.product_id,
            location_id = %alert.location_id,
            stock = alert.stock,
            minimum_stock = alert.minimum_stock,
            "Low stock alert for {}",
            alert.product_name
        );
        Ok(())
    }
}

pub struct LowStockNotifier {
    db_pool: Arc<DatabaseConnection>,
    sink: Arc<dyn LowStockSink>,
}

impl LowStockNotifier {
    pub fn new(db_pool: Arc<DatabaseConnection>, sink: Arc<dyn LowStockSink>) -> Self {
        Self { db_pool, sink }
    }

    /// Returns an alert when the row's stock is at or below its minimum.
    pub async fn evaluate<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        location_id: Uuid,
    ) -> Result<Option<LowStockAlert>, NotificationError> {
        let Some(row) = location_stock::Entity::find_by_id((product_id, location_id))
            .one(conn)
            .await?
        else {
            return Ok(None);
        };

        if !row.is_low() {
            return Ok(None);
        }

        let product_name = product::Entity::find_by_id(product_id)
            .one(conn)
            .await?
            .map(|p| p.name)
            .unwrap_or_else(|| product_id.to_string());

        Ok(Some(LowStockAlert {
            product_id,
            location_id,
            product_name,
            stock: row.stock,
            minimum_stock: row.minimum_stock,
            detected_at: Utc::now(),
        }))
    }

    /// Hands the alert to the sink. Failures are logged and swallowed.
    pub async fn notify(&self, alert: &LowStockAlert) {
        match self.sink.deliver(alert).await {
            Ok(()) => {
                counter!("inventory.low_stock.alerts", 1);
                debug!(product_id = %alert.product_id, "Low stock alert delivered");
            }
            Err(e) => {
                counter!("inventory.low_stock.delivery_failed", 1);
                warn!(
                    product_id = %alert.product_id,
                    location_id = %alert.location_id,
                    error = %e,
                    "Failed to deliver low stock alert"
                );
            }
        }
    }

    pub async fn notify_all(&self, alerts: &[&LowStockAlert]) {
        for alert in alerts {
            self.notify(alert).await;
        }
    }

    /// Re-reads the row from the pool and notifies when it is low. Never fails.
    #[instrument(skip(self))]
    pub async fn check_and_notify(&self, product_id: Uuid, location_id: Uuid) -> bool {
        match Self::evaluate(&*self.db_pool, product_id, location_id).await {
            Ok(Some(alert)) => {
                self.notify(&alert).await;
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "Low stock check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink;

    #[async_trait]
    impl LowStockSink for FailingSink {
        async fn deliver(&self, _alert: &LowStockAlert) -> Result<(), NotificationError> {
            Err(NotificationError::SinkUnavailable("offline".into()))
        }
    }

    fn alert() -> LowStockAlert {
        LowStockAlert {
            product_id: Uuid::new_v4(),
            location_id: Uuid::new_v4(),
            product_name: "Gloves".into(),
            stock: 1,
            minimum_stock: 5,
            detected_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn event_sink_publishes_low_stock_event() {
        let (sender, mut rx) = EventSender::channel(4);
        let sink = EventChannelSink::new(sender);
        let alert = alert();

        sink.deliver(&alert).await.unwrap();

        match rx.recv().await {
            Some(Event::LowStockDetected {
                product_id, stock, ..
            }) => {
                assert_eq!(product_id, alert.product_id);
                assert_eq!(stock, 1);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn delivery_failure_is_swallowed() {
        let db = Arc::new(DatabaseConnection::Disconnected);
        let notifier = LowStockNotifier::new(db, Arc::new(FailingSink));
        notifier.notify(&alert()).await;
    }
}
