#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use inventory_ledger::{
    app_router,
    config::AppConfig,
    db::{self, DbConfig},
    entities::{location, movement::MovementType, product, user},
    events::{self, Event, EventHandler, EventSender},
    services::{
        low_stock_notifier::{LowStockAlert, LowStockSink, NotificationError},
        request_fulfillment::{NewRequest, NewRequestItem},
        stock_ledger::MovementDraft,
        InventoryEngine,
    },
    AppState,
};
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use tempfile::{tempdir, TempDir};
use tower::ServiceExt;
use uuid::Uuid;

/// Low-stock sink that keeps every alert it receives.
#[derive(Default)]
pub struct RecordingSink {
    alerts: Mutex<Vec<LowStockAlert>>,
}

impl RecordingSink {
    pub fn alerts(&self) -> Vec<LowStockAlert> {
        self.alerts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LowStockSink for RecordingSink {
    async fn deliver(&self, alert: &LowStockAlert) -> Result<(), NotificationError> {
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

/// Event handler that keeps every event the loop processed.
#[derive(Default)]
pub struct EventRecorder {
    events: Mutex<Vec<Event>>,
}

impl EventRecorder {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventHandler for EventRecorder {
    async fn handle_event(&self, event: &Event) -> Result<(), String> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Application state over a fresh SQLite database.
pub struct TestApp {
    router: Router,
    pub state: Arc<AppState>,
    pub sink: Arc<RecordingSink>,
    pub recorder: Arc<EventRecorder>,
    _event_task: tokio::task::JoinHandle<()>,
    _temp_dir: Option<TempDir>,
}

impl TestApp {
    /// In-memory database behind a single connection: in-memory SQLite databases are per
    /// connection, so concurrent transactions queue at the pool.
    pub async fn new() -> Self {
        Self::with_database("sqlite::memory:".to_string(), 1, None).await
    }

    /// Database file in a temp directory behind `connections` pooled connections, so
    /// concurrent transactions really overlap.
    pub async fn file_backed(connections: u32) -> Self {
        let temp_dir = tempdir().expect("create temp dir");
        let url = format!(
            "sqlite://{}?mode=rwc",
            temp_dir.path().join("inventory.db").display()
        );
        Self::with_database(url, connections, Some(temp_dir)).await
    }

    async fn with_database(url: String, connections: u32, temp_dir: Option<TempDir>) -> Self {
        let cfg = AppConfig::new(url, "127.0.0.1".to_string(), 18_080, "test".to_string());

        let pool = db::establish_connection_with_config(&DbConfig {
            url: cfg.database_url.clone(),
            max_connections: connections,
            min_connections: 1,
            sqlx_logging: false,
            ..Default::default()
        })
        .await
        .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_sender, event_rx) = EventSender::channel(256);
        let recorder = Arc::new(EventRecorder::default());
        let event_task = tokio::spawn(events::process_events(
            event_rx,
            vec![recorder.clone() as Arc<dyn EventHandler>],
        ));

        let sink = Arc::new(RecordingSink::default());
        let state = Arc::new(AppState::new(
            Arc::new(pool),
            cfg,
            event_sender,
            sink.clone(),
        ));

        Self {
            router: app_router(state.clone()),
            state,
            sink,
            recorder,
            _event_task: event_task,
            _temp_dir: temp_dir,
        }
    }

    pub fn engine(&self) -> &InventoryEngine {
        &self.state.engine
    }

    pub async fn create_product(&self, name: &str) -> Uuid {
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            sku: Set(format!("SKU-{}", Uuid::new_v4().simple())),
            name: Set(name.to_string()),
            unit: Set("unit".to_string()),
            category_id: Set(None),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("insert product")
        .id
    }

    pub async fn create_location(&self, name: &str) -> Uuid {
        location::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
        }
        .insert(&*self.state.db)
        .await
        .expect("insert location")
        .id
    }

    pub async fn create_user(&self, full_name: &str) -> Uuid {
        user::ActiveModel {
            id: Set(Uuid::new_v4()),
            full_name: Set(full_name.to_string()),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("insert user")
        .id
    }

    /// Brings a product's stock at a location up from zero with an inbound movement.
    pub async fn stock(&self, product_id: Uuid, location_id: Uuid, quantity: i32) {
        self.engine()
            .record_movement(MovementDraft::new(
                product_id,
                location_id,
                MovementType::Inbound,
                quantity,
            ))
            .await
            .expect("seed stock");
    }

    pub async fn set_minimum(&self, product_id: Uuid, location_id: Uuid, minimum: i32) {
        self.engine()
            .ledger
            .set_minimum_stock(product_id, location_id, minimum)
            .await
            .expect("set minimum");
    }

    pub async fn stock_of(&self, product_id: Uuid, location_id: Uuid) -> i32 {
        self.engine()
            .ledger
            .get_stock(product_id, location_id)
            .await
            .expect("stock row")
    }

    /// Creates a pending request for `items` as (product, quantity) pairs.
    pub async fn create_request(&self, location_id: Uuid, items: &[(Uuid, i32)]) -> Uuid {
        self.engine()
            .create_request(NewRequest {
                requester_id: None,
                supervisor_id: None,
                location_id,
                items: items
                    .iter()
                    .map(|&(product_id, quantity)| NewRequestItem {
                        product_id,
                        quantity,
                    })
                    .collect(),
            })
            .await
            .expect("create request")
            .request
            .id
    }

    /// Send a JSON request through the router.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Sends a request and decodes the JSON response body.
    pub async fn request_json(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let response = self.request(method, uri, body).await;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read response body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("response body is JSON")
        };
        (status, value)
    }

    /// Waits until the event loop has caught up with everything sent so far.
    pub async fn settle_events(&self) {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}
