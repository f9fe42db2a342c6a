//! Inventory ledger
//!
//! Per-location stock with an append-only movement ledger, withdrawal requests with partial
//! fulfillment, all-or-nothing batch movements, stock reservations and low-stock alerts.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod services;

use axum::Router;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::events::EventSender;
use crate::services::low_stock_notifier::LowStockSink;
use crate::services::InventoryEngine;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: EventSender,
    pub engine: InventoryEngine,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: EventSender,
        sink: Arc<dyn LowStockSink>,
    ) -> Self {
        let engine = InventoryEngine::new(db.clone(), sink, Some(event_sender.clone()));
        Self {
            db,
            config,
            event_sender,
            engine,
        }
    }
}

/// Every HTTP route, with request tracing and a per-request timeout.
pub fn app_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/health", handlers::health::health_routes())
        .merge(handlers::stock::routes())
        .merge(handlers::movements::routes())
        .merge(handlers::requests::routes())
        .merge(handlers::reservations::routes())
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state)
}
