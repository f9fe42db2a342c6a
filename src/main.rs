use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tracing::{error, info, warn};

use inventory_ledger as ledger;
use ledger::events::EventSender;
use ledger::services::low_stock_notifier::{EventChannelSink, LogSink, LowStockSink};

const EVENT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = ledger::config::load_config().context("failed to load configuration")?;
    ledger::config::init_tracing(cfg.log_level(), cfg.log_json);

    if std::env::args().nth(1).as_deref() == Some("migrate") {
        return ledger::migrator::run_migration(&cfg.database_url).await;
    }

    let db_pool = ledger::db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to the database")?;
    if cfg.auto_migrate {
        ledger::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    let (event_sender, event_rx) = EventSender::channel(cfg.event_channel_capacity);
    let events_task = tokio::spawn(ledger::events::process_events(event_rx, Vec::new()));

    let sink: Arc<dyn LowStockSink> = match cfg.low_stock_sink.as_str() {
        "log" => Arc::new(LogSink),
        _ => Arc::new(EventChannelSink::new(event_sender.clone())),
    };
    info!(sink = cfg.low_stock_sink.as_str(), "Low stock alerts configured");

    let app_state = Arc::new(ledger::AppState::new(
        db_arc.clone(),
        cfg.clone(),
        event_sender,
        sink,
    ));
    let app = ledger::app_router(app_state);

    let addr = cfg.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("inventory-ledger listening on http://{}", addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Dropping the router released every sender; give the event loop a moment to drain.
    match tokio::time::timeout(EVENT_DRAIN_TIMEOUT, events_task).await {
        Ok(Err(e)) => warn!("Event loop ended abnormally: {}", e),
        Err(_) => warn!("Event loop still running at shutdown"),
        Ok(Ok(())) => {}
    }
    if let Ok(pool) = Arc::try_unwrap(db_arc) {
        ledger::db::close_pool(pool).await?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
