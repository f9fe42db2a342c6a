use crate::config::AppConfig;
use crate::entities::location_stock;
use crate::errors::ServiceError;
use metrics::{counter, gauge};
use sea_orm::{
    sea_query::Expr, ConnectOptions, ConnectionTrait, Database, DatabaseConnection,
    DatabaseTransaction, DbBackend, EntityTrait, QueryFilter, TransactionTrait,
};
use sea_orm_migration::MigratorTrait;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Configuration for database connection
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum number of connections
    pub max_connections: u32,
    /// Minimum number of connections
    pub min_connections: u32,
    /// Connection timeout duration
    pub connect_timeout: Duration,
    /// Idle timeout duration
    pub idle_timeout: Duration,
    /// Acquire connection timeout
    pub acquire_timeout: Duration,
    /// Log every statement through sqlx
    pub sqlx_logging: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            acquire_timeout: Duration::from_secs(8),
            sqlx_logging: true,
        }
    }
}

impl From<&AppConfig> for DbConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            url: cfg.database_url.clone(),
            max_connections: cfg.db_max_connections,
            min_connections: cfg.db_min_connections,
            connect_timeout: Duration::from_secs(cfg.db_connect_timeout_secs),
            idle_timeout: Duration::from_secs(cfg.db_idle_timeout_secs),
            acquire_timeout: Duration::from_secs(cfg.db_acquire_timeout_secs),
            sqlx_logging: !cfg.is_production(),
        }
    }
}

/// Establishes a connection pool to the database with custom configuration
pub async fn establish_connection_with_config(config: &DbConfig) -> Result<DbPool, ServiceError> {
    debug!("Configuring database connection with: {:?}", config);

    let mut opt = ConnectOptions::new(config.url.clone());

    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .sqlx_logging(config.sqlx_logging);

    gauge!("inventory_db.max_connections", config.max_connections as f64);

    info!(
        "Connecting to database with max_connections={}",
        config.max_connections
    );

    let db_pool = Database::connect(opt).await.map_err(|e| {
        error!(error = %e, "Database connection establishment failed");
        ServiceError::DatabaseError(e)
    })?;

    info!("Database connection pool established successfully");

    Ok(db_pool)
}

/// Establish DB pool using AppConfig tuning
pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, ServiceError> {
    let db_cfg: DbConfig = cfg.into();
    establish_connection_with_config(&db_cfg).await
}

/// Opens a transaction that is going to write.
///
/// SQLite begins transactions deferred, and one that has already read cannot upgrade to a
/// write lock while another writer is active: it fails with BUSY instead of waiting. On SQLite
/// the first statement therefore claims the write lock, so competing writers queue on the busy
/// timeout. Other backends rely on row locks taken later in the transaction.
pub async fn begin_write(pool: &DbPool) -> Result<DatabaseTransaction, ServiceError> {
    let txn = pool.begin().await.map_err(ServiceError::db_error)?;

    if txn.get_database_backend() == DbBackend::Sqlite {
        location_stock::Entity::update_many()
            .col_expr(
                location_stock::Column::Version,
                Expr::col(location_stock::Column::Version).into(),
            )
            .filter(Expr::val(1).eq(0))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;
    }

    Ok(txn)
}

/// Commits `txn` when `result` is Ok, rolls it back otherwise.
///
/// A failed commit surfaces as a storage failure; a failed rollback is only logged
/// because the original error is the one the caller needs to see.
pub async fn commit_or_rollback<T>(
    txn: DatabaseTransaction,
    operation: &'static str,
    result: Result<T, ServiceError>,
) -> Result<T, ServiceError> {
    match result {
        Ok(value) => {
            txn.commit().await.map_err(|e| {
                error!(operation, error = %e, "Transaction commit failed");
                counter!("inventory_db.transaction.commit_failed", 1, "operation" => operation);
                ServiceError::db_error(e)
            })?;
            counter!("inventory_db.transaction.committed", 1, "operation" => operation);
            debug!(operation, "Transaction committed");
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = txn.rollback().await {
                warn!(operation, error = %rollback_err, "Transaction rollback failed");
            }
            counter!("inventory_db.transaction.rolled_back", 1, "operation" => operation);
            debug!(operation, error = %err, "Transaction rolled back");
            Err(err)
        }
    }
}

/// Runs database migrations
pub async fn run_migrations(pool: &DbPool) -> Result<(), ServiceError> {
    info!("Running database migrations");
    let start = std::time::Instant::now();

    let result = crate::migrator::Migrator::up(pool, None)
        .await
        .map_err(ServiceError::DatabaseError);

    let elapsed = start.elapsed();
    match &result {
        Ok(_) => info!(
            "Database migrations completed successfully in {:?}",
            elapsed
        ),
        Err(e) => error!("Database migrations failed after {:?}: {}", elapsed, e),
    }

    result
}

/// Checks if the database connection is active
pub async fn check_connection(pool: &DbPool) -> Result<(), ServiceError> {
    debug!("Checking database connection");
    let start = std::time::Instant::now();

    let result = pool.ping().await.map_err(ServiceError::DatabaseError);

    let elapsed = start.elapsed();
    match &result {
        Ok(_) => {
            debug!("Database connection check successful in {:?}", elapsed);
            gauge!("inventory_db.connection_latency_ms", elapsed.as_millis() as f64);
        }
        Err(e) => {
            error!(
                "Database connection check failed after {:?}: {}",
                elapsed, e
            );
            counter!("inventory_db.connection_failures", 1);
        }
    }

    result
}

/// Closes the database connection pool
pub async fn close_pool(pool: DbPool) -> Result<(), ServiceError> {
    info!("Closing database connection pool");

    pool.close().await.map_err(ServiceError::DatabaseError)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config() -> DbConfig {
        DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            sqlx_logging: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn connects_and_migrates_in_memory() {
        let pool = establish_connection_with_config(&memory_config())
            .await
            .expect("connect");
        run_migrations(&pool).await.expect("migrate");
        assert!(check_connection(&pool).await.is_ok());
    }

    #[tokio::test]
    async fn commit_or_rollback_passes_errors_through() {
        let pool = establish_connection_with_config(&memory_config())
            .await
            .expect("connect");

        let txn = pool.begin().await.expect("begin");
        let result: Result<(), _> = commit_or_rollback(
            txn,
            "test",
            Err(ServiceError::InvalidInput("nope".into())),
        )
        .await;
        assert!(matches!(result, Err(ServiceError::InvalidInput(_))));

        let txn = pool.begin().await.expect("begin");
        let value = commit_or_rollback(txn, "test", Ok(7)).await.expect("commit");
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn begin_write_opens_a_usable_transaction() {
        let pool = establish_connection_with_config(&memory_config())
            .await
            .expect("connect");
        run_migrations(&pool).await.expect("migrate");

        let txn = begin_write(&pool).await.expect("begin write");
        let rows = location_stock::Entity::find()
            .all(&txn)
            .await
            .expect("read inside write transaction");
        assert!(rows.is_empty());
        commit_or_rollback(txn, "test", Ok(())).await.expect("commit");
    }

    #[test]
    fn production_config_disables_statement_logging() {
        let mut cfg = AppConfig::new(
            "postgres://localhost/inventory".into(),
            "0.0.0.0".into(),
            8080,
            "production".into(),
        );
        cfg.db_max_connections = 25;
        let db_cfg = DbConfig::from(&cfg);
        assert!(!db_cfg.sqlx_logging);
        assert_eq!(db_cfg.max_connections, 25);
    }
}
