use anyhow::Result;
use sea_orm::{ConnectOptions, Database};
use sea_orm_migration::prelude::*;
use std::time::Duration;
use tracing::{error, info};

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_catalog_tables::Migration),
            Box::new(m20240101_000002_create_location_stock_table::Migration),
            Box::new(m20240101_000003_create_movements_table::Migration),
            Box::new(m20240101_000004_create_requests_tables::Migration),
            Box::new(m20240101_000005_create_stock_reservations_table::Migration),
        ]
    }
}

mod m20240101_000001_create_catalog_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_catalog_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Products::Id).uuid().primary_key().not_null())
                        .col(
                            ColumnDef::new(Products::Sku)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Products::Name).string().not_null())
                        .col(ColumnDef::new(Products::Unit).string().not_null())
                        .col(ColumnDef::new(Products::CategoryId).uuid().null())
                        .col(
                            ColumnDef::new(Products::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Locations::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Locations::Id).uuid().primary_key().not_null())
                        .col(
                            ColumnDef::new(Locations::Name)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Users::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Users::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Users::FullName).string().not_null())
                        .col(
                            ColumnDef::new(Users::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_users_full_name")
                        .table(Users::Table)
                        .col(Users::FullName)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Users::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Locations::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Products {
        Table,
        Id,
        Sku,
        Name,
        Unit,
        CategoryId,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    pub(super) enum Locations {
        Table,
        Id,
        Name,
    }

    #[derive(DeriveIden)]
    enum Users {
        Table,
        Id,
        FullName,
        CreatedAt,
    }
}

mod m20240101_000002_create_location_stock_table {

    use super::m20240101_000001_create_catalog_tables::{Locations, Products};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_location_stock_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Stock may never go negative; the guarded decrement relies on this as a backstop.
            manager
                .create_table(
                    Table::create()
                        .table(LocationStock::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(LocationStock::ProductId).uuid().not_null())
                        .col(ColumnDef::new(LocationStock::LocationId).uuid().not_null())
                        .col(
                            ColumnDef::new(LocationStock::Stock)
                                .integer()
                                .not_null()
                                .default(0)
                                .check(Expr::col(LocationStock::Stock).gte(0)),
                        )
                        .col(
                            ColumnDef::new(LocationStock::MinimumStock)
                                .integer()
                                .not_null()
                                .default(0)
                                .check(Expr::col(LocationStock::MinimumStock).gte(0)),
                        )
                        .col(
                            ColumnDef::new(LocationStock::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(LocationStock::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .primary_key(
                            Index::create()
                                .col(LocationStock::ProductId)
                                .col(LocationStock::LocationId),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_location_stock_product_id")
                                .from(LocationStock::Table, LocationStock::ProductId)
                                .to(Products::Table, Products::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_location_stock_location_id")
                                .from(LocationStock::Table, LocationStock::LocationId)
                                .to(Locations::Table, Locations::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_location_stock_location_id")
                        .table(LocationStock::Table)
                        .col(LocationStock::LocationId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(LocationStock::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum LocationStock {
        Table,
        ProductId,
        LocationId,
        Stock,
        MinimumStock,
        Version,
        UpdatedAt,
    }
}

mod m20240101_000003_create_movements_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000003_create_movements_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Movements point at the stock row they changed, so a stocked row can't be dropped
            // while its history exists. Actor columns carry no foreign keys.
            manager
                .create_table(
                    Table::create()
                        .table(Movements::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Movements::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Movements::ProductId).uuid().not_null())
                        .col(ColumnDef::new(Movements::LocationId).uuid().not_null())
                        .col(ColumnDef::new(Movements::MovementType).string().not_null())
                        .col(
                            ColumnDef::new(Movements::Quantity)
                                .integer()
                                .not_null()
                                .check(Expr::col(Movements::Quantity).gt(0)),
                        )
                        .col(ColumnDef::new(Movements::SupervisorId).uuid().null())
                        .col(ColumnDef::new(Movements::RequesterId).uuid().null())
                        .col(ColumnDef::new(Movements::StorekeeperId).uuid().null())
                        .col(ColumnDef::new(Movements::Reference).string().null())
                        .col(ColumnDef::new(Movements::PreviousStock).integer().not_null())
                        .col(ColumnDef::new(Movements::ResultingStock).integer().not_null())
                        .col(
                            ColumnDef::new(Movements::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_movements_location_stock")
                                .from_tbl(Movements::Table)
                                .from_col(Movements::ProductId)
                                .from_col(Movements::LocationId)
                                .to_tbl(LocationStock::Table)
                                .to_col(LocationStock::ProductId)
                                .to_col(LocationStock::LocationId)
                                .on_delete(ForeignKeyAction::Restrict)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_movements_product_location")
                        .table(Movements::Table)
                        .col(Movements::ProductId)
                        .col(Movements::LocationId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_movements_created_at")
                        .table(Movements::Table)
                        .col(Movements::CreatedAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Movements::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Movements {
        Table,
        Id,
        ProductId,
        LocationId,
        MovementType,
        Quantity,
        SupervisorId,
        RequesterId,
        StorekeeperId,
        Reference,
        PreviousStock,
        ResultingStock,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum LocationStock {
        Table,
        ProductId,
        LocationId,
    }
}

mod m20240101_000004_create_requests_tables {

    use super::m20240101_000001_create_catalog_tables::{Locations, Products};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000004_create_requests_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Requests::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Requests::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Requests::RequesterId).uuid().null())
                        .col(ColumnDef::new(Requests::SupervisorId).uuid().null())
                        .col(ColumnDef::new(Requests::LocationId).uuid().not_null())
                        .col(
                            ColumnDef::new(Requests::Status)
                                .string()
                                .not_null()
                                .default("pending"),
                        )
                        .col(
                            ColumnDef::new(Requests::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Requests::ProcessedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(Requests::ProcessedBy).uuid().null())
                        .col(ColumnDef::new(Requests::RejectionReason).string().null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_requests_location_id")
                                .from(Requests::Table, Requests::LocationId)
                                .to(Locations::Table, Locations::Id)
                                .on_delete(ForeignKeyAction::Restrict)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_requests_status")
                        .table(Requests::Table)
                        .col(Requests::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(RequestItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(RequestItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(RequestItems::RequestId).uuid().not_null())
                        .col(ColumnDef::new(RequestItems::ProductId).uuid().not_null())
                        .col(
                            ColumnDef::new(RequestItems::Quantity)
                                .integer()
                                .not_null()
                                .check(Expr::col(RequestItems::Quantity).gt(0)),
                        )
                        .col(
                            ColumnDef::new(RequestItems::Position)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_request_items_request_id")
                                .from(RequestItems::Table, RequestItems::RequestId)
                                .to(Requests::Table, Requests::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_request_items_product_id")
                                .from(RequestItems::Table, RequestItems::ProductId)
                                .to(Products::Table, Products::Id)
                                .on_delete(ForeignKeyAction::Restrict)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_request_items_request_id")
                        .table(RequestItems::Table)
                        .col(RequestItems::RequestId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(RequestItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Requests::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Requests {
        Table,
        Id,
        RequesterId,
        SupervisorId,
        LocationId,
        Status,
        CreatedAt,
        ProcessedAt,
        ProcessedBy,
        RejectionReason,
    }

    #[derive(DeriveIden)]
    enum RequestItems {
        Table,
        Id,
        RequestId,
        ProductId,
        Quantity,
        Position,
    }
}

mod m20240101_000005_create_stock_reservations_table {

    use super::m20240101_000001_create_catalog_tables::{Locations, Products};
    use super::m20240101_000004_create_requests_tables::Requests;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000005_create_stock_reservations_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(StockReservations::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockReservations::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockReservations::ProductId).uuid().not_null())
                        .col(ColumnDef::new(StockReservations::LocationId).uuid().not_null())
                        .col(
                            ColumnDef::new(StockReservations::Quantity)
                                .integer()
                                .not_null()
                                .check(Expr::col(StockReservations::Quantity).gt(0)),
                        )
                        .col(ColumnDef::new(StockReservations::RequestId).uuid().not_null())
                        .col(ColumnDef::new(StockReservations::Reason).string().not_null())
                        .col(
                            ColumnDef::new(StockReservations::Status)
                                .string()
                                .not_null()
                                .default("active"),
                        )
                        .col(
                            ColumnDef::new(StockReservations::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockReservations::ReleasedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_stock_reservations_product_id")
                                .from(StockReservations::Table, StockReservations::ProductId)
                                .to(Products::Table, Products::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_stock_reservations_location_id")
                                .from(StockReservations::Table, StockReservations::LocationId)
                                .to(Locations::Table, Locations::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_stock_reservations_request_id")
                                .from(StockReservations::Table, StockReservations::RequestId)
                                .to(Requests::Table, Requests::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_reservations_product_request")
                        .table(StockReservations::Table)
                        .col(StockReservations::ProductId)
                        .col(StockReservations::RequestId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockReservations::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum StockReservations {
        Table,
        Id,
        ProductId,
        LocationId,
        Quantity,
        RequestId,
        Reason,
        Status,
        CreatedAt,
        ReleasedAt,
    }
}

/// Standalone migration runner, used by `inventory-ledger migrate`.
pub async fn run_migration(db_url: &str) -> Result<()> {
    info!("Setting up database connection for migrations");

    let mut opt = ConnectOptions::new(db_url);
    opt.max_connections(2)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(30))
        .sqlx_logging(true);

    let db = Database::connect(opt).await?;

    info!("Running database migrations");

    match Migrator::up(&db, None).await {
        Ok(_) => {
            info!("Migrations completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Migration failed: {}", e);
            Err(e.into())
        }
    }
}
