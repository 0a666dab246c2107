use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_inventory_records_table::Migration),
            Box::new(m20240101_000002_create_stock_movements_table::Migration),
            Box::new(m20240101_000003_create_sales_table::Migration),
            Box::new(m20240101_000004_create_purchases_table::Migration),
        ]
    }
}

// Migration implementations

mod m20240101_000001_create_inventory_records_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_inventory_records_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Create inventory_records table aligned with entities::inventory_record Model
            manager
                .create_table(
                    Table::create()
                        .table(InventoryRecords::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryRecords::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryRecords::ProductId)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryRecords::Quantity)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(InventoryRecords::ReservedQuantity)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(InventoryRecords::SafetyStock)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(InventoryRecords::Status).string().not_null())
                        .col(
                            ColumnDef::new(InventoryRecords::StockType)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryRecords::IsDeleted)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(InventoryRecords::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(InventoryRecords::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryRecords::UpdatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // Useful indexes
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_inventory_records_product_id")
                        .table(InventoryRecords::Table)
                        .col(InventoryRecords::ProductId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_inventory_records_status")
                        .table(InventoryRecords::Table)
                        .col(InventoryRecords::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Drop inventory_records table
            manager
                .drop_table(Table::drop().table(InventoryRecords::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum InventoryRecords {
        Table,
        Id,
        ProductId,
        Quantity,
        ReservedQuantity,
        SafetyStock,
        Status,
        StockType,
        IsDeleted,
        Version,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000002_create_stock_movements_table {

    use sea_orm_migration::prelude::*;

    use super::m20240101_000001_create_inventory_records_table::InventoryRecords;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_stock_movements_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Create stock_movements table aligned with entities::stock_movement Model
            manager
                .create_table(
                    Table::create()
                        .table(StockMovements::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockMovements::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockMovements::InventoryId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockMovements::MovementType)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockMovements::Quantity)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockMovements::PreviousQuantity)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockMovements::NewQuantity)
                                .integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockMovements::Reason).string().not_null())
                        .col(ColumnDef::new(StockMovements::Notes).string().null())
                        .col(
                            ColumnDef::new(StockMovements::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_stock_movements_inventory_id")
                                .from(StockMovements::Table, StockMovements::InventoryId)
                                .to(InventoryRecords::Table, InventoryRecords::Id)
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
                        .name("idx_stock_movements_inventory_id_created_at")
                        .table(StockMovements::Table)
                        .col(StockMovements::InventoryId)
                        .col(StockMovements::CreatedAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Drop stock_movements table
            manager
                .drop_table(Table::drop().table(StockMovements::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum StockMovements {
        Table,
        Id,
        InventoryId,
        MovementType,
        Quantity,
        PreviousQuantity,
        NewQuantity,
        Reason,
        Notes,
        CreatedAt,
    }
}

mod m20240101_000003_create_sales_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000003_create_sales_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Create sales table aligned with entities::sale Model
            manager
                .create_table(
                    Table::create()
                        .table(Sales::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Sales::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Sales::ProductId).integer().not_null())
                        .col(ColumnDef::new(Sales::Quantity).integer().not_null())
                        .col(ColumnDef::new(Sales::UnitPrice).decimal().not_null())
                        .col(
                            ColumnDef::new(Sales::TotalAmount)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Sales::IsDeleted)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(Sales::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Sales::UpdatedAt).timestamp().not_null())
                        .to_owned(),
                )
                .await?;

            // Serves both the duplicate window query and reconciliation scans
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_sales_product_id_created_at")
                        .table(Sales::Table)
                        .col(Sales::ProductId)
                        .col(Sales::CreatedAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Drop sales table
            manager
                .drop_table(Table::drop().table(Sales::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Sales {
        Table,
        Id,
        ProductId,
        Quantity,
        UnitPrice,
        TotalAmount,
        IsDeleted,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000004_create_purchases_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000004_create_purchases_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Create purchases table aligned with entities::purchase Model
            manager
                .create_table(
                    Table::create()
                        .table(Purchases::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Purchases::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Purchases::ProductId).integer().not_null())
                        .col(ColumnDef::new(Purchases::Quantity).integer().not_null())
                        .col(ColumnDef::new(Purchases::UnitPrice).decimal().not_null())
                        .col(
                            ColumnDef::new(Purchases::TotalAmount)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Purchases::SupplierName).string().null())
                        .col(
                            ColumnDef::new(Purchases::IsDeleted)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(Purchases::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Purchases::UpdatedAt).timestamp().not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_purchases_product_id_created_at")
                        .table(Purchases::Table)
                        .col(Purchases::ProductId)
                        .col(Purchases::CreatedAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Drop purchases table
            manager
                .drop_table(Table::drop().table(Purchases::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Purchases {
        Table,
        Id,
        ProductId,
        Quantity,
        UnitPrice,
        TotalAmount,
        SupplierName,
        IsDeleted,
        CreatedAt,
        UpdatedAt,
    }
}
