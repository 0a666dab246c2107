#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use stockbook::{
    db::{check_connection, establish_connection_with_config, run_migrations, DbConfig, DbPool},
    entities::{
        inventory_record::{self, InventoryStatus, StockType},
        purchase, sale,
    },
    events::{Event, EventSender},
    services::{
        drain::{DrainPolicy, FreeStockOnly},
        factory::{ServiceContainer, ServiceFactory},
    },
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use uuid::Uuid;

pub const TEST_DUPLICATE_WINDOW_SECS: i64 = 60;

/// Harness holding a fresh on-disk SQLite database and one wired service
/// container. The database lives inside a temp dir that disappears with
/// the harness.
pub struct TestCtx {
    pub db_pool: Arc<DbPool>,
    pub services: ServiceContainer,
    pub events: mpsc::Receiver<Event>,
    pub _dir: TempDir,
}

impl TestCtx {
    pub async fn new() -> Self {
        Self::with_policy(Arc::new(FreeStockOnly)).await
    }

    pub async fn with_policy(policy: Arc<dyn DrainPolicy>) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let db_path = dir.path().join("stockbook_test.db");

        let config = DbConfig {
            url: format!("sqlite://{}?mode=rwc", db_path.display()),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        };
        let pool = establish_connection_with_config(&config)
            .await
            .expect("connect test database");
        check_connection(&pool).await.expect("ping test database");
        run_migrations(&pool).await.expect("run migrations");
        let db_pool = Arc::new(pool);

        let (tx, rx) = mpsc::channel(1024);
        let factory = ServiceFactory::new(
            db_pool.clone(),
            EventSender::new(tx),
            policy,
            Duration::seconds(TEST_DUPLICATE_WINDOW_SECS),
            std::time::Duration::from_secs(2),
        );
        let services = ServiceContainer::new(&factory);

        Self {
            db_pool,
            services,
            events: rx,
            _dir: dir,
        }
    }

    /// Everything queued on the event channel so far.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Inserts a plain stock record fixture.
pub async fn seed_record(db: &DbPool, product_id: i32, quantity: i32) -> inventory_record::Model {
    seed_record_full(db, product_id, quantity, 0, 0, StockType::Stock).await
}

pub async fn seed_record_full(
    db: &DbPool,
    product_id: i32,
    quantity: i32,
    reserved_quantity: i32,
    safety_stock: i32,
    stock_type: StockType,
) -> inventory_record::Model {
    inventory_record::ActiveModel {
        id: Set(Uuid::new_v4()),
        product_id: Set(product_id),
        quantity: Set(quantity),
        reserved_quantity: Set(reserved_quantity),
        safety_stock: Set(safety_stock),
        status: Set(InventoryStatus::derive(quantity, safety_stock)),
        stock_type: Set(stock_type),
        is_deleted: Set(false),
        version: Set(1),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("seed inventory record")
}

/// Inserts a sale row with an explicit creation time, bypassing the
/// service layer. Used to position documents inside or outside the
/// duplicate window.
pub async fn seed_sale_at(
    db: &DbPool,
    product_id: i32,
    quantity: i32,
    unit_price: Decimal,
    created_at: DateTime<Utc>,
) -> sale::Model {
    sale::ActiveModel {
        id: Set(Uuid::new_v4()),
        product_id: Set(product_id),
        quantity: Set(quantity),
        unit_price: Set(unit_price),
        total_amount: Set(unit_price * Decimal::from(quantity)),
        is_deleted: Set(false),
        created_at: Set(created_at),
        updated_at: Set(created_at),
    }
    .insert(db)
    .await
    .expect("seed sale")
}

pub async fn seed_purchase_at(
    db: &DbPool,
    product_id: i32,
    quantity: i32,
    unit_price: Decimal,
    created_at: DateTime<Utc>,
) -> purchase::Model {
    purchase::ActiveModel {
        id: Set(Uuid::new_v4()),
        product_id: Set(product_id),
        quantity: Set(quantity),
        unit_price: Set(unit_price),
        total_amount: Set(unit_price * Decimal::from(quantity)),
        supplier_name: Set(None),
        is_deleted: Set(false),
        created_at: Set(created_at),
        updated_at: Set(created_at),
    }
    .insert(db)
    .await
    .expect("seed purchase")
}
