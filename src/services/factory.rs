use chrono::Duration;
use std::sync::Arc;

use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    services::{
        adjustment::StockAdjustmentEngine,
        drain::{DrainPolicy, FreeStockOnly},
        inventory_records::InventoryRecordsService,
        locks::ProductLockMap,
        movements::MovementLedger,
        purchases::PurchasesService,
        reconciliation::ReconciliationService,
        sales::SalesService,
    },
};

/// Builds service instances over one shared set of dependencies.
///
/// Every service built by one factory shares the same product lock map, so
/// per-product serialization covers all write paths together rather than
/// each service's own.
pub struct ServiceFactory {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
    locks: ProductLockMap,
    engine: Arc<StockAdjustmentEngine>,
    duplicate_window: Duration,
    lock_wait: std::time::Duration,
}

impl ServiceFactory {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: EventSender,
        policy: Arc<dyn DrainPolicy>,
        duplicate_window: Duration,
        lock_wait: std::time::Duration,
    ) -> Self {
        let locks = ProductLockMap::new();
        let engine = Arc::new(StockAdjustmentEngine::new(
            db_pool.clone(),
            event_sender.clone(),
            locks.clone(),
            policy,
            lock_wait,
        ));
        Self {
            db_pool,
            event_sender,
            locks,
            engine,
            duplicate_window,
            lock_wait,
        }
    }

    /// A factory configured from application settings, draining free stock
    /// only.
    pub fn from_config(
        db_pool: Arc<DbPool>,
        event_sender: EventSender,
        config: &AppConfig,
    ) -> Self {
        Self::new(
            db_pool,
            event_sender,
            Arc::new(FreeStockOnly),
            config.duplicate_window(),
            config.lock_wait(),
        )
    }

    pub fn adjustment_engine(&self) -> Arc<StockAdjustmentEngine> {
        self.engine.clone()
    }

    pub fn movement_ledger(&self) -> MovementLedger {
        MovementLedger::new(self.db_pool.clone())
    }

    pub fn sales_service(&self) -> SalesService {
        SalesService::new(
            self.db_pool.clone(),
            self.engine.clone(),
            self.locks.clone(),
            self.event_sender.clone(),
            self.duplicate_window,
            self.lock_wait,
        )
    }

    pub fn purchases_service(&self) -> PurchasesService {
        PurchasesService::new(
            self.db_pool.clone(),
            self.engine.clone(),
            self.locks.clone(),
            self.event_sender.clone(),
            self.duplicate_window,
            self.lock_wait,
        )
    }

    pub fn inventory_records_service(&self) -> InventoryRecordsService {
        InventoryRecordsService::new(
            self.db_pool.clone(),
            self.locks.clone(),
            self.event_sender.clone(),
            self.lock_wait,
        )
    }

    pub fn reconciliation_service(&self) -> ReconciliationService {
        ReconciliationService::new(self.db_pool.clone(), self.event_sender.clone())
    }

    pub fn db_pool(&self) -> &Arc<DbPool> {
        &self.db_pool
    }

    pub fn event_sender(&self) -> &EventSender {
        &self.event_sender
    }
}

/// Container holding one instance of every service.
#[derive(Clone)]
pub struct ServiceContainer {
    pub engine: Arc<StockAdjustmentEngine>,
    pub ledger: Arc<MovementLedger>,
    pub records: Arc<InventoryRecordsService>,
    pub sales: Arc<SalesService>,
    pub purchases: Arc<PurchasesService>,
    pub reconciliation: Arc<ReconciliationService>,
}

impl ServiceContainer {
    pub fn new(factory: &ServiceFactory) -> Self {
        Self {
            engine: factory.adjustment_engine(),
            ledger: Arc::new(factory.movement_ledger()),
            records: Arc::new(factory.inventory_records_service()),
            sales: Arc::new(factory.sales_service()),
            purchases: Arc::new(factory.purchases_service()),
            reconciliation: Arc::new(factory.reconciliation_service()),
        }
    }
}
