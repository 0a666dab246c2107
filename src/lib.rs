//! Stockbook
//!
//! Transactional inventory engine: keeps a per-product quantity ledger
//! correct under concurrent sale/purchase/adjustment traffic, guards
//! against duplicate submissions, records an immutable movement history,
//! and reconciles current stock against the sum of historical movements.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod migrator;
pub mod services;

pub mod prelude {
    pub use crate::config::{load_config, AppConfig};
    pub use crate::db::{create_db_pool, establish_connection, run_migrations, DbPool};
    pub use crate::entities::inventory_record::{InventoryStatus, StockType};
    pub use crate::entities::stock_movement::MovementType;
    pub use crate::errors::ServiceError;
    pub use crate::events::{Event, EventSender};
    pub use crate::services::adjustment::{AdjustmentOutcome, StockAdjustmentEngine};
    pub use crate::services::coordinator::{StoreScope, TransactionCoordinator};
    pub use crate::services::drain::{DrainPolicy, FreeStockOnly, ReservedFirst};
    pub use crate::services::duplicate_guard::{
        DuplicateSubmissionGuard, SubmissionCandidate, TransactionKind,
    };
    pub use crate::services::factory::{ServiceContainer, ServiceFactory};
    pub use crate::services::inventory_records::{InventoryRecordsService, RecordPatch};
    pub use crate::services::locks::ProductLockMap;
    pub use crate::services::movements::MovementLedger;
    pub use crate::services::purchases::{NewPurchase, PurchasesService};
    pub use crate::services::reconciliation::{ConsistencyReportItem, ReconciliationService};
    pub use crate::services::sales::{NewSale, SalesService};
}
