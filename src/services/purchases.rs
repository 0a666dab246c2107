use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::purchase::{self, Entity as Purchase},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        adjustment::StockAdjustmentEngine,
        coordinator::{StoreScope, TransactionCoordinator},
        duplicate_guard::{DuplicateSubmissionGuard, SubmissionCandidate},
        locks::ProductLockMap,
    },
};

/// Movement reasons written by this service.
pub const PURCHASE_REASON: &str = "purchase";
pub const PURCHASE_UPDATED_REASON: &str = "purchase updated";
pub const PURCHASE_DELETED_REASON: &str = "purchase deleted";

/// Input for posting a purchase.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewPurchase {
    pub product_id: i32,
    #[validate(range(min = 1, message = "quantity must be at least 1"))]
    pub quantity: i32,
    #[validate(custom = "validate_unit_price")]
    pub unit_price: Decimal,
    #[validate(length(max = 255))]
    pub supplier_name: Option<String>,
}

fn validate_unit_price(unit_price: &Decimal) -> Result<(), validator::ValidationError> {
    if unit_price.is_sign_negative() {
        return Err(validator::ValidationError::new("negative_unit_price"));
    }
    Ok(())
}

/// Posts, amends and undoes purchases, keeping the stock ledger in step.
///
/// The first purchase for a product provisions its inventory record; a
/// deletion only goes through while the received stock is still on hand.
#[derive(Clone)]
pub struct PurchasesService {
    db_pool: Arc<DbPool>,
    engine: Arc<StockAdjustmentEngine>,
    guard: DuplicateSubmissionGuard,
    coordinator: TransactionCoordinator,
    locks: ProductLockMap,
    event_sender: EventSender,
    duplicate_window: Duration,
    lock_wait: std::time::Duration,
}

impl PurchasesService {
    pub fn new(
        db_pool: Arc<DbPool>,
        engine: Arc<StockAdjustmentEngine>,
        locks: ProductLockMap,
        event_sender: EventSender,
        duplicate_window: Duration,
        lock_wait: std::time::Duration,
    ) -> Self {
        Self {
            db_pool,
            engine,
            guard: DuplicateSubmissionGuard::new(),
            coordinator: TransactionCoordinator::new(),
            locks,
            event_sender,
            duplicate_window,
            lock_wait,
        }
    }

    /// Posts a purchase and books its quantity into stock, creating the
    /// inventory record if this is the product's first.
    ///
    /// Resubmitting an identical purchase inside the duplicate window fails
    /// with `DuplicateSubmission` before anything is written.
    #[instrument(skip(self))]
    pub async fn create_purchase(
        &self,
        new_purchase: NewPurchase,
    ) -> Result<purchase::Model, ServiceError> {
        new_purchase.validate()?;

        let _guard = self
            .locks
            .acquire(new_purchase.product_id, self.lock_wait)
            .await?;

        let guard = self.guard;
        let engine = self.engine.clone();
        let window = self.duplicate_window;
        let input = new_purchase.clone();
        let (row, outcome) = self
            .coordinator
            .run_atomic(StoreScope::Root(self.db_pool.as_ref()), move |txn| {
                Box::pin(async move {
                    let candidate = SubmissionCandidate::purchase(
                        input.product_id,
                        input.quantity,
                        input.unit_price,
                    );
                    guard.check(txn, &candidate, window).await?;

                    let total_amount = input.unit_price * Decimal::from(input.quantity);
                    let row = purchase::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        product_id: Set(input.product_id),
                        quantity: Set(input.quantity),
                        unit_price: Set(input.unit_price),
                        total_amount: Set(total_amount),
                        supplier_name: Set(input.supplier_name),
                        is_deleted: Set(false),
                        ..Default::default()
                    };
                    let row = row.insert(txn).await.map_err(ServiceError::db_error)?;

                    let outcome = engine
                        .adjust_in(
                            txn,
                            row.product_id,
                            row.quantity,
                            PURCHASE_REASON,
                            Some(format!("purchase {}", row.id)),
                        )
                        .await?;

                    Ok((row, outcome))
                })
            })
            .await?;

        info!(
            purchase_id = %row.id,
            product_id = row.product_id,
            quantity = row.quantity,
            provisioned = outcome.was_created,
            "Purchase recorded"
        );
        self.engine.emit_events(&outcome).await?;
        self.send(Event::PurchaseCreated(row.id)).await?;
        Ok(row)
    }

    /// Changes the quantity on a posted purchase, reversing the old stock
    /// booking and applying the new one atomically.
    ///
    /// Shrinking a purchase fails with `InsufficientStock` when the
    /// difference has already been sold on.
    #[instrument(skip(self))]
    pub async fn update_purchase_quantity(
        &self,
        purchase_id: Uuid,
        new_quantity: i32,
    ) -> Result<purchase::Model, ServiceError> {
        if new_quantity < 1 {
            return Err(ServiceError::ValidationError(
                "quantity must be at least 1".to_string(),
            ));
        }

        let existing = self.get_purchase(purchase_id).await?;
        let locked_product = existing.product_id;
        let _guard = self.locks.acquire(locked_product, self.lock_wait).await?;

        let engine = self.engine.clone();
        let (row, outcome) = self
            .coordinator
            .run_atomic(StoreScope::Root(self.db_pool.as_ref()), move |txn| {
                Box::pin(async move {
                    let row = find_live_purchase(txn, purchase_id).await?;
                    if row.product_id != locked_product {
                        return Err(ServiceError::db_error(format!(
                            "Purchase {} moved to another product during update, retry",
                            purchase_id
                        )));
                    }
                    if row.quantity == new_quantity {
                        return Ok((row, None));
                    }

                    let outcome = engine
                        .reverse_and_reapply_in(
                            txn,
                            row.product_id,
                            row.quantity,
                            new_quantity,
                            PURCHASE_UPDATED_REASON,
                            Some(format!("purchase {}", row.id)),
                        )
                        .await?;

                    let total_amount = row.unit_price * Decimal::from(new_quantity);
                    let mut active: purchase::ActiveModel = row.into();
                    active.quantity = Set(new_quantity);
                    active.total_amount = Set(total_amount);
                    active.updated_at = Set(Utc::now());
                    let row = active.update(txn).await.map_err(ServiceError::db_error)?;

                    Ok((row, Some(outcome)))
                })
            })
            .await?;

        if let Some(outcome) = outcome {
            info!(purchase_id = %row.id, new_quantity, "Purchase quantity updated");
            self.engine.emit_events(&outcome).await?;
            self.send(Event::PurchaseUpdated(row.id)).await?;
        }
        Ok(row)
    }

    /// Soft-deletes a purchase and takes its booked quantity back out of
    /// stock.
    ///
    /// Fails with `InsufficientStock`, leaving the purchase live, when the
    /// received goods have already been sold; the books cannot drop below
    /// what the remaining documents explain.
    #[instrument(skip(self))]
    pub async fn delete_purchase(&self, purchase_id: Uuid) -> Result<(), ServiceError> {
        let existing = self.get_purchase(purchase_id).await?;
        let _guard = self
            .locks
            .acquire(existing.product_id, self.lock_wait)
            .await?;

        let engine = self.engine.clone();
        let result = self
            .coordinator
            .run_atomic(StoreScope::Root(self.db_pool.as_ref()), move |txn| {
                Box::pin(async move {
                    let row = Purchase::find_by_id(purchase_id)
                        .one(txn)
                        .await
                        .map_err(ServiceError::db_error)?
                        .ok_or_else(|| {
                            ServiceError::NotFound(format!("Purchase {} not found", purchase_id))
                        })?;
                    if row.is_deleted {
                        return Ok(None);
                    }

                    let mut active: purchase::ActiveModel = row.clone().into();
                    active.is_deleted = Set(true);
                    active.updated_at = Set(Utc::now());
                    active.update(txn).await.map_err(ServiceError::db_error)?;

                    let outcome = engine
                        .adjust_in(
                            txn,
                            row.product_id,
                            -row.quantity,
                            PURCHASE_DELETED_REASON,
                            Some(format!("purchase {}", row.id)),
                        )
                        .await?;

                    Ok(Some(outcome))
                })
            })
            .await;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                if matches!(e, ServiceError::InsufficientStock(_)) {
                    warn!(
                        purchase_id = %purchase_id,
                        "Purchase deletion refused, received stock already consumed"
                    );
                }
                return Err(e);
            }
        };

        if let Some(outcome) = outcome {
            info!(purchase_id = %purchase_id, "Purchase deleted, stock taken back");
            self.engine.emit_events(&outcome).await?;
            self.send(Event::PurchaseDeleted(purchase_id)).await?;
        }
        Ok(())
    }

    /// Fetches a live purchase by id.
    pub async fn get_purchase(&self, purchase_id: Uuid) -> Result<purchase::Model, ServiceError> {
        Purchase::find_by_id(purchase_id)
            .filter(purchase::Column::IsDeleted.eq(false))
            .one(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Purchase {} not found", purchase_id)))
    }

    /// Lists live purchases, newest first. `page` starts at 1.
    #[instrument(skip(self))]
    pub async fn list_purchases(
        &self,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<purchase::Model>, u64), ServiceError> {
        if page == 0 {
            return Err(ServiceError::ValidationError(
                "Page starts at 1".to_string(),
            ));
        }
        if limit == 0 || limit > 1000 {
            return Err(ServiceError::ValidationError(
                "Limit must be between 1 and 1000".to_string(),
            ));
        }

        let paginator = Purchase::find()
            .filter(purchase::Column::IsDeleted.eq(false))
            .order_by_desc(purchase::Column::CreatedAt)
            .paginate(self.db_pool.as_ref(), limit);

        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let rows = paginator
            .fetch_page(page - 1)
            .await
            .map_err(ServiceError::db_error)?;

        Ok((rows, total))
    }

    async fn send(&self, event: Event) -> Result<(), ServiceError> {
        self.event_sender.send(event).await.map_err(|e| {
            let msg = format!("Failed to send purchase event: {}", e);
            error!("{}", msg);
            ServiceError::EventError(msg)
        })
    }
}

async fn find_live_purchase(
    txn: &sea_orm::DatabaseTransaction,
    purchase_id: Uuid,
) -> Result<purchase::Model, ServiceError> {
    let row = Purchase::find_by_id(purchase_id)
        .one(txn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Purchase {} not found", purchase_id)))?;
    if row.is_deleted {
        return Err(ServiceError::ValidationError(format!(
            "Purchase {} is deleted",
            purchase_id
        )));
    }
    Ok(row)
}
