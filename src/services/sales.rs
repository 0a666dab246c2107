use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::sale::{self, Entity as Sale},
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
pub const SALE_REASON: &str = "sale";
pub const SALE_UPDATED_REASON: &str = "sale updated";
pub const SALE_DELETED_REASON: &str = "sale deleted";

/// Input for posting a sale.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewSale {
    pub product_id: i32,
    #[validate(range(min = 1, message = "quantity must be at least 1"))]
    pub quantity: i32,
    #[validate(custom = "validate_unit_price")]
    pub unit_price: Decimal,
}

fn validate_unit_price(unit_price: &Decimal) -> Result<(), validator::ValidationError> {
    if unit_price.is_sign_negative() {
        return Err(validator::ValidationError::new("negative_unit_price"));
    }
    Ok(())
}

/// Posts, amends and undoes sales, keeping the stock ledger in step.
///
/// Every mutation here runs the document write and its stock adjustment in
/// one transaction under the product lock; either both land or neither
/// does.
#[derive(Clone)]
pub struct SalesService {
    db_pool: Arc<DbPool>,
    engine: Arc<StockAdjustmentEngine>,
    guard: DuplicateSubmissionGuard,
    coordinator: TransactionCoordinator,
    locks: ProductLockMap,
    event_sender: EventSender,
    duplicate_window: Duration,
    lock_wait: std::time::Duration,
}

impl SalesService {
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

    /// Posts a sale and draws its quantity from stock.
    ///
    /// Resubmitting an identical sale inside the duplicate window fails
    /// with `DuplicateSubmission` before anything is written.
    #[instrument(skip(self))]
    pub async fn create_sale(&self, new_sale: NewSale) -> Result<sale::Model, ServiceError> {
        new_sale.validate()?;

        let _guard = self
            .locks
            .acquire(new_sale.product_id, self.lock_wait)
            .await?;

        let guard = self.guard;
        let engine = self.engine.clone();
        let window = self.duplicate_window;
        let input = new_sale.clone();
        let (row, outcome) = self
            .coordinator
            .run_atomic(StoreScope::Root(self.db_pool.as_ref()), move |txn| {
                Box::pin(async move {
                    let candidate =
                        SubmissionCandidate::sale(input.product_id, input.quantity, input.unit_price);
                    guard.check(txn, &candidate, window).await?;

                    let total_amount = input.unit_price * Decimal::from(input.quantity);
                    let row = sale::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        product_id: Set(input.product_id),
                        quantity: Set(input.quantity),
                        unit_price: Set(input.unit_price),
                        total_amount: Set(total_amount),
                        is_deleted: Set(false),
                        ..Default::default()
                    };
                    let row = row.insert(txn).await.map_err(ServiceError::db_error)?;

                    let outcome = engine
                        .adjust_in(
                            txn,
                            row.product_id,
                            -row.quantity,
                            SALE_REASON,
                            Some(format!("sale {}", row.id)),
                        )
                        .await?;

                    Ok((row, outcome))
                })
            })
            .await?;

        info!(
            sale_id = %row.id,
            product_id = row.product_id,
            quantity = row.quantity,
            "Sale recorded"
        );
        self.engine.emit_events(&outcome).await?;
        self.send(Event::SaleCreated(row.id)).await?;
        Ok(row)
    }

    /// Changes the quantity on a posted sale, reversing the old stock draw
    /// and applying the new one atomically.
    #[instrument(skip(self))]
    pub async fn update_sale_quantity(
        &self,
        sale_id: Uuid,
        new_quantity: i32,
    ) -> Result<sale::Model, ServiceError> {
        if new_quantity < 1 {
            return Err(ServiceError::ValidationError(
                "quantity must be at least 1".to_string(),
            ));
        }

        let existing = self.get_sale(sale_id).await?;
        let locked_product = existing.product_id;
        let _guard = self.locks.acquire(locked_product, self.lock_wait).await?;

        let engine = self.engine.clone();
        let (row, outcome) = self
            .coordinator
            .run_atomic(StoreScope::Root(self.db_pool.as_ref()), move |txn| {
                Box::pin(async move {
                    let row = find_live_sale(txn, sale_id).await?;
                    if row.product_id != locked_product {
                        return Err(ServiceError::db_error(format!(
                            "Sale {} moved to another product during update, retry",
                            sale_id
                        )));
                    }
                    if row.quantity == new_quantity {
                        return Ok((row, None));
                    }

                    let outcome = engine
                        .reverse_and_reapply_in(
                            txn,
                            row.product_id,
                            -row.quantity,
                            -new_quantity,
                            SALE_UPDATED_REASON,
                            Some(format!("sale {}", row.id)),
                        )
                        .await?;

                    let total_amount = row.unit_price * Decimal::from(new_quantity);
                    let mut active: sale::ActiveModel = row.into();
                    active.quantity = Set(new_quantity);
                    active.total_amount = Set(total_amount);
                    active.updated_at = Set(Utc::now());
                    let row = active.update(txn).await.map_err(ServiceError::db_error)?;

                    Ok((row, Some(outcome)))
                })
            })
            .await?;

        if let Some(outcome) = outcome {
            info!(sale_id = %row.id, new_quantity, "Sale quantity updated");
            self.engine.emit_events(&outcome).await?;
            self.send(Event::SaleUpdated(row.id)).await?;
        }
        Ok(row)
    }

    /// Moves a posted sale to a different product, returning stock to the
    /// old product and drawing it from the new one in one transaction.
    #[instrument(skip(self))]
    pub async fn update_sale_product(
        &self,
        sale_id: Uuid,
        new_product_id: i32,
    ) -> Result<sale::Model, ServiceError> {
        let existing = self.get_sale(sale_id).await?;
        let old_product_id = existing.product_id;
        if old_product_id == new_product_id {
            return Ok(existing);
        }

        let _guards = self
            .locks
            .acquire_pair(old_product_id, new_product_id, self.lock_wait)
            .await?;

        let engine = self.engine.clone();
        let (row, returned, drawn) = self
            .coordinator
            .run_atomic(StoreScope::Root(self.db_pool.as_ref()), move |txn| {
                Box::pin(async move {
                    let row = find_live_sale(txn, sale_id).await?;
                    if row.product_id != old_product_id {
                        return Err(ServiceError::db_error(format!(
                            "Sale {} moved to another product during update, retry",
                            sale_id
                        )));
                    }

                    let notes = Some(format!("sale {}", row.id));
                    let returned = engine
                        .adjust_in(
                            txn,
                            old_product_id,
                            row.quantity,
                            SALE_UPDATED_REASON,
                            notes.clone(),
                        )
                        .await?;
                    let drawn = engine
                        .adjust_in(
                            txn,
                            new_product_id,
                            -row.quantity,
                            SALE_UPDATED_REASON,
                            notes,
                        )
                        .await?;

                    let mut active: sale::ActiveModel = row.into();
                    active.product_id = Set(new_product_id);
                    active.updated_at = Set(Utc::now());
                    let row = active.update(txn).await.map_err(ServiceError::db_error)?;

                    Ok((row, returned, drawn))
                })
            })
            .await?;

        info!(
            sale_id = %row.id,
            old_product_id,
            new_product_id,
            "Sale moved to another product"
        );
        self.engine.emit_events(&returned).await?;
        self.engine.emit_events(&drawn).await?;
        self.send(Event::SaleUpdated(row.id)).await?;
        Ok(row)
    }

    /// Soft-deletes a sale and returns its stock draw to inventory.
    ///
    /// Deleting twice is a no-op the second time.
    #[instrument(skip(self))]
    pub async fn delete_sale(&self, sale_id: Uuid) -> Result<(), ServiceError> {
        let existing = self.get_sale(sale_id).await?;
        let _guard = self
            .locks
            .acquire(existing.product_id, self.lock_wait)
            .await?;

        let engine = self.engine.clone();
        let outcome = self
            .coordinator
            .run_atomic(StoreScope::Root(self.db_pool.as_ref()), move |txn| {
                Box::pin(async move {
                    let row = Sale::find_by_id(sale_id)
                        .one(txn)
                        .await
                        .map_err(ServiceError::db_error)?
                        .ok_or_else(|| {
                            ServiceError::NotFound(format!("Sale {} not found", sale_id))
                        })?;
                    if row.is_deleted {
                        return Ok(None);
                    }

                    let mut active: sale::ActiveModel = row.clone().into();
                    active.is_deleted = Set(true);
                    active.updated_at = Set(Utc::now());
                    active.update(txn).await.map_err(ServiceError::db_error)?;

                    let outcome = engine
                        .adjust_in(
                            txn,
                            row.product_id,
                            row.quantity,
                            SALE_DELETED_REASON,
                            Some(format!("sale {}", row.id)),
                        )
                        .await?;

                    Ok(Some(outcome))
                })
            })
            .await?;

        if let Some(outcome) = outcome {
            info!(sale_id = %sale_id, "Sale deleted, stock returned");
            self.engine.emit_events(&outcome).await?;
            self.send(Event::SaleDeleted(sale_id)).await?;
        }
        Ok(())
    }

    /// Fetches a live sale by id.
    pub async fn get_sale(&self, sale_id: Uuid) -> Result<sale::Model, ServiceError> {
        Sale::find_by_id(sale_id)
            .filter(sale::Column::IsDeleted.eq(false))
            .one(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Sale {} not found", sale_id)))
    }

    /// Lists live sales, newest first. `page` starts at 1.
    #[instrument(skip(self))]
    pub async fn list_sales(
        &self,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<sale::Model>, u64), ServiceError> {
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

        let paginator = Sale::find()
            .filter(sale::Column::IsDeleted.eq(false))
            .order_by_desc(sale::Column::CreatedAt)
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
            let msg = format!("Failed to send sale event: {}", e);
            error!("{}", msg);
            ServiceError::EventError(msg)
        })
    }
}

async fn find_live_sale(
    txn: &sea_orm::DatabaseTransaction,
    sale_id: Uuid,
) -> Result<sale::Model, ServiceError> {
    let row = Sale::find_by_id(sale_id)
        .one(txn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Sale {} not found", sale_id)))?;
    if row.is_deleted {
        return Err(ServiceError::ValidationError(format!(
            "Sale {} is deleted",
            sale_id
        )));
    }
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn new_sale_rejects_zero_quantity() {
        let input = NewSale {
            product_id: 1,
            quantity: 0,
            unit_price: dec!(10.00),
        };
        assert!(input.validate().is_err());
    }

    #[test]
    fn new_sale_rejects_negative_price() {
        let input = NewSale {
            product_id: 1,
            quantity: 1,
            unit_price: dec!(-0.01),
        };
        assert!(input.validate().is_err());
    }

    #[test]
    fn new_sale_accepts_free_goods() {
        let input = NewSale {
            product_id: 1,
            quantity: 3,
            unit_price: dec!(0),
        };
        assert!(input.validate().is_ok());
    }
}
