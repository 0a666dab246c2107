use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::inventory_record::{self, Entity as InventoryRecord, InventoryStatus, StockType},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        coordinator::{StoreScope, TransactionCoordinator},
        locks::ProductLockMap,
    },
};

/// Partial update of a record's manually managed fields. `None` leaves a
/// field as it is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordPatch {
    pub safety_stock: Option<i32>,
    pub reserved_quantity: Option<i32>,
    pub stock_type: Option<StockType>,
}

/// Reads and manually edits inventory records.
///
/// Quantity never changes here; that is the adjustment engine's job.
/// Reservations and settings are the fields a person is allowed to touch,
/// and the edits are validated so the record stays internally consistent.
#[derive(Clone)]
pub struct InventoryRecordsService {
    db_pool: Arc<DbPool>,
    coordinator: TransactionCoordinator,
    locks: ProductLockMap,
    event_sender: EventSender,
    lock_wait: std::time::Duration,
}

impl InventoryRecordsService {
    pub fn new(
        db_pool: Arc<DbPool>,
        locks: ProductLockMap,
        event_sender: EventSender,
        lock_wait: std::time::Duration,
    ) -> Self {
        Self {
            db_pool,
            coordinator: TransactionCoordinator::new(),
            locks,
            event_sender,
            lock_wait,
        }
    }

    /// The live stock record for a product.
    pub async fn get_record(
        &self,
        product_id: i32,
    ) -> Result<inventory_record::Model, ServiceError> {
        InventoryRecord::find()
            .filter(inventory_record::Column::ProductId.eq(product_id))
            .filter(inventory_record::Column::StockType.eq(StockType::Stock))
            .filter(inventory_record::Column::IsDeleted.eq(false))
            .one(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?
            .ok_or(ServiceError::NoInventoryRecord(product_id))
    }

    /// Any live record by id, whatever its stock type.
    pub async fn get_by_id(&self, id: Uuid) -> Result<inventory_record::Model, ServiceError> {
        InventoryRecord::find_by_id(id)
            .filter(inventory_record::Column::IsDeleted.eq(false))
            .one(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Inventory record {} not found", id)))
    }

    /// Lists live records ordered by product id. `page` starts at 1.
    #[instrument(skip(self))]
    pub async fn list_records(
        &self,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<inventory_record::Model>, u64), ServiceError> {
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

        let paginator = InventoryRecord::find()
            .filter(inventory_record::Column::IsDeleted.eq(false))
            .order_by_asc(inventory_record::Column::ProductId)
            .paginate(self.db_pool.as_ref(), limit);

        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let rows = paginator
            .fetch_page(page - 1)
            .await
            .map_err(ServiceError::db_error)?;

        Ok((rows, total))
    }

    /// Applies a manual edit to a record's settings.
    ///
    /// A reservation above the on-hand quantity is rejected with
    /// `ReservedExceedsQuantity`; the record is untouched on any rejection.
    #[instrument(skip(self))]
    pub async fn update_record_settings(
        &self,
        id: Uuid,
        patch: RecordPatch,
    ) -> Result<inventory_record::Model, ServiceError> {
        let existing = self.get_by_id(id).await?;
        let _guard = self
            .locks
            .acquire(existing.product_id, self.lock_wait)
            .await?;

        let updated = self
            .coordinator
            .run_atomic(StoreScope::Root(self.db_pool.as_ref()), move |txn| {
                Box::pin(async move {
                    let record = find_live_record(txn, id).await?;

                    let safety_stock = patch.safety_stock.unwrap_or(record.safety_stock);
                    if safety_stock < 0 {
                        return Err(ServiceError::ValidationError(
                            "safety stock cannot be negative".to_string(),
                        ));
                    }
                    let reserved = patch.reserved_quantity.unwrap_or(record.reserved_quantity);
                    if reserved < 0 {
                        return Err(ServiceError::ValidationError(
                            "reserved quantity cannot be negative".to_string(),
                        ));
                    }
                    if reserved > record.quantity {
                        return Err(ServiceError::ReservedExceedsQuantity {
                            reserved,
                            quantity: record.quantity,
                        });
                    }

                    let mut active: inventory_record::ActiveModel = record.clone().into();
                    active.safety_stock = Set(safety_stock);
                    active.reserved_quantity = Set(reserved);
                    if let Some(stock_type) = patch.stock_type {
                        active.stock_type = Set(stock_type);
                    }
                    active.status = Set(InventoryStatus::derive(record.quantity, safety_stock));
                    active.version = Set(record.version + 1);
                    active.updated_at = Set(Utc::now());
                    active.update(txn).await.map_err(ServiceError::db_error)
                })
            })
            .await?;

        info!(record_id = %id, product_id = updated.product_id, "Inventory record settings updated");
        Ok(updated)
    }

    /// Marks part of the on-hand quantity as reserved.
    #[instrument(skip(self))]
    pub async fn reserve(
        &self,
        product_id: i32,
        quantity: i32,
    ) -> Result<inventory_record::Model, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "reservation quantity must be positive".to_string(),
            ));
        }

        let _guard = self.locks.acquire(product_id, self.lock_wait).await?;

        let updated = self
            .coordinator
            .run_atomic(StoreScope::Root(self.db_pool.as_ref()), move |txn| {
                Box::pin(async move {
                    let record = find_live_stock_record(txn, product_id).await?;

                    let reserved = record.reserved_quantity + quantity;
                    if reserved > record.quantity {
                        return Err(ServiceError::InsufficientStock(format!(
                            "Product {} has {} unreserved units, cannot reserve {}",
                            product_id,
                            record.free_quantity(),
                            quantity
                        )));
                    }

                    let mut active: inventory_record::ActiveModel = record.clone().into();
                    active.reserved_quantity = Set(reserved);
                    active.version = Set(record.version + 1);
                    active.updated_at = Set(Utc::now());
                    active.update(txn).await.map_err(ServiceError::db_error)
                })
            })
            .await?;

        info!(
            product_id,
            quantity,
            reserved = updated.reserved_quantity,
            "Stock reserved"
        );
        self.send(Event::StockReserved {
            product_id,
            quantity,
        })
        .await?;
        Ok(updated)
    }

    /// Returns part of the reserved quantity to the free pool.
    #[instrument(skip(self))]
    pub async fn release(
        &self,
        product_id: i32,
        quantity: i32,
    ) -> Result<inventory_record::Model, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "release quantity must be positive".to_string(),
            ));
        }

        let _guard = self.locks.acquire(product_id, self.lock_wait).await?;

        let updated = self
            .coordinator
            .run_atomic(StoreScope::Root(self.db_pool.as_ref()), move |txn| {
                Box::pin(async move {
                    let record = find_live_stock_record(txn, product_id).await?;

                    if quantity > record.reserved_quantity {
                        return Err(ServiceError::ValidationError(format!(
                            "Cannot release {} units, only {} reserved",
                            quantity, record.reserved_quantity
                        )));
                    }

                    let mut active: inventory_record::ActiveModel = record.clone().into();
                    active.reserved_quantity = Set(record.reserved_quantity - quantity);
                    active.version = Set(record.version + 1);
                    active.updated_at = Set(Utc::now());
                    active.update(txn).await.map_err(ServiceError::db_error)
                })
            })
            .await?;

        info!(
            product_id,
            quantity,
            reserved = updated.reserved_quantity,
            "Stock released"
        );
        self.send(Event::StockReleased {
            product_id,
            quantity,
        })
        .await?;
        Ok(updated)
    }

    /// Soft-deletes an empty record.
    ///
    /// A record still holding stock or reservations is refused; drain it
    /// through the engine first so the movement trail explains where the
    /// quantity went.
    #[instrument(skip(self))]
    pub async fn delete_record(&self, id: Uuid) -> Result<(), ServiceError> {
        let existing = self.get_by_id(id).await?;
        let product_id = existing.product_id;
        let _guard = self.locks.acquire(product_id, self.lock_wait).await?;

        let deleted = self
            .coordinator
            .run_atomic(StoreScope::Root(self.db_pool.as_ref()), move |txn| {
                Box::pin(async move {
                    let record = match InventoryRecord::find_by_id(id)
                        .one(txn)
                        .await
                        .map_err(ServiceError::db_error)?
                    {
                        Some(record) if !record.is_deleted => record,
                        Some(_) => return Ok(false),
                        None => {
                            return Err(ServiceError::NotFound(format!(
                                "Inventory record {} not found",
                                id
                            )))
                        }
                    };

                    if record.quantity != 0 || record.reserved_quantity != 0 {
                        return Err(ServiceError::ValidationError(format!(
                            "Inventory record {} still holds {} units ({} reserved)",
                            id, record.quantity, record.reserved_quantity
                        )));
                    }

                    let mut active: inventory_record::ActiveModel = record.clone().into();
                    active.is_deleted = Set(true);
                    active.version = Set(record.version + 1);
                    active.updated_at = Set(Utc::now());
                    active.update(txn).await.map_err(ServiceError::db_error)?;
                    Ok(true)
                })
            })
            .await?;

        if deleted {
            info!(record_id = %id, product_id, "Inventory record deleted");
            self.send(Event::InventoryRecordDeleted {
                product_id,
                inventory_id: id,
            })
            .await?;
        }
        Ok(())
    }

    async fn send(&self, event: Event) -> Result<(), ServiceError> {
        self.event_sender.send(event).await.map_err(|e| {
            let msg = format!("Failed to send inventory record event: {}", e);
            error!("{}", msg);
            ServiceError::EventError(msg)
        })
    }
}

async fn find_live_record(
    txn: &DatabaseTransaction,
    id: Uuid,
) -> Result<inventory_record::Model, ServiceError> {
    InventoryRecord::find_by_id(id)
        .filter(inventory_record::Column::IsDeleted.eq(false))
        .one(txn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Inventory record {} not found", id)))
}

async fn find_live_stock_record(
    txn: &DatabaseTransaction,
    product_id: i32,
) -> Result<inventory_record::Model, ServiceError> {
    InventoryRecord::find()
        .filter(inventory_record::Column::ProductId.eq(product_id))
        .filter(inventory_record::Column::StockType.eq(StockType::Stock))
        .filter(inventory_record::Column::IsDeleted.eq(false))
        .one(txn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or(ServiceError::NoInventoryRecord(product_id))
}
