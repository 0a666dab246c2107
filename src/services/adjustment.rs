use chrono::{Duration, Utc};
use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, Opts};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter, Set,
};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::{
        inventory_record::{self, Entity as InventoryRecord, InventoryStatus, StockType},
        stock_movement::{self, MovementType},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        coordinator::{StoreScope, TransactionCoordinator},
        drain::DrainPolicy,
        locks::ProductLockMap,
        movements::MovementLedger,
    },
};

lazy_static! {
    static ref STOCK_ADJUSTMENTS: IntCounter = IntCounter::new(
        "stock_adjustments_total",
        "Total number of accepted stock adjustments"
    )
    .expect("metric can be created");
    static ref STOCK_ADJUSTMENT_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "stock_adjustment_failures_total",
            "Total number of rejected stock adjustments"
        ),
        &["error_type"]
    )
    .expect("metric can be created");
}

/// What a single adjustment did: the record as it now stands, the movement
/// written for it (absent for no-ops), and whether the record had to be
/// provisioned first.
#[derive(Debug, Clone)]
pub struct AdjustmentOutcome {
    pub record: inventory_record::Model,
    pub movement: Option<stock_movement::Model>,
    pub was_created: bool,
}

impl AdjustmentOutcome {
    /// True when the adjustment changed nothing.
    pub fn is_noop(&self) -> bool {
        self.movement.is_none() && !self.was_created
    }
}

/// Applies signed quantity changes to inventory records.
///
/// Every accepted change updates the record and appends one movement row in
/// the same transaction; a rejected change leaves both untouched. Callers
/// that compose an adjustment with their own writes join the engine into
/// their transaction via [`StockAdjustmentEngine::adjust_in`].
pub struct StockAdjustmentEngine {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
    coordinator: TransactionCoordinator,
    locks: ProductLockMap,
    ledger: MovementLedger,
    policy: Arc<dyn DrainPolicy>,
    lock_wait: std::time::Duration,
}

impl StockAdjustmentEngine {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: EventSender,
        locks: ProductLockMap,
        policy: Arc<dyn DrainPolicy>,
        lock_wait: std::time::Duration,
    ) -> Self {
        let ledger = MovementLedger::new(db_pool.clone());
        Self {
            db_pool,
            event_sender,
            coordinator: TransactionCoordinator::new(),
            locks,
            ledger,
            policy,
            lock_wait,
        }
    }

    /// Applies a signed quantity change to the stock record for
    /// `product_id`.
    ///
    /// Takes the per-product lock, runs the change in its own transaction
    /// and publishes events once the transaction has committed.
    #[instrument(skip(self))]
    pub async fn adjust(
        &self,
        product_id: i32,
        delta: i32,
        reason: &str,
    ) -> Result<AdjustmentOutcome, ServiceError> {
        let _guard = self
            .locks
            .acquire(product_id, self.lock_wait)
            .await
            .map_err(|e| {
                record_failure(&e);
                e
            })?;

        let policy = self.policy.clone();
        let reason_owned = reason.to_string();
        let outcome = self
            .coordinator
            .run_atomic(StoreScope::Root(self.db_pool.as_ref()), move |txn| {
                Box::pin(async move {
                    apply_delta(txn, policy.as_ref(), product_id, delta, &reason_owned, None).await
                })
            })
            .await
            .map_err(|e| {
                record_failure(&e);
                e
            })?;

        self.emit_events(&outcome).await?;
        STOCK_ADJUSTMENTS.inc();
        Ok(outcome)
    }

    /// Applies a delta on a transaction the caller already holds.
    ///
    /// The caller is responsible for holding the product lock and for
    /// publishing events once its transaction commits.
    pub async fn adjust_in(
        &self,
        txn: &DatabaseTransaction,
        product_id: i32,
        delta: i32,
        reason: &str,
        notes: Option<String>,
    ) -> Result<AdjustmentOutcome, ServiceError> {
        apply_delta(txn, self.policy.as_ref(), product_id, delta, reason, notes).await
    }

    /// Backs out a previously applied delta and applies a replacement, both
    /// in one transaction. Used when an already posted document changes
    /// quantity: the old change is reversed at full fidelity before the new
    /// one lands, so the ledger shows both steps.
    #[instrument(skip(self))]
    pub async fn reverse_and_reapply(
        &self,
        product_id: i32,
        old_delta: i32,
        new_delta: i32,
        reason: &str,
    ) -> Result<AdjustmentOutcome, ServiceError> {
        let _guard = self
            .locks
            .acquire(product_id, self.lock_wait)
            .await
            .map_err(|e| {
                record_failure(&e);
                e
            })?;

        let policy = self.policy.clone();
        let reason_owned = reason.to_string();
        let outcome = self
            .coordinator
            .run_atomic(StoreScope::Root(self.db_pool.as_ref()), move |txn| {
                Box::pin(async move {
                    apply_delta(
                        txn,
                        policy.as_ref(),
                        product_id,
                        -old_delta,
                        &reason_owned,
                        None,
                    )
                    .await?;
                    apply_delta(
                        txn,
                        policy.as_ref(),
                        product_id,
                        new_delta,
                        &reason_owned,
                        None,
                    )
                    .await
                })
            })
            .await
            .map_err(|e| {
                record_failure(&e);
                e
            })?;

        self.emit_events(&outcome).await?;
        STOCK_ADJUSTMENTS.inc();
        Ok(outcome)
    }

    /// As [`reverse_and_reapply`](Self::reverse_and_reapply) but on the
    /// caller's transaction, without locking or events.
    pub async fn reverse_and_reapply_in(
        &self,
        txn: &DatabaseTransaction,
        product_id: i32,
        old_delta: i32,
        new_delta: i32,
        reason: &str,
        notes: Option<String>,
    ) -> Result<AdjustmentOutcome, ServiceError> {
        apply_delta(
            txn,
            self.policy.as_ref(),
            product_id,
            -old_delta,
            reason,
            notes.clone(),
        )
        .await?;
        apply_delta(txn, self.policy.as_ref(), product_id, new_delta, reason, notes).await
    }

    /// Applies a delta unless an identical movement already landed within
    /// `within`.
    ///
    /// Safety net for adjustment feeds that can deliver the same change
    /// twice; the ledger is consulted before anything is written, and a hit
    /// skips the quantity change along with the movement.
    #[instrument(skip(self))]
    pub async fn adjust_once(
        &self,
        product_id: i32,
        delta: i32,
        reason: &str,
        within: Duration,
    ) -> Result<AdjustmentOutcome, ServiceError> {
        let _guard = self
            .locks
            .acquire(product_id, self.lock_wait)
            .await
            .map_err(|e| {
                record_failure(&e);
                e
            })?;

        let policy = self.policy.clone();
        let ledger = self.ledger.clone();
        let reason_owned = reason.to_string();
        let outcome = self
            .coordinator
            .run_atomic(StoreScope::Root(self.db_pool.as_ref()), move |txn| {
                Box::pin(async move {
                    if delta != 0 {
                        if let Some(record) = find_record(txn, product_id).await? {
                            let (movement_type, magnitude) = MovementType::classify(delta);
                            let already_applied = ledger
                                .recent_movement_exists(
                                    txn,
                                    record.id,
                                    movement_type,
                                    magnitude,
                                    &reason_owned,
                                    within,
                                )
                                .await?;
                            if already_applied {
                                info!(
                                    product_id,
                                    delta,
                                    reason = %reason_owned,
                                    "Skipping replayed adjustment, identical movement in window"
                                );
                                return Ok(AdjustmentOutcome {
                                    record,
                                    movement: None,
                                    was_created: false,
                                });
                            }
                        }
                    }
                    apply_delta(txn, policy.as_ref(), product_id, delta, &reason_owned, None).await
                })
            })
            .await
            .map_err(|e| {
                record_failure(&e);
                e
            })?;

        if !outcome.is_noop() {
            self.emit_events(&outcome).await?;
            STOCK_ADJUSTMENTS.inc();
        }
        Ok(outcome)
    }

    /// Publishes the events for a committed adjustment. Callers that joined
    /// the engine into their own transaction call this after their commit.
    pub async fn emit_events(&self, outcome: &AdjustmentOutcome) -> Result<(), ServiceError> {
        if outcome.was_created {
            self.send(Event::InventoryRecordCreated {
                product_id: outcome.record.product_id,
                inventory_id: outcome.record.id,
            })
            .await?;
        }
        if let Some(movement) = &outcome.movement {
            self.send(Event::InventoryAdjusted {
                product_id: outcome.record.product_id,
                old_quantity: movement.previous_quantity,
                new_quantity: movement.new_quantity,
                reason: movement.reason.clone(),
                movement_id: movement.id,
            })
            .await?;

            if matches!(
                outcome.record.status,
                InventoryStatus::LowStock | InventoryStatus::OutOfStock
            ) {
                self.send(Event::LowStockDetected {
                    product_id: outcome.record.product_id,
                    quantity: outcome.record.quantity,
                    safety_stock: outcome.record.safety_stock,
                })
                .await?;
            }
        }
        Ok(())
    }

    async fn send(&self, event: Event) -> Result<(), ServiceError> {
        self.event_sender.send(event).await.map_err(|e| {
            STOCK_ADJUSTMENT_FAILURES
                .with_label_values(&["event_error"])
                .inc();
            let msg = format!("Failed to publish adjustment event: {}", e);
            error!("{}", msg);
            ServiceError::EventError(msg)
        })
    }
}

fn record_failure(error: &ServiceError) {
    STOCK_ADJUSTMENT_FAILURES
        .with_label_values(&[error.metric_label()])
        .inc();
}

async fn find_record(
    txn: &DatabaseTransaction,
    product_id: i32,
) -> Result<Option<inventory_record::Model>, ServiceError> {
    InventoryRecord::find()
        .filter(inventory_record::Column::ProductId.eq(product_id))
        .filter(inventory_record::Column::StockType.eq(StockType::Stock))
        .filter(inventory_record::Column::IsDeleted.eq(false))
        .one(txn)
        .await
        .map_err(ServiceError::db_error)
}

/// The core state change: record update plus movement append, or an error
/// with neither.
async fn apply_delta(
    txn: &DatabaseTransaction,
    policy: &dyn DrainPolicy,
    product_id: i32,
    delta: i32,
    reason: &str,
    notes: Option<String>,
) -> Result<AdjustmentOutcome, ServiceError> {
    if delta == 0 {
        let record = match find_record(txn, product_id).await? {
            Some(record) => record,
            None => transient_record(product_id),
        };
        return Ok(AdjustmentOutcome {
            record,
            movement: None,
            was_created: false,
        });
    }

    let record = match find_record(txn, product_id).await? {
        Some(record) => record,
        None if delta > 0 => {
            return provision_record(txn, product_id, delta, reason, notes).await;
        }
        None => {
            warn!(
                product_id,
                delta, "Outbound adjustment against missing inventory record"
            );
            return Err(ServiceError::NoInventoryRecord(product_id));
        }
    };

    let previous_quantity = record.quantity;
    let new_quantity = previous_quantity + delta;
    if new_quantity < 0 {
        return Err(ServiceError::InsufficientStock(format!(
            "Product {} has {} on hand, cannot remove {}",
            product_id,
            previous_quantity,
            delta.abs()
        )));
    }

    let new_reserved = if delta < 0 {
        policy.reserved_after_outbound(delta.abs(), record.reserved_quantity)
    } else {
        record.reserved_quantity
    };
    if new_reserved > new_quantity {
        return Err(ServiceError::InsufficientStock(format!(
            "Product {} has {} unreserved units, cannot remove {}",
            product_id,
            record.free_quantity(),
            delta.abs()
        )));
    }

    let status = InventoryStatus::derive(new_quantity, record.safety_stock);
    let mut active: inventory_record::ActiveModel = record.clone().into();
    active.quantity = Set(new_quantity);
    active.reserved_quantity = Set(new_reserved);
    active.status = Set(status);
    active.version = Set(record.version + 1);
    active.updated_at = Set(Utc::now());
    let updated = active.update(txn).await.map_err(ServiceError::db_error)?;

    let (movement_type, magnitude) = MovementType::classify(delta);
    let movement = stock_movement::ActiveModel {
        id: Set(Uuid::new_v4()),
        inventory_id: Set(updated.id),
        movement_type: Set(movement_type),
        quantity: Set(magnitude),
        previous_quantity: Set(previous_quantity),
        new_quantity: Set(new_quantity),
        reason: Set(reason.to_string()),
        notes: Set(notes),
        ..Default::default()
    };
    let movement = movement.insert(txn).await.map_err(ServiceError::db_error)?;

    info!(
        product_id,
        delta, previous_quantity, new_quantity, reason, "Stock adjustment applied"
    );

    Ok(AdjustmentOutcome {
        record: updated,
        movement: Some(movement),
        was_created: false,
    })
}

/// First inbound stock for a product: creates the record and its opening
/// movement in one step.
async fn provision_record(
    txn: &DatabaseTransaction,
    product_id: i32,
    delta: i32,
    reason: &str,
    notes: Option<String>,
) -> Result<AdjustmentOutcome, ServiceError> {
    let record = inventory_record::ActiveModel {
        id: Set(Uuid::new_v4()),
        product_id: Set(product_id),
        quantity: Set(delta),
        reserved_quantity: Set(0),
        safety_stock: Set(0),
        status: Set(InventoryStatus::derive(delta, 0)),
        stock_type: Set(StockType::Stock),
        is_deleted: Set(false),
        version: Set(1),
        ..Default::default()
    };
    let record = record.insert(txn).await.map_err(ServiceError::db_error)?;

    let movement = stock_movement::ActiveModel {
        id: Set(Uuid::new_v4()),
        inventory_id: Set(record.id),
        movement_type: Set(MovementType::Inbound),
        quantity: Set(delta),
        previous_quantity: Set(0),
        new_quantity: Set(delta),
        reason: Set(reason.to_string()),
        notes: Set(notes),
        ..Default::default()
    };
    let movement = movement.insert(txn).await.map_err(ServiceError::db_error)?;

    info!(
        product_id,
        quantity = delta,
        "Provisioned inventory record for first inbound stock"
    );

    Ok(AdjustmentOutcome {
        record,
        movement: Some(movement),
        was_created: true,
    })
}

/// Placeholder returned for a zero-delta adjustment when no record exists.
/// Version 0 marks it as never persisted.
fn transient_record(product_id: i32) -> inventory_record::Model {
    let now = Utc::now();
    inventory_record::Model {
        id: Uuid::new_v4(),
        product_id,
        quantity: 0,
        reserved_quantity: 0,
        safety_stock: 0,
        status: InventoryStatus::OutOfStock,
        stock_type: StockType::Stock,
        is_deleted: false,
        version: 0,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_record_is_marked_unsaved() {
        let record = transient_record(7);
        assert_eq!(record.product_id, 7);
        assert_eq!(record.quantity, 0);
        assert_eq!(record.version, 0);
        assert_eq!(record.status, InventoryStatus::OutOfStock);
    }

    #[test]
    fn outcome_noop_requires_no_movement_and_no_creation() {
        let outcome = AdjustmentOutcome {
            record: transient_record(1),
            movement: None,
            was_created: false,
        };
        assert!(outcome.is_noop());
    }
}
