use chrono::{DateTime, Duration, Utc};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::stock_movement::{self, Entity as StockMovement, MovementType},
    errors::ServiceError,
};

/// Read side of the append-only movement ledger.
///
/// Rows are appended by the adjustment engine only; this service never
/// writes.
#[derive(Debug, Clone)]
pub struct MovementLedger {
    db_pool: Arc<DbPool>,
}

impl MovementLedger {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Movements for one inventory record, newest first, optionally bounded
    /// by a created-at range.
    #[instrument(skip(self))]
    pub async fn movements_for(
        &self,
        inventory_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<stock_movement::Model>, ServiceError> {
        let mut query =
            StockMovement::find().filter(stock_movement::Column::InventoryId.eq(inventory_id));

        if let Some(from) = from {
            query = query.filter(stock_movement::Column::CreatedAt.gte(from));
        }
        if let Some(to) = to {
            query = query.filter(stock_movement::Column::CreatedAt.lte(to));
        }

        query
            .order_by_desc(stock_movement::Column::CreatedAt)
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Whether an identical movement was already recorded within the
    /// lookback window.
    ///
    /// Secondary idempotency net for indirectly driven adjustments. Callers
    /// check before adjusting, inside the same transaction, and on a hit
    /// skip the quantity change as well: the earlier application already
    /// happened.
    pub async fn recent_movement_exists<C: ConnectionTrait>(
        &self,
        conn: &C,
        inventory_id: Uuid,
        movement_type: MovementType,
        quantity: i32,
        reason: &str,
        within: Duration,
    ) -> Result<bool, ServiceError> {
        let cutoff = Utc::now() - within;

        let count = StockMovement::find()
            .filter(stock_movement::Column::InventoryId.eq(inventory_id))
            .filter(stock_movement::Column::MovementType.eq(movement_type))
            .filter(stock_movement::Column::Quantity.eq(quantity))
            .filter(stock_movement::Column::Reason.eq(reason))
            .filter(stock_movement::Column::CreatedAt.gte(cutoff))
            .count(conn)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(count > 0)
    }

    /// Net signed quantity across the whole ledger for one record.
    #[instrument(skip(self))]
    pub async fn signed_total(&self, inventory_id: Uuid) -> Result<i64, ServiceError> {
        let movements = self.movements_for(inventory_id, None, None).await?;
        Ok(movements.iter().map(|m| m.signed_delta() as i64).sum())
    }
}
