use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::{
    db::DbPool,
    entities::{inventory_record, purchase, sale},
    errors::ServiceError,
    events::{Event, EventSender},
};

/// One product's documents-versus-stock comparison.
///
/// `expected_quantity` is what the purchase and sale documents imply the
/// product should hold; `difference` is how far the stocked quantity is
/// from that. Zero difference means the product reconciles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsistencyReportItem {
    pub product_id: i32,
    pub total_purchased: i64,
    pub total_sold: i64,
    pub expected_quantity: i64,
    pub current_quantity: i64,
    pub difference: i64,
}

impl ConsistencyReportItem {
    pub fn is_consistent(&self) -> bool {
        self.difference == 0
    }
}

/// Cross-checks inventory against the documents that should explain it.
///
/// Pure read path: no locks are taken and nothing is written, so the report
/// is a statement about one moment, not a barrier. Quantities are summed
/// across every non-deleted record of a product, whatever its stock type.
pub struct ReconciliationService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
}

impl ReconciliationService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Compares document totals against stocked quantities for every
    /// product that appears in purchases, sales or inventory records.
    #[instrument(skip(self))]
    pub async fn generate_report(&self) -> Result<Vec<ConsistencyReportItem>, ServiceError> {
        self.report_inner(None).await
    }

    /// The same comparison restricted to the given products.
    #[instrument(skip(self))]
    pub async fn generate_report_for(
        &self,
        product_ids: &[i32],
    ) -> Result<Vec<ConsistencyReportItem>, ServiceError> {
        if product_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.report_inner(Some(product_ids)).await
    }

    async fn report_inner(
        &self,
        product_ids: Option<&[i32]>,
    ) -> Result<Vec<ConsistencyReportItem>, ServiceError> {
        let db = self.db_pool.as_ref();

        let mut purchase_query = purchase::Entity::find().filter(purchase::Column::IsDeleted.eq(false));
        let mut sale_query = sale::Entity::find().filter(sale::Column::IsDeleted.eq(false));
        let mut record_query =
            inventory_record::Entity::find().filter(inventory_record::Column::IsDeleted.eq(false));
        if let Some(ids) = product_ids {
            purchase_query =
                purchase_query.filter(purchase::Column::ProductId.is_in(ids.iter().copied()));
            sale_query = sale_query.filter(sale::Column::ProductId.is_in(ids.iter().copied()));
            record_query = record_query
                .filter(inventory_record::Column::ProductId.is_in(ids.iter().copied()));
        }

        let purchases = purchase_query.all(db).await.map_err(ServiceError::db_error)?;
        let sales = sale_query.all(db).await.map_err(ServiceError::db_error)?;
        let records = record_query.all(db).await.map_err(ServiceError::db_error)?;

        let mut purchased: HashMap<i32, i64> = HashMap::new();
        for row in &purchases {
            *purchased.entry(row.product_id).or_insert(0) += i64::from(row.quantity);
        }
        let mut sold: HashMap<i32, i64> = HashMap::new();
        for row in &sales {
            *sold.entry(row.product_id).or_insert(0) += i64::from(row.quantity);
        }
        // A product can hold stock under several records; sum them all.
        let mut stocked: HashMap<i32, i64> = HashMap::new();
        for row in &records {
            *stocked.entry(row.product_id).or_insert(0) += i64::from(row.quantity);
        }

        let mut seen: BTreeSet<i32> = BTreeSet::new();
        seen.extend(purchased.keys().copied());
        seen.extend(sold.keys().copied());
        seen.extend(stocked.keys().copied());

        let mut report = Vec::with_capacity(seen.len());
        for product_id in seen {
            let total_purchased = purchased.get(&product_id).copied().unwrap_or(0);
            let total_sold = sold.get(&product_id).copied().unwrap_or(0);
            let current_quantity = stocked.get(&product_id).copied().unwrap_or(0);
            let expected_quantity = total_purchased - total_sold;
            let difference = current_quantity - expected_quantity;

            if difference != 0 {
                warn!(
                    product_id,
                    expected_quantity,
                    current_quantity,
                    difference,
                    "Inventory does not reconcile against documents"
                );
            }

            report.push(ConsistencyReportItem {
                product_id,
                total_purchased,
                total_sold,
                expected_quantity,
                current_quantity,
                difference,
            });
        }

        let discrepancies = report.iter().filter(|item| !item.is_consistent()).count();
        info!(
            products = report.len(),
            discrepancies, "Consistency report generated"
        );

        self.event_sender
            .send(Event::ReconciliationCompleted {
                products: report.len(),
                discrepancies,
            })
            .await
            .map_err(|e| {
                let msg = format!("Failed to publish reconciliation event: {}", e);
                error!("{}", msg);
                ServiceError::EventError(msg)
            })?;

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_consistency_is_zero_difference() {
        let item = ConsistencyReportItem {
            product_id: 1,
            total_purchased: 50,
            total_sold: 20,
            expected_quantity: 30,
            current_quantity: 30,
            difference: 0,
        };
        assert!(item.is_consistent());

        let drifted = ConsistencyReportItem {
            difference: -5,
            current_quantity: 25,
            ..item
        };
        assert!(!drifted.is_consistent());
    }
}
