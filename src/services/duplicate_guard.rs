use chrono::{Duration, Utc};
use lazy_static::lazy_static;
use prometheus::{IntCounterVec, Opts};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    entities::{purchase, sale},
    errors::ServiceError,
};

lazy_static! {
    static ref DUPLICATE_REJECTIONS: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "duplicate_submissions_rejected_total",
            "Submissions rejected by the duplicate window check"
        ),
        &["kind"]
    )
    .expect("metric can be created");
}

/// Which document a submission would create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum TransactionKind {
    Sale,
    Purchase,
}

impl TransactionKind {
    fn label(self) -> &'static str {
        match self {
            TransactionKind::Sale => "sale",
            TransactionKind::Purchase => "purchase",
        }
    }
}

/// The fields that identify a resubmission: two documents of the same kind
/// for the same product, quantity and unit price inside the window count as
/// one submission sent twice.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionCandidate {
    pub kind: TransactionKind,
    pub product_id: i32,
    pub quantity: i32,
    pub unit_price: Decimal,
}

impl SubmissionCandidate {
    pub fn sale(product_id: i32, quantity: i32, unit_price: Decimal) -> Self {
        Self {
            kind: TransactionKind::Sale,
            product_id,
            quantity,
            unit_price,
        }
    }

    pub fn purchase(product_id: i32, quantity: i32, unit_price: Decimal) -> Self {
        Self {
            kind: TransactionKind::Purchase,
            product_id,
            quantity,
            unit_price,
        }
    }
}

/// Window-based duplicate check shared by the sale and purchase insert
/// paths.
///
/// The check runs inside the insert's own transaction, under the product
/// lock, so two identical concurrent submissions cannot both pass it.
/// Deleted documents do not count: resubmitting after an undo is a new
/// submission.
#[derive(Debug, Clone, Copy, Default)]
pub struct DuplicateSubmissionGuard;

impl DuplicateSubmissionGuard {
    pub fn new() -> Self {
        Self
    }

    /// Whether an identical non-deleted document of the same kind was
    /// created within the window.
    pub async fn is_duplicate<C: ConnectionTrait>(
        &self,
        conn: &C,
        candidate: &SubmissionCandidate,
        window: Duration,
    ) -> Result<bool, ServiceError> {
        let cutoff = Utc::now() - window;

        let count = match candidate.kind {
            TransactionKind::Sale => sale::Entity::find()
                .filter(sale::Column::ProductId.eq(candidate.product_id))
                .filter(sale::Column::Quantity.eq(candidate.quantity))
                .filter(sale::Column::UnitPrice.eq(candidate.unit_price))
                .filter(sale::Column::IsDeleted.eq(false))
                .filter(sale::Column::CreatedAt.gte(cutoff))
                .count(conn)
                .await
                .map_err(ServiceError::db_error)?,
            TransactionKind::Purchase => purchase::Entity::find()
                .filter(purchase::Column::ProductId.eq(candidate.product_id))
                .filter(purchase::Column::Quantity.eq(candidate.quantity))
                .filter(purchase::Column::UnitPrice.eq(candidate.unit_price))
                .filter(purchase::Column::IsDeleted.eq(false))
                .filter(purchase::Column::CreatedAt.gte(cutoff))
                .count(conn)
                .await
                .map_err(ServiceError::db_error)?,
        };

        Ok(count > 0)
    }

    /// [`is_duplicate`](Self::is_duplicate) raised to an error for insert
    /// paths.
    pub async fn check<C: ConnectionTrait>(
        &self,
        conn: &C,
        candidate: &SubmissionCandidate,
        window: Duration,
    ) -> Result<(), ServiceError> {
        if self.is_duplicate(conn, candidate, window).await? {
            DUPLICATE_REJECTIONS
                .with_label_values(&[candidate.kind.label()])
                .inc();
            warn!(
                kind = %candidate.kind,
                product_id = candidate.product_id,
                quantity = candidate.quantity,
                "Rejected resubmission inside the duplicate window"
            );
            return Err(ServiceError::DuplicateSubmission(format!(
                "An identical {} for product {} was submitted less than {}s ago",
                candidate.kind.label(),
                candidate.product_id,
                window.num_seconds()
            )));
        }
        Ok(())
    }
}
