use sea_orm::error::DbErr;

/// Unified error type for every engine and service operation.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Transaction failure: {0}")]
    TransactionFailure(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("No inventory record for product {0}")]
    NoInventoryRecord(i32),

    #[error("Duplicate submission: {0}")]
    DuplicateSubmission(String),

    #[error("Reserved quantity {reserved} exceeds quantity {quantity}")]
    ReservedExceedsQuantity { reserved: i32, quantity: i32 },

    #[error("Lock wait timed out for product {0}")]
    LockContention(i32),

    #[error("Event error: {0}")]
    EventError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

/// Inputs [`ServiceError::db_error`] accepts: a real `DbErr` passes
/// through, strings become `DbErr::Custom`.
pub trait DbErrInput {
    fn into_db_err(self) -> DbErr;
}

impl DbErrInput for DbErr {
    fn into_db_err(self) -> DbErr {
        self
    }
}

impl DbErrInput for String {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self)
    }
}

impl DbErrInput for &str {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self.to_owned())
    }
}

impl ServiceError {
    /// Wraps any accepted database error input as a `TransactionFailure`.
    pub fn db_error(error: impl DbErrInput) -> Self {
        ServiceError::TransactionFailure(error.into_db_err())
    }

    /// Whether the caller may retry the same operation unchanged.
    ///
    /// Lock contention and store failures are transient; everything else is
    /// a deterministic rejection that a retry would reproduce.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LockContention(_) | Self::TransactionFailure(_)
        )
    }

    /// Whether the error is attributable to the request rather than the
    /// store, i.e. the 4xx side of the taxonomy.
    pub fn is_rejection(&self) -> bool {
        match self {
            Self::NotFound(_)
            | Self::ValidationError(_)
            | Self::InsufficientStock(_)
            | Self::NoInventoryRecord(_)
            | Self::DuplicateSubmission(_)
            | Self::ReservedExceedsQuantity { .. } => true,
            Self::TransactionFailure(_) | Self::LockContention(_) | Self::EventError(_) => false,
        }
    }

    /// Stable label used by the failure counters.
    pub fn metric_label(&self) -> &'static str {
        match self {
            Self::TransactionFailure(_) => "transaction_failure",
            Self::NotFound(_) => "not_found",
            Self::ValidationError(_) => "validation_error",
            Self::InsufficientStock(_) => "insufficient_stock",
            Self::NoInventoryRecord(_) => "no_inventory_record",
            Self::DuplicateSubmission(_) => "duplicate_submission",
            Self::ReservedExceedsQuantity { .. } => "reserved_exceeds_quantity",
            Self::LockContention(_) => "lock_contention",
            Self::EventError(_) => "event_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(ServiceError::LockContention(7).is_retryable());
        assert!(ServiceError::TransactionFailure(DbErr::Custom("down".into())).is_retryable());

        assert!(!ServiceError::InsufficientStock("x".into()).is_retryable());
        assert!(!ServiceError::DuplicateSubmission("x".into()).is_retryable());
        assert!(!ServiceError::NoInventoryRecord(7).is_retryable());
    }

    #[test]
    fn rejection_classification() {
        assert!(ServiceError::InsufficientStock("x".into()).is_rejection());
        assert!(ServiceError::NoInventoryRecord(7).is_rejection());
        assert!(ServiceError::DuplicateSubmission("x".into()).is_rejection());
        assert!(ServiceError::ReservedExceedsQuantity {
            reserved: 5,
            quantity: 3
        }
        .is_rejection());
        assert!(ServiceError::ValidationError("x".into()).is_rejection());
        assert!(ServiceError::NotFound("x".into()).is_rejection());

        assert!(!ServiceError::TransactionFailure(DbErr::Custom("down".into())).is_rejection());
        assert!(!ServiceError::LockContention(7).is_rejection());
        assert!(!ServiceError::EventError("x".into()).is_rejection());
    }

    #[test]
    fn metric_labels_are_stable() {
        assert_eq!(
            ServiceError::InsufficientStock("x".into()).metric_label(),
            "insufficient_stock"
        );
        assert_eq!(
            ServiceError::DuplicateSubmission("x".into()).metric_label(),
            "duplicate_submission"
        );
        assert_eq!(ServiceError::LockContention(7).metric_label(), "lock_contention");
        assert_eq!(
            ServiceError::ReservedExceedsQuantity {
                reserved: 1,
                quantity: 0
            }
            .metric_label(),
            "reserved_exceeds_quantity"
        );
    }

    #[test]
    fn db_error_helper_normalizes_inputs() {
        let from_str = ServiceError::db_error("boom");
        assert!(matches!(
            from_str,
            ServiceError::TransactionFailure(DbErr::Custom(_))
        ));

        let from_db = ServiceError::db_error(DbErr::Custom("boom".into()));
        assert!(matches!(
            from_db,
            ServiceError::TransactionFailure(DbErr::Custom(_))
        ));
    }
}
