use futures::future::BoxFuture;
use sea_orm::{DatabaseConnection, DatabaseTransaction, TransactionTrait};
use tracing::debug;

use crate::errors::ServiceError;

/// Where a unit of work runs: at the root, opening its own transaction, or
/// joined to a transaction a caller already holds.
///
/// Passing the scope explicitly keeps nested units of work honest: a joined
/// scope never opens a second transaction, so an outer failure rolls back
/// everything the inner unit wrote.
#[derive(Clone, Copy, Debug)]
pub enum StoreScope<'a> {
    Root(&'a DatabaseConnection),
    Joined(&'a DatabaseTransaction),
}

impl<'a> From<&'a DatabaseConnection> for StoreScope<'a> {
    fn from(db: &'a DatabaseConnection) -> Self {
        StoreScope::Root(db)
    }
}

impl<'a> From<&'a DatabaseTransaction> for StoreScope<'a> {
    fn from(txn: &'a DatabaseTransaction) -> Self {
        StoreScope::Joined(txn)
    }
}

/// Runs closures transactionally with explicit re-entrancy.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionCoordinator;

impl TransactionCoordinator {
    pub fn new() -> Self {
        Self
    }

    /// Runs `op` atomically in the given scope.
    ///
    /// `Root` opens a fresh transaction that commits on Ok and rolls back on
    /// Err; dropping the returned future before completion also rolls back.
    /// `Joined` reuses the caller's transaction, deferring commit or
    /// rollback to the outermost scope.
    pub async fn run_atomic<F, T>(&self, scope: StoreScope<'_>, op: F) -> Result<T, ServiceError>
    where
        F: for<'t> FnOnce(&'t DatabaseTransaction) -> BoxFuture<'t, Result<T, ServiceError>>
            + Send,
        T: Send,
    {
        match scope {
            StoreScope::Root(db) => {
                debug!("Opening root transaction scope");
                db.transaction::<_, T, ServiceError>(move |txn| op(txn))
                    .await
                    .map_err(|e| match e {
                        sea_orm::TransactionError::Connection(db_err) => {
                            ServiceError::TransactionFailure(db_err)
                        }
                        sea_orm::TransactionError::Transaction(service_err) => service_err,
                    })
            }
            StoreScope::Joined(txn) => {
                debug!("Joining existing transaction scope");
                op(txn).await
            }
        }
    }
}
