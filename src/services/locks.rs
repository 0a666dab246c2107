use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

use crate::errors::ServiceError;

/// Per-product serialization of mutating operations.
///
/// Hands out one mutex per product id on demand. This is the in-process
/// equivalent of row locking for stores without `SELECT ... FOR UPDATE`;
/// holding the lock across the duplicate check and the write closes the
/// check-then-act race between identical concurrent requests.
#[derive(Debug, Clone, Default)]
pub struct ProductLockMap {
    locks: Arc<DashMap<i32, Arc<Mutex<()>>>>,
}

impl ProductLockMap {
    pub fn new() -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Acquires the lock for one product, waiting at most `wait`.
    ///
    /// A timed-out wait fails with `LockContention` rather than silently
    /// dropping the stock change; callers may retry.
    pub async fn acquire(
        &self,
        product_id: i32,
        wait: Duration,
    ) -> Result<OwnedMutexGuard<()>, ServiceError> {
        let lock = self.locks.entry(product_id).or_default().clone();

        match tokio::time::timeout(wait, lock.lock_owned()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                warn!(
                    product_id = product_id,
                    wait_ms = wait.as_millis() as u64,
                    "Per-product lock wait timed out"
                );
                Err(ServiceError::LockContention(product_id))
            }
        }
    }

    /// Acquires locks for two products, always in ascending id order so
    /// concurrent compound edits cannot deadlock each other.
    pub async fn acquire_pair(
        &self,
        first_product: i32,
        second_product: i32,
        wait: Duration,
    ) -> Result<(OwnedMutexGuard<()>, Option<OwnedMutexGuard<()>>), ServiceError> {
        if first_product == second_product {
            let guard = self.acquire(first_product, wait).await?;
            return Ok((guard, None));
        }

        let (low, high) = if first_product < second_product {
            (first_product, second_product)
        } else {
            (second_product, first_product)
        };

        let low_guard = self.acquire(low, wait).await?;
        let high_guard = self.acquire(high, wait).await?;
        Ok((low_guard, Some(high_guard)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn contended_lock_times_out() {
        let locks = ProductLockMap::new();
        let held = locks.acquire(1, Duration::from_millis(100)).await.unwrap();

        let result = locks.acquire(1, Duration::from_millis(20)).await;
        assert_matches!(result, Err(ServiceError::LockContention(1)));

        drop(held);
        assert!(locks.acquire(1, Duration::from_millis(100)).await.is_ok());
    }

    #[tokio::test]
    async fn different_products_do_not_contend() {
        let locks = ProductLockMap::new();
        let _one = locks.acquire(1, Duration::from_millis(20)).await.unwrap();
        let _two = locks.acquire(2, Duration::from_millis(20)).await.unwrap();
    }

    #[tokio::test]
    async fn pair_acquisition_handles_same_product() {
        let locks = ProductLockMap::new();
        let (_guard, second) = locks
            .acquire_pair(7, 7, Duration::from_millis(100))
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn pair_acquisition_orders_by_id() {
        let locks = ProductLockMap::new();
        let (_a, _b) = locks
            .acquire_pair(9, 3, Duration::from_millis(100))
            .await
            .unwrap();
        // Reversed argument order takes the same two locks once released
        drop(_a);
        drop(_b);
        let (_c, _d) = locks
            .acquire_pair(3, 9, Duration::from_millis(100))
            .await
            .unwrap();
    }
}
