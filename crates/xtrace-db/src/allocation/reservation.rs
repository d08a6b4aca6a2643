//! # Reservation Coordinator
//!
//! Commits capacity against a pool before any serial is generated, and
//! settles it again once the engine is done.
//!
//! ## Ticket Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  pool P1: total=100 reserved=40 generated=40                           │
//! │                                                                         │
//! │  reserve(P1, 100) ──► grant = min(100, 100 - 40) = 60                  │
//! │                       reserved=100, ticket{granted: 60}                │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  engine creates 57 (ceiling hit)                                       │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  reconcile(ticket, 57) ──► release 3                                   │
//! │                            reserved=97 generated=COUNT(*)=97           │
//! │                            status derived from generated               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every counter change runs under the pool's lock from [`PoolLocks`] and is
//! applied as a compare-and-swap, so a writer in another process can't slip
//! an update between the read and the write.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use crate::locks::PoolLocks;
use crate::repository::serial::SerialNumberRepository;
use crate::repository::serial_pool::SerialPoolRepository;
use xtrace_core::validation::validate_quantity;
use xtrace_core::{CoreError, PoolStatus, SerialPool};

/// Compare-and-swap attempts before giving up on a pool.
const MAX_SWAP_ATTEMPTS: u32 = 8;

/// Capacity granted to one allocation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservationTicket {
    /// Pool state right after the reservation committed.
    pub pool: SerialPool,

    /// What the caller asked for.
    pub requested: i64,

    /// What the pool could give (≤ requested).
    pub granted: i64,
}

impl ReservationTicket {
    pub fn pool_id(&self) -> &str {
        &self.pool.pool_id
    }
}

/// Serializes counter changes per pool.
#[derive(Debug, Clone)]
pub struct ReservationCoordinator {
    pools: SerialPoolRepository,
    serials: SerialNumberRepository,
    locks: Arc<PoolLocks>,
}

impl ReservationCoordinator {
    pub fn new(pools: SerialPoolRepository, serials: SerialNumberRepository, locks: Arc<PoolLocks>) -> Self {
        ReservationCoordinator { pools, serials, locks }
    }

    pub fn pools(&self) -> &SerialPoolRepository {
        &self.pools
    }

    /// Reserves up to `quantity` serials of capacity on a pool.
    ///
    /// ## Errors
    /// - `PoolNotFound`, `PoolVoided`, `PoolExhausted` as [`DbError::Domain`]
    /// - [`DbError::Contended`] if the swap keeps losing to other processes
    pub async fn reserve(&self, pool_id: &str, quantity: i64) -> DbResult<ReservationTicket> {
        validate_quantity(quantity).map_err(CoreError::from)?;

        let _guard = self.locks.acquire(pool_id).await;

        for attempt in 1..=MAX_SWAP_ATTEMPTS {
            let pool = self.load(pool_id).await?;

            if pool.status == PoolStatus::Void {
                return Err(CoreError::PoolVoided(pool.pool_id).into());
            }
            // EXHAUSTED, or every unit already held by a ticket
            if !pool.is_allocatable() {
                return Err(exhausted(&pool).into());
            }

            let grant = quantity.min(pool.unreserved());

            if let Some(updated) = self.pools.compare_and_reserve(&pool, grant, Utc::now()).await? {
                info!(
                    pool_id,
                    requested = quantity,
                    granted = grant,
                    reserved = updated.reserved_count,
                    total = updated.total_to_generate,
                    "Reserved pool capacity"
                );
                return Ok(ReservationTicket {
                    pool: updated,
                    requested: quantity,
                    granted: grant,
                });
            }

            warn!(pool_id, attempt, "Pool counters changed underneath reservation, retrying");
            tokio::task::yield_now().await;
        }

        Err(contended(pool_id))
    }

    /// Settles a ticket after the engine ran.
    ///
    /// Releases `granted - created` back to the pool, takes
    /// `generated_count` from the true row count and derives the status.
    pub async fn reconcile(&self, ticket: &ReservationTicket, created: i64) -> DbResult<SerialPool> {
        let pool_id = ticket.pool_id();
        let release = (ticket.granted - created).max(0);

        let _guard = self.locks.acquire(pool_id).await;
        let pool = self.settle(pool_id, |_| release).await?;

        info!(
            pool_id,
            granted = ticket.granted,
            created,
            released = release,
            generated = pool.generated_count,
            status = %pool.status,
            "Reconciled pool"
        );
        Ok(pool)
    }

    /// Resets `reserved_count` to the stored row count.
    ///
    /// Drops capacity held by tickets that were never reconciled (a crashed
    /// process). Must not run while an allocation on the pool is in flight
    /// in another process.
    pub async fn recover(&self, pool_id: &str) -> DbResult<SerialPool> {
        let _guard = self.locks.acquire(pool_id).await;
        let pool = self.settle(pool_id, |pool| pool.reserved_count).await?;

        info!(
            pool_id,
            reserved = pool.reserved_count,
            generated = pool.generated_count,
            status = %pool.status,
            "Recovered pool counters"
        );
        Ok(pool)
    }

    /// Voids a pool. Voiding a VOID pool is a no-op.
    pub async fn void_pool(&self, pool_id: &str) -> DbResult<SerialPool> {
        let _guard = self.locks.acquire(pool_id).await;

        let pool = self.load(pool_id).await?;
        if pool.status == PoolStatus::Void {
            debug!(pool_id, "Pool already void");
            return Ok(pool);
        }

        self.pools.set_void(pool_id, Utc::now()).await?;
        let pool = self.load(pool_id).await?;

        info!(pool_id, generated = pool.generated_count, "Pool voided");
        Ok(pool)
    }

    /// Re-reads the pool and row count and swaps in reconciled counters,
    /// releasing `release(pool)` of reserved capacity.
    async fn settle(&self, pool_id: &str, release: impl Fn(&SerialPool) -> i64) -> DbResult<SerialPool> {
        for attempt in 1..=MAX_SWAP_ATTEMPTS {
            let pool = self.load(pool_id).await?;
            let generated = self.serials.count_for_pool(pool_id).await?;

            if let Some(updated) = self
                .pools
                .reconcile_counts(&pool, release(&pool), generated, Utc::now())
                .await?
            {
                return Ok(updated);
            }

            warn!(pool_id, attempt, "Pool counters changed underneath reconciliation, retrying");
            tokio::task::yield_now().await;
        }

        Err(contended(pool_id))
    }

    async fn load(&self, pool_id: &str) -> DbResult<SerialPool> {
        self.pools
            .get_by_id(pool_id)
            .await?
            .ok_or_else(|| CoreError::PoolNotFound(pool_id.to_string()).into())
    }
}

fn exhausted(pool: &SerialPool) -> CoreError {
    CoreError::PoolExhausted {
        pool_id: pool.pool_id.clone(),
        total: pool.total_to_generate,
        reserved: pool.reserved_count,
    }
}

fn contended(pool_id: &str) -> DbError {
    DbError::Contended {
        entity: "Pool".to_string(),
        id: pool_id.to_string(),
        attempts: MAX_SWAP_ATTEMPTS,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use xtrace_core::NewSerialPool;

    async fn setup(total: i64) -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let new = NewSerialPool {
            pool_id: Some("P1".to_string()),
            product_gtin: "04006381333931".to_string(),
            total_to_generate: total,
        };
        db.serial_pools()
            .insert(&SerialPool::from_new(&new, Utc::now()))
            .await
            .unwrap();
        db
    }

    #[tokio::test]
    async fn test_reserve_grants_and_activates() {
        let db = setup(100).await;
        let ticket = db.coordinator().reserve("P1", 30).await.unwrap();

        assert_eq!(ticket.granted, 30);
        assert_eq!(ticket.requested, 30);
        assert_eq!(ticket.pool.reserved_count, 30);
        assert_eq!(ticket.pool.status, PoolStatus::Active);
    }

    #[tokio::test]
    async fn test_reserve_clamps_to_unreserved() {
        let db = setup(100).await;
        let coordinator = db.coordinator();

        coordinator.reserve("P1", 80).await.unwrap();
        let ticket = coordinator.reserve("P1", 50).await.unwrap();
        assert_eq!(ticket.granted, 20);
        assert_eq!(ticket.pool.reserved_count, 100);

        let err = coordinator.reserve("P1", 1).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::PoolExhausted { total: 100, reserved: 100, .. })
        ));
    }

    #[tokio::test]
    async fn test_reserve_rejections() {
        let db = setup(10).await;
        let coordinator = db.coordinator();

        let err = coordinator.reserve("nope", 1).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::PoolNotFound(_))));

        let err = coordinator.reserve("P1", 0).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::Validation(_))));

        coordinator.void_pool("P1").await.unwrap();
        let err = coordinator.reserve("P1", 1).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::PoolVoided(_))));
    }

    #[tokio::test]
    async fn test_empty_pool_is_exhausted_for_reservation() {
        let db = setup(0).await;
        let err = db.coordinator().reserve("P1", 1).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::PoolExhausted { .. })));
    }

    #[tokio::test]
    async fn test_exhausted_status_refuses_spare_capacity() {
        let db = setup(10).await;
        sqlx::query("UPDATE serial_pools SET status = 'EXHAUSTED' WHERE pool_id = 'P1'")
            .execute(db.pool())
            .await
            .unwrap();

        let err = db.coordinator().reserve("P1", 1).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::PoolExhausted { total: 10, reserved: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_reconcile_releases_unused_capacity() {
        let db = setup(10).await;
        let coordinator = db.coordinator();
        let ticket = coordinator.reserve("P1", 10).await.unwrap();

        let serials: Vec<String> = (0..6).map(|i| format!("S{i}")).collect();
        db.serial_numbers()
            .insert_batch("P1", &serials, 500, Utc::now())
            .await
            .unwrap();

        let pool = coordinator.reconcile(&ticket, 6).await.unwrap();
        assert_eq!(pool.reserved_count, 6);
        assert_eq!(pool.generated_count, 6);
        assert_eq!(pool.status, PoolStatus::Active);

        // The released 4 can be reserved again
        let ticket = coordinator.reserve("P1", 10).await.unwrap();
        assert_eq!(ticket.granted, 4);
    }

    #[tokio::test]
    async fn test_recover_drops_abandoned_tickets() {
        let db = setup(10).await;
        let coordinator = db.coordinator();

        // Reserved but never reconciled
        coordinator.reserve("P1", 10).await.unwrap();
        db.serial_numbers()
            .insert_batch("P1", &["S1".to_string(), "S2".to_string()], 500, Utc::now())
            .await
            .unwrap();

        let pool = coordinator.recover("P1").await.unwrap();
        assert_eq!(pool.reserved_count, 2);
        assert_eq!(pool.generated_count, 2);
    }

    #[tokio::test]
    async fn test_void_is_idempotent() {
        let db = setup(10).await;
        let coordinator = db.coordinator();

        let pool = coordinator.void_pool("P1").await.unwrap();
        assert_eq!(pool.status, PoolStatus::Void);
        let pool = coordinator.void_pool("P1").await.unwrap();
        assert_eq!(pool.status, PoolStatus::Void);

        let err = coordinator.void_pool("nope").await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::PoolNotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reservations_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(DbConfig::new(dir.path().join("xtrace.db")))
            .await
            .unwrap();
        let new = NewSerialPool {
            pool_id: Some("P1".to_string()),
            product_gtin: "04006381333931".to_string(),
            total_to_generate: 1_000,
        };
        db.serial_pools()
            .insert(&SerialPool::from_new(&new, Utc::now()))
            .await
            .unwrap();

        let handles: Vec<_> = (1..=20)
            .map(|q| {
                let coordinator = db.coordinator();
                tokio::spawn(async move { coordinator.reserve("P1", q).await.unwrap().granted })
            })
            .collect();

        let mut granted = 0;
        for handle in handles {
            granted += handle.await.unwrap();
        }

        // 1 + 2 + ... + 20
        assert_eq!(granted, 210);
        let pool = db.serial_pools().get_by_id("P1").await.unwrap().unwrap();
        assert_eq!(pool.reserved_count, 210);
    }
}
