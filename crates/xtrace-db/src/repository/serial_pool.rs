//! # Serial Pool Repository
//!
//! Database operations for allocation pools.
//!
//! ## Counter Updates Are Compare-And-Swap
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. read snapshot      reserved=40  generated=40  status=ACTIVE        │
//! │  2. compute update     reserved=60                                     │
//! │  3. UPDATE serial_pools SET reserved_count = 60 ...                    │
//! │       WHERE pool_id = ?                                                │
//! │         AND reserved_count = 40                                        │
//! │         AND generated_count = 40                                       │
//! │         AND status = 'ACTIVE'                                          │
//! │  4. no row back?  someone else moved the counters → re-read, retry     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each swap is a single autocommit statement. The caller (the reservation
//! coordinator) holds the per-pool lock, so within one process the swap only
//! fails when another process touched the pool.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use xtrace_core::{PoolStatus, SerialPool};

/// Repository for serial pool database operations.
#[derive(Debug, Clone)]
pub struct SerialPoolRepository {
    pool: SqlitePool,
}

impl SerialPoolRepository {
    /// Creates a new SerialPoolRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SerialPoolRepository { pool }
    }

    /// Inserts a freshly built pool.
    ///
    /// A taken `pool_id` comes back as [`DbError::UniqueViolation`].
    pub async fn insert(&self, serial_pool: &SerialPool) -> DbResult<()> {
        debug!(pool_id = %serial_pool.pool_id, total = serial_pool.total_to_generate, "Inserting pool");

        sqlx::query(
            r#"
            INSERT INTO serial_pools (
                pool_id, product_gtin, total_to_generate,
                reserved_count, generated_count, status,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&serial_pool.pool_id)
        .bind(&serial_pool.product_gtin)
        .bind(serial_pool.total_to_generate)
        .bind(serial_pool.reserved_count)
        .bind(serial_pool.generated_count)
        .bind(serial_pool.status)
        .bind(serial_pool.created_at)
        .bind(serial_pool.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { .. } => DbError::duplicate("pool_id", &serial_pool.pool_id),
            other => other,
        })?;

        Ok(())
    }

    /// Gets a pool by id.
    pub async fn get_by_id(&self, pool_id: &str) -> DbResult<Option<SerialPool>> {
        let serial_pool = sqlx::query_as::<_, SerialPool>(
            r#"
            SELECT
                pool_id, product_gtin, total_to_generate,
                reserved_count, generated_count, status,
                created_at, updated_at
            FROM serial_pools
            WHERE pool_id = ?1
            "#,
        )
        .bind(pool_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(serial_pool)
    }

    /// Lists pools, newest first, optionally filtered by status.
    pub async fn list(&self, status: Option<PoolStatus>) -> DbResult<Vec<SerialPool>> {
        let pools = sqlx::query_as::<_, SerialPool>(
            r#"
            SELECT
                pool_id, product_gtin, total_to_generate,
                reserved_count, generated_count, status,
                created_at, updated_at
            FROM serial_pools
            WHERE ?1 IS NULL OR status = ?1
            ORDER BY created_at DESC, pool_id
            "#,
        )
        .bind(status)
        .fetch_all(&self.pool)
        .await?;

        Ok(pools)
    }

    /// Adds `grant` to `reserved_count` if the pool still matches `snapshot`.
    ///
    /// A NEW pool becomes ACTIVE. Returns the updated row, or `None` when
    /// the snapshot is stale.
    pub async fn compare_and_reserve(
        &self,
        snapshot: &SerialPool,
        grant: i64,
        now: DateTime<Utc>,
    ) -> DbResult<Option<SerialPool>> {
        let status = match snapshot.status {
            PoolStatus::New => PoolStatus::Active,
            other => other,
        };

        self.swap_counters(
            snapshot,
            snapshot.reserved_count + grant,
            snapshot.generated_count,
            status,
            now,
        )
        .await
    }

    /// Writes reconciled counters if the pool still matches `snapshot`.
    ///
    /// `release` is the unused part of a ticket; `generated` is the true row
    /// count. `reserved_count` never drops below `generated`.
    pub async fn reconcile_counts(
        &self,
        snapshot: &SerialPool,
        release: i64,
        generated: i64,
        now: DateTime<Utc>,
    ) -> DbResult<Option<SerialPool>> {
        let reserved = (snapshot.reserved_count - release)
            .max(generated)
            .min(snapshot.total_to_generate);
        let status = snapshot.status.reconciled(generated, snapshot.total_to_generate);

        self.swap_counters(snapshot, reserved, generated, status, now)
            .await
    }

    /// Sets a pool VOID. Returns false if it was already VOID or is missing.
    pub async fn set_void(&self, pool_id: &str, now: DateTime<Utc>) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE serial_pools
            SET status = ?2, updated_at = ?3
            WHERE pool_id = ?1 AND status != ?2
            "#,
        )
        .bind(pool_id)
        .bind(PoolStatus::Void)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn swap_counters(
        &self,
        snapshot: &SerialPool,
        reserved: i64,
        generated: i64,
        status: PoolStatus,
        now: DateTime<Utc>,
    ) -> DbResult<Option<SerialPool>> {
        let updated = sqlx::query_as::<_, SerialPool>(
            r#"
            UPDATE serial_pools SET
                reserved_count = ?5,
                generated_count = ?6,
                status = ?7,
                updated_at = ?8
            WHERE pool_id = ?1
              AND reserved_count = ?2
              AND generated_count = ?3
              AND status = ?4
            RETURNING
                pool_id, product_gtin, total_to_generate,
                reserved_count, generated_count, status,
                created_at, updated_at
            "#,
        )
        .bind(&snapshot.pool_id)
        .bind(snapshot.reserved_count)
        .bind(snapshot.generated_count)
        .bind(snapshot.status)
        .bind(reserved)
        .bind(generated)
        .bind(status)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(updated)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
