//! # Serial Number Repository
//!
//! Database operations for issued serials.
//!
//! ## Bulk Insert
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  insert_batch(["Ab3..", "x9Q..", ...])                                  │
//! │                                                                         │
//! │  BEGIN                                                                  │
//! │    INSERT INTO serial_numbers (...) VALUES (..),(..),...  ← chunk 1    │
//! │      ON CONFLICT(full_serial_number) DO NOTHING                        │
//! │    INSERT INTO serial_numbers (...) VALUES (..),(..),...  ← chunk 2    │
//! │      ON CONFLICT(full_serial_number) DO NOTHING                        │
//! │  COMMIT                                                                 │
//! │                                                                         │
//! │  Σ rows_affected = serials actually created                            │
//! │  (taken serials are skipped silently, never raised)                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Chunking keeps each statement under SQLite's bound-parameter limit.

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use xtrace_core::{CoreError, LotAssignment, SerialNumber, SerialStatus, ValidationError};

/// Bound parameters per inserted row.
const BINDS_PER_ROW: usize = 4;

/// SQLite's default SQLITE_MAX_VARIABLE_NUMBER.
pub const MAX_BIND_PARAMS: usize = 32_766;

/// Largest chunk `insert_batch` accepts.
pub const MAX_INSERT_CHUNK_ROWS: usize = MAX_BIND_PARAMS / BINDS_PER_ROW;

/// Lost races tolerated by [`SerialNumberRepository::transition`].
const MAX_TRANSITION_ATTEMPTS: u32 = 3;

/// Repository for serial number database operations.
#[derive(Debug, Clone)]
pub struct SerialNumberRepository {
    pool: SqlitePool,
}

impl SerialNumberRepository {
    /// Creates a new SerialNumberRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SerialNumberRepository { pool }
    }

    /// Inserts ALLOCATED serials for a pool, skipping any that are taken.
    ///
    /// Runs in one transaction: either every chunk commits or none does.
    ///
    /// ## Returns
    /// Number of rows actually inserted.
    pub async fn insert_batch(
        &self,
        pool_id: &str,
        serials: &[String],
        chunk_rows: usize,
        now: DateTime<Utc>,
    ) -> DbResult<u64> {
        if serials.is_empty() {
            return Ok(0);
        }

        let chunk_rows = chunk_rows.clamp(1, MAX_INSERT_CHUNK_ROWS);
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for chunk in serials.chunks(chunk_rows) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO serial_numbers (full_serial_number, pool_id, status, last_modified) ",
            );
            builder.push_values(chunk, |mut row, serial| {
                row.push_bind(serial)
                    .push_bind(pool_id)
                    .push_bind(SerialStatus::Allocated)
                    .push_bind(now);
            });
            builder.push(" ON CONFLICT(full_serial_number) DO NOTHING");

            let result = builder.build().execute(&mut *tx).await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;

        debug!(pool_id, offered = serials.len(), inserted, "Inserted serial batch");
        Ok(inserted)
    }

    /// Gets a serial by its value.
    pub async fn get(&self, serial: &str) -> DbResult<Option<SerialNumber>> {
        let found = sqlx::query_as::<_, SerialNumber>(
            r#"
            SELECT
                id, full_serial_number, pool_id, status,
                batch_lot, expiration_date, last_modified
            FROM serial_numbers
            WHERE full_serial_number = ?1
            "#,
        )
        .bind(serial)
        .fetch_optional(&self.pool)
        .await?;

        Ok(found)
    }

    /// Counts every serial stored for a pool, whatever its status.
    pub async fn count_for_pool(&self, pool_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM serial_numbers WHERE pool_id = ?1")
            .bind(pool_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Counts a pool's serials per status. Statuses with no serials are
    /// omitted.
    pub async fn count_by_status(&self, pool_id: &str) -> DbResult<Vec<(SerialStatus, i64)>> {
        let counts = sqlx::query_as::<_, (SerialStatus, i64)>(
            r#"
            SELECT status, COUNT(*)
            FROM serial_numbers
            WHERE pool_id = ?1
            GROUP BY status
            ORDER BY status
            "#,
        )
        .bind(pool_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(counts)
    }

    /// Lists a pool's serials in one status, oldest first.
    pub async fn list_by_pool_and_status(
        &self,
        pool_id: &str,
        status: SerialStatus,
        limit: i64,
    ) -> DbResult<Vec<SerialNumber>> {
        let serials = sqlx::query_as::<_, SerialNumber>(
            r#"
            SELECT
                id, full_serial_number, pool_id, status,
                batch_lot, expiration_date, last_modified
            FROM serial_numbers
            WHERE pool_id = ?1 AND status = ?2
            ORDER BY id
            LIMIT ?3
            "#,
        )
        .bind(pool_id)
        .bind(status)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(serials)
    }

    /// Claims up to `count` ALLOCATED serials of a pool for printing and
    /// binds lot and expiry to them.
    ///
    /// The select and the update are one statement, so two production
    /// lines printing from the same pool never claim the same serial.
    ///
    /// ## Returns
    /// The claimed serials (fewer than `count` if the pool ran short).
    pub async fn mark_printed(
        &self,
        pool_id: &str,
        count: i64,
        lot: &LotAssignment,
        now: DateTime<Utc>,
    ) -> DbResult<Vec<SerialNumber>> {
        let mut printed = sqlx::query_as::<_, SerialNumber>(
            r#"
            UPDATE serial_numbers SET
                status = ?3,
                batch_lot = ?4,
                expiration_date = ?5,
                last_modified = ?6
            WHERE id IN (
                SELECT id FROM serial_numbers
                WHERE pool_id = ?1 AND status = ?2
                ORDER BY id
                LIMIT ?7
            )
            RETURNING
                id, full_serial_number, pool_id, status,
                batch_lot, expiration_date, last_modified
            "#,
        )
        .bind(pool_id)
        .bind(SerialStatus::Allocated)
        .bind(SerialStatus::Printed)
        .bind(&lot.batch_lot)
        .bind(lot.expiration_date)
        .bind(now)
        .bind(count)
        .fetch_all(&self.pool)
        .await?;

        // RETURNING order is unspecified
        printed.sort_by_key(|serial| serial.id);

        debug!(pool_id, requested = count, printed = printed.len(), lot = %lot.batch_lot, "Marked serials printed");
        Ok(printed)
    }

    /// Moves one serial to CONSUMED or VOID.
    ///
    /// PRINTED is reached only through [`mark_printed`](Self::mark_printed),
    /// which binds lot and expiry.
    pub async fn transition(
        &self,
        serial: &str,
        to: SerialStatus,
        now: DateTime<Utc>,
    ) -> DbResult<SerialNumber> {
        if to == SerialStatus::Printed {
            return Err(CoreError::from(ValidationError::InvalidFormat {
                field: "status".to_string(),
                reason: "PRINTED requires a lot and expiration date; print from the pool instead"
                    .to_string(),
            })
            .into());
        }

        for _ in 0..MAX_TRANSITION_ATTEMPTS {
            let current = self
                .get(serial)
                .await?
                .ok_or_else(|| CoreError::SerialNotFound(serial.to_string()))?;

            if !current.status.can_transition_to(to) {
                return Err(CoreError::InvalidSerialTransition {
                    serial: serial.to_string(),
                    from: current.status,
                    to,
                }
                .into());
            }

            let updated = sqlx::query_as::<_, SerialNumber>(
                r#"
                UPDATE serial_numbers
                SET status = ?3, last_modified = ?4
                WHERE full_serial_number = ?1 AND status = ?2
                RETURNING
                    id, full_serial_number, pool_id, status,
                    batch_lot, expiration_date, last_modified
                "#,
            )
            .bind(serial)
            .bind(current.status)
            .bind(to)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

            if let Some(updated) = updated {
                debug!(serial, from = %current.status, to = %to, "Serial transitioned");
                return Ok(updated);
            }
        }

        Err(DbError::Contended {
            entity: "Serial".to_string(),
            id: serial.to_string(),
            attempts: MAX_TRANSITION_ATTEMPTS,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
