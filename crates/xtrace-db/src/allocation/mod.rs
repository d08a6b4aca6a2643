//! # Allocation Pipeline
//!
//! Caller-facing service running one allocation request end to end.
//!
//! ## Request Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  AllocationRequest { pool_id, quantity, identifier_length }            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  validate ──────────────────────────────► Rejected(Validation)         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ReservationCoordinator::reserve ───────► Rejected(NotFound/Void/...)  │
//! │       │ ticket                                                          │
//! │       ▼                                                                 │
//! │  BulkAllocator::allocate                                               │
//! │       │ outcome (or StoreFailure)                                      │
//! │       ▼                                                                 │
//! │  ReservationCoordinator::reconcile   ← runs on failure too             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  AllocationReport { requested, granted, created, stop, pool }          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//! - [`reservation`] - Per-pool reservation, reconciliation, recovery
//! - [`engine`] - Generate / dedupe / insert loop

pub mod engine;
pub mod reservation;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::{AllocationError, DbResult};
use crate::repository::serial::SerialNumberRepository;
use engine::{AllocationOutcome, BulkAllocator, StopReason};
use reservation::ReservationCoordinator;
use xtrace_core::validation::{
    normalize_gtin, validate_batch_lot, validate_new_pool, validate_quantity,
};
use xtrace_core::{
    Alphabet, CoreError, LotAssignment, NewSerialPool, PoolStatus, SerialGenerator, SerialNumber,
    SerialPool, SerialStatus, DEFAULT_SERIAL_LENGTH,
};

// =============================================================================
// Request / Report
// =============================================================================

/// One request for `quantity` new serials on a pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationRequest {
    pub pool_id: String,
    pub quantity: i64,
    pub identifier_length: usize,
    pub alphabet: Alphabet,
}

impl AllocationRequest {
    /// Request over the default alphanumeric alphabet.
    pub fn new(pool_id: impl Into<String>, quantity: i64, identifier_length: usize) -> Self {
        AllocationRequest {
            pool_id: pool_id.into(),
            quantity,
            identifier_length,
            alphabet: Alphabet::alphanumeric(),
        }
    }

    /// Request with the default serial length.
    pub fn with_default_length(pool_id: impl Into<String>, quantity: i64) -> Self {
        AllocationRequest::new(pool_id, quantity, DEFAULT_SERIAL_LENGTH)
    }

    pub fn alphabet(mut self, alphabet: Alphabet) -> Self {
        self.alphabet = alphabet;
        self
    }
}

/// Whether a request got everything it asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationOutcomeKind {
    Full,
    Partial,
}

/// Result of a request that ran (fully or partially).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocationReport {
    pub pool_id: String,
    pub requested_count: i64,
    /// Capacity the pool could reserve (≤ requested).
    pub granted_count: i64,
    pub created_count: i64,
    pub attempts: i64,
    pub duplicates: i64,
    pub batches: u32,
    pub stop: StopReason,
    /// Pool state after reconciliation.
    pub pool: SerialPool,
}

impl AllocationReport {
    fn new(request: &AllocationRequest, granted: i64, outcome: AllocationOutcome, pool: SerialPool) -> Self {
        AllocationReport {
            pool_id: request.pool_id.clone(),
            requested_count: request.quantity,
            granted_count: granted,
            created_count: outcome.created_count,
            attempts: outcome.attempts,
            duplicates: outcome.duplicates,
            batches: outcome.batches,
            stop: outcome.stop,
            pool,
        }
    }

    pub fn outcome(&self) -> AllocationOutcomeKind {
        if self.created_count >= self.requested_count {
            AllocationOutcomeKind::Full
        } else {
            AllocationOutcomeKind::Partial
        }
    }

    pub fn is_full(&self) -> bool {
        self.outcome() == AllocationOutcomeKind::Full
    }
}

// =============================================================================
// Service
// =============================================================================

/// Pool management and allocation over one database.
#[derive(Debug, Clone)]
pub struct AllocationService {
    coordinator: ReservationCoordinator,
    allocator: BulkAllocator,
    serials: SerialNumberRepository,
}

impl AllocationService {
    pub fn new(coordinator: ReservationCoordinator, allocator: BulkAllocator, serials: SerialNumberRepository) -> Self {
        AllocationService {
            coordinator,
            allocator,
            serials,
        }
    }

    /// Creates a NEW pool for a product GTIN. The GTIN is stored padded to
    /// 14 digits.
    pub async fn create_pool(&self, new: &NewSerialPool) -> DbResult<SerialPool> {
        validate_new_pool(new).map_err(CoreError::from)?;

        let mut pool = SerialPool::from_new(new, Utc::now());
        pool.product_gtin = normalize_gtin(&new.product_gtin);

        self.coordinator.pools().insert(&pool).await?;

        info!(
            pool_id = %pool.pool_id,
            gtin = %pool.product_gtin,
            total = pool.total_to_generate,
            "Pool created"
        );
        Ok(pool)
    }

    /// Gets a pool, failing with `PoolNotFound`.
    pub async fn get_pool(&self, pool_id: &str) -> DbResult<SerialPool> {
        self.coordinator
            .pools()
            .get_by_id(pool_id)
            .await?
            .ok_or_else(|| CoreError::PoolNotFound(pool_id.to_string()).into())
    }

    pub async fn void_pool(&self, pool_id: &str) -> DbResult<SerialPool> {
        self.coordinator.void_pool(pool_id).await
    }

    pub async fn recover(&self, pool_id: &str) -> DbResult<SerialPool> {
        self.coordinator.recover(pool_id).await
    }

    /// Runs one allocation request: reserve, generate, reconcile.
    ///
    /// Partial results are returned as `Ok`; check
    /// [`AllocationReport::outcome`].
    pub async fn allocate(
        &self,
        request: &AllocationRequest,
        cancel: &CancellationToken,
    ) -> Result<AllocationReport, AllocationError> {
        validate_quantity(request.quantity).map_err(CoreError::from)?;
        let generator = SerialGenerator::new(request.alphabet.clone(), request.identifier_length)
            .map_err(CoreError::from)?;

        let ticket = self
            .coordinator
            .reserve(&request.pool_id, request.quantity)
            .await
            .map_err(|e| AllocationError::store_failure(&request.pool_id, request.quantity, 0, e))?;

        let result = self.allocator.allocate(&ticket, &generator, cancel).await;

        let created = match &result {
            Ok(outcome) => outcome.created_count,
            Err(AllocationError::StoreFailure { created, .. }) => *created,
            Err(AllocationError::Rejected(_)) => 0,
        };
        let reconciled = self.coordinator.reconcile(&ticket, created).await;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => {
                if let Err(reconcile_err) = reconciled {
                    error!(
                        pool_id = %request.pool_id,
                        error = %reconcile_err,
                        "Reconciliation after failed allocation also failed; run recover"
                    );
                }
                return Err(err);
            }
        };

        let pool = reconciled
            .map_err(|e| AllocationError::store_failure(&request.pool_id, request.quantity, created, e))?;

        Ok(AllocationReport::new(request, ticket.granted, outcome, pool))
    }

    /// Claims up to `count` ALLOCATED serials of a pool for printing.
    pub async fn print(&self, pool_id: &str, count: i64, lot: &LotAssignment) -> DbResult<Vec<SerialNumber>> {
        validate_quantity(count).map_err(CoreError::from)?;
        validate_batch_lot(&lot.batch_lot).map_err(CoreError::from)?;

        let pool = self.get_pool(pool_id).await?;
        if pool.status == PoolStatus::Void {
            return Err(CoreError::PoolVoided(pool.pool_id).into());
        }

        let printed = self.serials.mark_printed(pool_id, count, lot, Utc::now()).await?;
        info!(pool_id, requested = count, printed = printed.len(), lot = %lot.batch_lot, "Serials printed");
        Ok(printed)
    }

    /// Moves one serial to CONSUMED or VOID.
    pub async fn transition(&self, serial: &str, to: SerialStatus) -> DbResult<SerialNumber> {
        let updated = self.serials.transition(serial, to, Utc::now()).await?;
        info!(serial, status = %updated.status, "Serial status changed");
        Ok(updated)
    }

    /// PRINTED serials of a pool, oldest first.
    pub async fn printed_serials(&self, pool_id: &str, limit: i64) -> DbResult<Vec<SerialNumber>> {
        self.get_pool(pool_id).await?;
        self.serials
            .list_by_pool_and_status(pool_id, SerialStatus::Printed, limit)
            .await
    }

    /// Per-status serial counts of a pool.
    pub async fn status_counts(&self, pool_id: &str) -> DbResult<Vec<(SerialStatus, i64)>> {
        self.serials.count_by_status(pool_id).await
    }
}

#[cfg(test)]
mod tests;
