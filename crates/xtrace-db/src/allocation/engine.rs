//! # Bulk Allocation Engine
//!
//! Turns a reservation ticket into stored serials.
//!
//! ## Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  space   = alphabet_size ^ length                                      │
//! │  ceiling = max(granted × attempt_multiplier,                           │
//! │                space × (ln space + slack))  when space is small         │
//! │                                                                         │
//! │  while created < granted:                                              │
//! │    ├── cancelled?                    → stop: Cancelled                 │
//! │    ├── attempts == ceiling?          → stop: AttemptCeilingExceeded    │
//! │    ├── created == space?             → stop: AttemptCeilingExceeded    │
//! │    ├── draw candidates into a HashSet until                            │
//! │    │     |set| == min(batch_size, granted - created, space - created)  │
//! │    │     or the ceiling is reached   (repeat draws = duplicates)       │
//! │    ├── insert_batch(set)  ON CONFLICT DO NOTHING, one transaction      │
//! │    └── created += inserted;  duplicates += |set| - inserted            │
//! │                                                                         │
//! │  stop: Completed                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Only the current batch is held in memory; uniqueness against everything
//! already stored is the UNIQUE constraint's job. A short result is an
//! outcome, not an error.

use std::collections::HashSet;
use std::fmt;

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::reservation::ReservationTicket;
use crate::error::AllocationError;
use crate::repository::serial::{SerialNumberRepository, MAX_INSERT_CHUNK_ROWS};
use xtrace_core::validation::ValidationResult;
use xtrace_core::{SerialGenerator, ValidationError, DEFAULT_ATTEMPT_MULTIPLIER, DEFAULT_BATCH_SIZE};

/// Default rows per INSERT statement.
pub const DEFAULT_INSERT_CHUNK_ROWS: usize = 500;

/// Extra `space` multiples of draws allowed when the whole candidate space
/// has to be collected. The chance of still missing a value is below
/// `e^-COUPON_SLACK`.
const COUPON_SLACK: f64 = 20.0;

/// Spaces up to this multiple of the base ceiling get the collection bound.
const SMALL_SPACE_FACTOR: i64 = 4;

// =============================================================================
// Configuration
// =============================================================================

/// Tuning for the allocation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorConfig {
    /// Candidates generated and inserted per transaction.
    pub batch_size: usize,

    /// Attempt ceiling as a multiple of the granted quantity.
    pub attempt_multiplier: u32,

    /// Rows per INSERT statement inside a batch.
    pub insert_chunk_rows: usize,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        AllocatorConfig {
            batch_size: DEFAULT_BATCH_SIZE,
            attempt_multiplier: DEFAULT_ATTEMPT_MULTIPLIER,
            insert_chunk_rows: DEFAULT_INSERT_CHUNK_ROWS,
        }
    }
}

impl AllocatorConfig {
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn attempt_multiplier(mut self, multiplier: u32) -> Self {
        self.attempt_multiplier = multiplier;
        self
    }

    pub fn insert_chunk_rows(mut self, rows: usize) -> Self {
        self.insert_chunk_rows = rows;
        self
    }

    /// Checks every knob is usable.
    pub fn validate(&self) -> ValidationResult<()> {
        if self.batch_size == 0 {
            return Err(ValidationError::MustBePositive {
                field: "batch_size".to_string(),
            });
        }

        if self.attempt_multiplier == 0 {
            return Err(ValidationError::MustBePositive {
                field: "attempt_multiplier".to_string(),
            });
        }

        if self.insert_chunk_rows == 0 || self.insert_chunk_rows > MAX_INSERT_CHUNK_ROWS {
            return Err(ValidationError::OutOfRange {
                field: "insert_chunk_rows".to_string(),
                min: 1,
                max: MAX_INSERT_CHUNK_ROWS as i64,
            });
        }

        Ok(())
    }
}

// =============================================================================
// Outcome
// =============================================================================

/// Why the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Every granted serial was created.
    Completed,
    /// Too many candidates collided before the grant was met.
    AttemptCeilingExceeded,
    /// The cancellation token fired between batches.
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StopReason::Completed => "completed",
            StopReason::AttemptCeilingExceeded => "attempt ceiling exceeded",
            StopReason::Cancelled => "cancelled",
        })
    }
}

/// What one engine run produced.
///
/// `attempts == created_count + duplicates` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AllocationOutcome {
    pub created_count: i64,
    pub attempts: i64,
    /// Candidates drawn but not stored (repeated within a batch or already
    /// taken in storage).
    pub duplicates: i64,
    pub batches: u32,
    pub stop: StopReason,
}

// =============================================================================
// Engine
// =============================================================================

/// Generates, dedupes and inserts serials for a ticket.
#[derive(Debug, Clone)]
pub struct BulkAllocator {
    serials: SerialNumberRepository,
    config: AllocatorConfig,
}

impl BulkAllocator {
    pub fn new(serials: SerialNumberRepository, config: AllocatorConfig) -> Self {
        BulkAllocator { serials, config }
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Fills `ticket.granted` serials, or as many as the attempt ceiling
    /// and cancellation allow.
    ///
    /// ## Errors
    /// [`AllocationError::StoreFailure`] when an insert fails for any reason
    /// other than a taken serial. The failing batch is rolled back; earlier
    /// batches stay and are counted in the error.
    pub async fn allocate(
        &self,
        ticket: &ReservationTicket,
        generator: &SerialGenerator,
        cancel: &CancellationToken,
    ) -> Result<AllocationOutcome, AllocationError> {
        let pool_id = ticket.pool_id();
        let granted = ticket.granted;
        let space = i64::try_from(generator.candidate_space()).unwrap_or(i64::MAX);
        let ceiling = attempt_ceiling(granted, self.config.attempt_multiplier, space);

        let mut outcome = AllocationOutcome {
            created_count: 0,
            attempts: 0,
            duplicates: 0,
            batches: 0,
            stop: StopReason::Completed,
        };

        while outcome.created_count < granted {
            if cancel.is_cancelled() {
                outcome.stop = StopReason::Cancelled;
                break;
            }

            let draws_left = ceiling - outcome.attempts;
            if draws_left <= 0 {
                outcome.stop = StopReason::AttemptCeilingExceeded;
                break;
            }

            // Values stored by this run can't be drawn again
            let fresh = space - outcome.created_count;
            if fresh <= 0 {
                outcome.stop = StopReason::AttemptCeilingExceeded;
                break;
            }

            let want = (granted - outcome.created_count)
                .min(self.config.batch_size as i64)
                .min(fresh) as usize;
            let (batch, draws) = draw_batch(generator, &mut rand::rng(), want, draws_left);
            outcome.attempts += draws;
            outcome.duplicates += draws - batch.len() as i64;

            if batch.is_empty() {
                outcome.stop = StopReason::AttemptCeilingExceeded;
                break;
            }

            let batch: Vec<String> = batch.into_iter().collect();
            let inserted = self
                .serials
                .insert_batch(pool_id, &batch, self.config.insert_chunk_rows, Utc::now())
                .await
                .map_err(|e| AllocationError::store_failure(pool_id, granted, outcome.created_count, e))?
                as i64;

            outcome.created_count += inserted;
            outcome.duplicates += batch.len() as i64 - inserted;
            outcome.batches += 1;

            debug!(
                pool_id,
                batch = outcome.batches,
                offered = batch.len(),
                inserted,
                created = outcome.created_count,
                granted,
                "Batch inserted"
            );
        }

        if outcome.created_count < granted {
            warn!(
                pool_id,
                granted,
                created = outcome.created_count,
                attempts = outcome.attempts,
                duplicates = outcome.duplicates,
                stop = %outcome.stop,
                "Allocation stopped short"
            );
        } else {
            info!(
                pool_id,
                created = outcome.created_count,
                attempts = outcome.attempts,
                duplicates = outcome.duplicates,
                batches = outcome.batches,
                "Allocation completed"
            );
        }

        Ok(outcome)
    }
}

/// Draw budget for one ticket.
///
/// Normally `granted × multiplier`. When the candidate space is small next
/// to that, it is raised to the coupon-collector bound
/// `space × (ln space + COUPON_SLACK)` so that a tiny space is reported by
/// its true size instead of by an unlucky run of repeats.
fn attempt_ceiling(granted: i64, multiplier: u32, space: i64) -> i64 {
    let base = granted.saturating_mul(i64::from(multiplier));
    if space > base.saturating_mul(SMALL_SPACE_FACTOR) {
        return base;
    }

    let n = space as f64;
    let collect_all = (n * (n.ln() + COUPON_SLACK)).ceil() as i64;
    base.max(collect_all)
}

/// Draws candidates until `want` distinct ones are collected or `max_draws`
/// is spent. Returns the set and the number of draws made.
fn draw_batch<R: Rng + ?Sized>(
    generator: &SerialGenerator,
    rng: &mut R,
    want: usize,
    max_draws: i64,
) -> (HashSet<String>, i64) {
    let mut batch = HashSet::with_capacity(want);
    let mut draws = 0;

    while batch.len() < want && draws < max_draws {
        batch.insert(generator.generate_with(rng));
        draws += 1;
    }

    (batch, draws)
}

// =============================================================================
// Unit Tests
// =============================================================================
