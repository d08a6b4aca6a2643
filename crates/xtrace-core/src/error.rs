//! # Error Types
//!
//! Domain-specific error types for xtrace-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  xtrace-core errors (this file)                                        │
//! │  ├── CoreError        - Pool / serial rule violations                  │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  xtrace-db errors (separate crate)                                     │
//! │  ├── DbError          - Database operation failures                    │
//! │  └── AllocationError  - Allocation failures with request context       │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → AllocationError → CLI   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::types::SerialStatus;

// =============================================================================
// Core Error
// =============================================================================

/// Domain rule violations.
///
/// None of these are retried: they describe the request, not a transient
/// condition of the store.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The referenced pool doesn't exist.
    #[error("Pool not found: {0}")]
    PoolNotFound(String),

    /// The pool was voided; no further allocation is allowed.
    #[error("Pool {0} is void")]
    PoolVoided(String),

    /// The pool has no capacity left to reserve.
    ///
    /// ## When This Occurs
    /// - Status is EXHAUSTED (all serials generated)
    /// - Outstanding tickets already cover `total_to_generate`
    #[error("Pool {pool_id} is exhausted: {reserved} of {total} reserved")]
    PoolExhausted {
        pool_id: String,
        total: i64,
        reserved: i64,
    },

    /// Serial number cannot be found.
    #[error("Serial number not found: {0}")]
    SerialNotFound(String),

    /// A serial status change that would move backwards or out of a
    /// terminal state.
    ///
    /// ## Allowed Paths
    /// ```text
    /// ALLOCATED ──► PRINTED ──► CONSUMED
    ///     │            │
    ///     └────────────┴──────► VOID
    /// ```
    #[error("Serial {serial} cannot move from {from} to {to}")]
    InvalidSerialTransition {
        serial: String,
        from: SerialStatus,
        to: SerialStatus,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Returns true for errors that reject an allocation request outright
    /// (as opposed to storage failures, which live in xtrace-db).
    pub fn is_pool_rejection(&self) -> bool {
        matches!(
            self,
            CoreError::PoolNotFound(_) | CoreError::PoolVoided(_) | CoreError::PoolExhausted { .. }
        )
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., bad GTIN check digit, non-ASCII alphabet).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
