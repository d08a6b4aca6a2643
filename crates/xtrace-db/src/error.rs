//! # Database Error Types
//!
//! Error types for storage operations and for allocation requests.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)        CoreError (xtrace-core)             │
//! │       │                                 │                               │
//! │       ▼                                 ▼                               │
//! │  DbError (this module) ◄──── DbError::Domain                           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  AllocationError ← Adds pool id, requested and created counts          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  xtrace-admin maps it to an exit code                                  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;
use xtrace_core::CoreError;

/// Database operation errors.
///
/// These wrap sqlx errors and carry domain rejections raised while a
/// repository or the coordinator was reading state.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    ///
    /// ## When This Occurs
    /// - Creating a pool with an id that already exists
    /// - A plain INSERT of a serial that is taken (the engine uses
    ///   ON CONFLICT DO NOTHING and never sees this)
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// Foreign key constraint violation.
    ///
    /// ## When This Occurs
    /// - Inserting serials for a pool that doesn't exist
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// CHECK constraint violation (counter bounds, status values).
    #[error("Constraint violation: {message}")]
    CheckViolation { message: String },

    /// Database connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// A compare-and-swap kept losing to other writers.
    #[error("{entity} {id} is contended: gave up after {attempts} attempts")]
    Contended {
        entity: String,
        id: String,
        attempts: u32,
    },

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    ConnectionPoolExhausted,

    /// Domain rule violation detected while touching storage.
    #[error(transparent)]
    Domain(#[from] CoreError),

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a UniqueViolation error.
    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        DbError::UniqueViolation {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → DbError::NotFound
/// sqlx::Error::Database       → Analyze message for constraint type
/// sqlx::Error::PoolTimedOut   → DbError::ConnectionPoolExhausted
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();

                // UNIQUE constraint: "UNIQUE constraint failed: <table>.<column>"
                if msg.contains("UNIQUE constraint failed") {
                    let field = msg
                        .split("UNIQUE constraint failed: ")
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    DbError::UniqueViolation {
                        field,
                        value: "unknown".to_string(),
                    }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation {
                        message: msg.to_string(),
                    }
                } else if msg.contains("CHECK constraint failed") {
                    DbError::CheckViolation {
                        message: msg.to_string(),
                    }
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => DbError::ConnectionPoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

// =============================================================================
// Allocation Error
// =============================================================================

/// Failure of a whole allocation request.
///
/// Partial success is not an error: it comes back as a report with
/// `created_count < requested_count`.
#[derive(Debug, Error)]
pub enum AllocationError {
    /// The request was refused before anything was generated
    /// (pool missing, void, exhausted, or invalid input).
    #[error(transparent)]
    Rejected(CoreError),

    /// Storage failed mid-allocation. Batches committed before the failure
    /// stay in storage and are counted in `created`.
    #[error("Store failure on pool {pool_id} after {created} of {requested} serials: {source}")]
    StoreFailure {
        pool_id: String,
        requested: i64,
        created: i64,
        #[source]
        source: DbError,
    },
}

impl AllocationError {
    /// Wraps a storage error with request context.
    pub fn store_failure(pool_id: impl Into<String>, requested: i64, created: i64, source: DbError) -> Self {
        match source {
            DbError::Domain(err) => AllocationError::Rejected(err),
            source => AllocationError::StoreFailure {
                pool_id: pool_id.into(),
                requested,
                created,
                source,
            },
        }
    }

    /// Returns true if the request was refused rather than failed.
    pub fn is_rejection(&self) -> bool {
        matches!(self, AllocationError::Rejected(_))
    }
}

impl From<CoreError> for AllocationError {
    fn from(err: CoreError) -> Self {
        AllocationError::Rejected(err)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use xtrace_core::ValidationError;

    #[test]
    fn test_domain_errors_become_rejections() {
        let err = AllocationError::store_failure(
            "P1",
            10,
            0,
            DbError::Domain(CoreError::PoolVoided("P1".to_string())),
        );
        assert!(err.is_rejection());
        assert_eq!(err.to_string(), "Pool P1 is void");
    }

    #[test]
    fn test_store_failure_keeps_counts() {
        let err = AllocationError::store_failure("P1", 100, 40, DbError::QueryFailed("disk I/O error".to_string()));
        assert!(!err.is_rejection());
        assert_eq!(
            err.to_string(),
            "Store failure on pool P1 after 40 of 100 serials: Query failed: disk I/O error"
        );
    }

    #[test]
    fn test_validation_is_rejection() {
        let err: AllocationError = CoreError::from(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        })
        .into();
        assert!(err.is_rejection());
    }
}
