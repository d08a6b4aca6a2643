//! # xtrace-db: Storage and Allocation for XTrace
//!
//! SQLite storage for serial pools and serial numbers, and the allocation
//! pipeline built on it: per-pool reservation, the bulk generation engine
//! and reconciliation.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        XTrace Data Flow                                 │
//! │                                                                         │
//! │  xtrace-admin allocate --pool P1 --quantity 100000                     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     xtrace-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │  allocation   │    │  Repositories │    │  Database    │  │   │
//! │  │   │               │    │               │    │  (pool.rs)   │  │   │
//! │  │   │ Coordinator   │───►│ SerialPool    │───►│ SqlitePool   │  │   │
//! │  │   │ BulkAllocator │    │ SerialNumber  │    │ PoolLocks    │  │   │
//! │  │   │ Service       │    │               │    │ Migrations   │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  SQLite (WAL)   serial_pools ◄──FK── serial_numbers (UNIQUE)   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database and allocation error types
//! - [`locks`] - Per-pool async locks
//! - [`repository`] - Pool and serial repositories
//! - [`allocation`] - Reservation, bulk engine, allocation service
//!
//! ## Usage
//!
//! ```rust,ignore
//! use xtrace_db::{AllocationRequest, AllocatorConfig, Database, DbConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let db = Database::new(DbConfig::new("xtrace.db")).await?;
//! let service = db.allocation_service(AllocatorConfig::default());
//!
//! let report = service
//!     .allocate(&AllocationRequest::new("P1", 100, 12), &CancellationToken::new())
//!     .await?;
//! println!("{} of {} created", report.created_count, report.requested_count);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod allocation;
pub mod error;
pub mod locks;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{AllocationError, DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use allocation::engine::{AllocationOutcome, AllocatorConfig, BulkAllocator, StopReason};
pub use allocation::reservation::{ReservationCoordinator, ReservationTicket};
pub use allocation::{AllocationOutcomeKind, AllocationReport, AllocationRequest, AllocationService};

// Repository re-exports for convenience
pub use repository::serial::SerialNumberRepository;
pub use repository::serial_pool::SerialPoolRepository;
