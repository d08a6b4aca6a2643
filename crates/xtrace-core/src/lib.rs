//! # xtrace-core: Pure Domain Logic for XTrace
//!
//! This crate holds the serial-number domain: pools, serials, their status
//! lifecycles, input validation, the candidate generator and the EPCIS
//! commissioning encoder. It has zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        XTrace Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    xtrace-admin (CLI)                           │   │
//! │  │    create-pool, allocate, print, export-epcis, ...              │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    xtrace-db                                    │   │
//! │  │    reservation ──► bulk engine ──► reconciliation               │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ xtrace-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │ generator │  │   epcis   │  │ validation│  │   │
//! │  │   │ SerialPool│  │ Alphabet  │  │ XML/JSON  │  │   GTIN    │  │   │
//! │  │   │ Serial... │  │ CSPRNG    │  │ SGTIN URI │  │  lengths  │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK                             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (SerialPool, SerialNumber, statuses)
//! - [`generator`] - Random serial candidates over a fixed alphabet
//! - [`epcis`] - EPCIS 2.0 commissioning documents
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use xtrace_core::generator::SerialGenerator;
//! use xtrace_core::SerialStatus;
//!
//! let generator = SerialGenerator::alphanumeric(12).unwrap();
//! let serial = generator.generate();
//! assert_eq!(serial.len(), 12);
//!
//! // Serials only ever move forward.
//! assert!(SerialStatus::Allocated.can_transition_to(SerialStatus::Printed));
//! assert!(!SerialStatus::Printed.can_transition_to(SerialStatus::Allocated));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod epcis;
pub mod error;
pub mod generator;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use generator::{Alphabet, SerialGenerator};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Width of the `full_serial_number` column.
///
/// GS1 allows up to 20 alphanumeric characters for a serial component.
pub const MAX_SERIAL_LENGTH: usize = 20;

/// Default serial length used when the caller doesn't specify one.
///
/// 62^12 ≈ 3.2 × 10^21 candidates, far above the birthday bound for pools of
/// millions.
pub const DEFAULT_SERIAL_LENGTH: usize = 12;

/// Width of the `batch_lot` column.
pub const MAX_BATCH_LOT_LENGTH: usize = 20;

/// Default number of candidates generated and inserted together.
pub const DEFAULT_BATCH_SIZE: usize = 5_000;

/// Default attempt ceiling multiplier (ceiling = granted × multiplier).
pub const DEFAULT_ATTEMPT_MULTIPLIER: u32 = 2;
