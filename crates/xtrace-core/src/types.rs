//! # Domain Types
//!
//! Core domain types used throughout XTrace.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌──────────────────────┐          ┌──────────────────────┐            │
//! │  │     SerialPool       │ 1      * │    SerialNumber      │            │
//! │  │  ──────────────────  │◄─────────│  ──────────────────  │            │
//! │  │  pool_id (opaque)    │          │  full_serial_number  │ UNIQUE     │
//! │  │  product_gtin        │          │  pool_id (FK)        │            │
//! │  │  total_to_generate   │          │  status              │            │
//! │  │  reserved_count      │          │  batch_lot           │            │
//! │  │  generated_count     │          │  expiration_date     │            │
//! │  │  status              │          └──────────────────────┘            │
//! │  └──────────────────────┘                                               │
//! │                                                                         │
//! │  ┌──────────────────────┐          ┌──────────────────────┐            │
//! │  │     PoolStatus       │          │    SerialStatus      │            │
//! │  │  NEW → ACTIVE →      │          │  ALLOCATED → PRINTED │            │
//! │  │  EXHAUSTED | VOID    │          │  → CONSUMED | VOID   │            │
//! │  └──────────────────────┘          └──────────────────────┘            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Two Counters
//! `reserved_count` bounds what may still be handed out (tickets in flight
//! plus serials already stored). `generated_count` is what actually landed in
//! storage. Pool status is derived from `generated_count` only.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

// =============================================================================
// Pool Status
// =============================================================================

/// Lifecycle of a serial pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "UPPERCASE"))]
#[serde(rename_all = "UPPERCASE")]
pub enum PoolStatus {
    /// Created, nothing reserved yet.
    #[default]
    New,
    /// At least one reservation has been made.
    Active,
    /// Every serial the pool was created for is in storage.
    Exhausted,
    /// Administratively cancelled. Terminal.
    Void,
}

impl PoolStatus {
    /// Returns the status string as stored in the database.
    pub const fn as_str(&self) -> &'static str {
        match self {
            PoolStatus::New => "NEW",
            PoolStatus::Active => "ACTIVE",
            PoolStatus::Exhausted => "EXHAUSTED",
            PoolStatus::Void => "VOID",
        }
    }

    /// Derives the status after reconciliation from the confirmed count.
    ///
    /// VOID is sticky. A pool that has reached its total becomes EXHAUSTED;
    /// a pool that had been exhausted but lost rows (never happens through
    /// the engine, only by manual repair) goes back to ACTIVE.
    pub fn reconciled(self, generated_count: i64, total_to_generate: i64) -> PoolStatus {
        match self {
            PoolStatus::Void => PoolStatus::Void,
            _ if generated_count >= total_to_generate && total_to_generate > 0 => {
                PoolStatus::Exhausted
            }
            PoolStatus::Exhausted => PoolStatus::Active,
            other => other,
        }
    }
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PoolStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NEW" => Ok(PoolStatus::New),
            "ACTIVE" => Ok(PoolStatus::Active),
            "EXHAUSTED" => Ok(PoolStatus::Exhausted),
            "VOID" => Ok(PoolStatus::Void),
            _ => Err(ValidationError::InvalidFormat {
                field: "pool status".to_string(),
                reason: format!("unknown status '{s}'"),
            }),
        }
    }
}

// =============================================================================
// Serial Status
// =============================================================================

/// Lifecycle of an individual serial number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "UPPERCASE"))]
#[serde(rename_all = "UPPERCASE")]
pub enum SerialStatus {
    /// Created by the allocation engine, unused.
    #[default]
    Allocated,
    /// Claimed by a production line; lot and expiry are bound.
    Printed,
    /// Shipped / reported.
    Consumed,
    /// Permanently retired.
    Void,
}

impl SerialStatus {
    /// Returns the status string as stored in the database.
    pub const fn as_str(&self) -> &'static str {
        match self {
            SerialStatus::Allocated => "ALLOCATED",
            SerialStatus::Printed => "PRINTED",
            SerialStatus::Consumed => "CONSUMED",
            SerialStatus::Void => "VOID",
        }
    }

    /// Checks whether a serial in this status may move to `to`.
    ///
    /// ```text
    /// ALLOCATED ──► PRINTED ──► CONSUMED
    ///     │            │            │
    ///     └────────────┴────────────┴──► VOID
    /// ```
    ///
    /// Staying in place is not a transition.
    pub fn can_transition_to(&self, to: SerialStatus) -> bool {
        use SerialStatus::*;
        matches!(
            (self, to),
            (Allocated, Printed)
                | (Printed, Consumed)
                | (Allocated, Void)
                | (Printed, Void)
                | (Consumed, Void)
        )
    }
}

impl fmt::Display for SerialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SerialStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ALLOCATED" => Ok(SerialStatus::Allocated),
            "PRINTED" => Ok(SerialStatus::Printed),
            "CONSUMED" => Ok(SerialStatus::Consumed),
            "VOID" => Ok(SerialStatus::Void),
            _ => Err(ValidationError::InvalidFormat {
                field: "serial status".to_string(),
                reason: format!("unknown status '{s}'"),
            }),
        }
    }
}

// =============================================================================
// Serial Pool
// =============================================================================

/// A named allocation unit of serial numbers for one product run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct SerialPool {
    /// Opaque pool identifier (UUID v4 unless the caller chose one).
    pub pool_id: String,

    /// GTIN the pool's serials are issued for (8 to 14 digits).
    pub product_gtin: String,

    /// Requested quantity. Immutable after creation.
    pub total_to_generate: i64,

    /// Capacity held by reservation tickets plus capacity already consumed.
    pub reserved_count: i64,

    /// Serials confirmed in storage.
    pub generated_count: i64,

    pub status: PoolStatus,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl SerialPool {
    /// Builds a fresh NEW pool from a validated request.
    pub fn from_new(new: &NewSerialPool, now: DateTime<Utc>) -> Self {
        SerialPool {
            pool_id: new
                .pool_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            product_gtin: new.product_gtin.clone(),
            total_to_generate: new.total_to_generate,
            reserved_count: 0,
            generated_count: 0,
            status: PoolStatus::New,
            created_at: now,
            updated_at: now,
        }
    }

    /// Capacity not yet covered by any ticket.
    #[inline]
    pub fn unreserved(&self) -> i64 {
        (self.total_to_generate - self.reserved_count).max(0)
    }

    /// Serials still missing from storage.
    #[inline]
    pub fn remaining(&self) -> i64 {
        (self.total_to_generate - self.generated_count).max(0)
    }

    /// Returns true if a reservation could currently be granted.
    pub fn is_allocatable(&self) -> bool {
        matches!(self.status, PoolStatus::New | PoolStatus::Active) && self.unreserved() > 0
    }
}

/// Request to create a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSerialPool {
    /// Caller-chosen identifier; a UUID is generated when absent.
    pub pool_id: Option<String>,
    pub product_gtin: String,
    pub total_to_generate: i64,
}

// =============================================================================
// Serial Number
// =============================================================================

/// One globally unique issued serial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct SerialNumber {
    /// Storage row id.
    pub id: i64,

    /// The serial itself; unique across every pool.
    pub full_serial_number: String,

    pub pool_id: String,

    pub status: SerialStatus,

    /// Assigned when the serial is printed.
    pub batch_lot: Option<String>,

    /// Assigned when the serial is printed.
    pub expiration_date: Option<NaiveDate>,

    pub last_modified: DateTime<Utc>,
}

/// Lot metadata bound to serials at the PRINTED transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotAssignment {
    pub batch_lot: String,
    pub expiration_date: NaiveDate,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(total: i64, reserved: i64, generated: i64, status: PoolStatus) -> SerialPool {
        let now = Utc::now();
        SerialPool {
            pool_id: "P1".to_string(),
            product_gtin: "04006381333931".to_string(),
            total_to_generate: total,
            reserved_count: reserved,
            generated_count: generated,
            status,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_serial_transitions_forward_only() {
        use SerialStatus::*;
        assert!(Allocated.can_transition_to(Printed));
        assert!(Printed.can_transition_to(Consumed));
        assert!(Allocated.can_transition_to(Void));
        assert!(Printed.can_transition_to(Void));
        assert!(Consumed.can_transition_to(Void));

        assert!(!Printed.can_transition_to(Allocated));
        assert!(!Consumed.can_transition_to(Printed));
        assert!(!Allocated.can_transition_to(Consumed));
        assert!(!Void.can_transition_to(Allocated));
        assert!(!Allocated.can_transition_to(Allocated));
        assert!(!Void.can_transition_to(Void));
    }

    #[test]
    fn test_status_round_trip_strings() {
        assert_eq!("exhausted".parse::<PoolStatus>().unwrap(), PoolStatus::Exhausted);
        assert_eq!("PRINTED".parse::<SerialStatus>().unwrap(), SerialStatus::Printed);
        assert!("recycled".parse::<SerialStatus>().is_err());
        assert_eq!(SerialStatus::Consumed.to_string(), "CONSUMED");
    }

    #[test]
    fn test_reconciled_status() {
        assert_eq!(PoolStatus::Active.reconciled(100, 100), PoolStatus::Exhausted);
        assert_eq!(PoolStatus::Active.reconciled(99, 100), PoolStatus::Active);
        assert_eq!(PoolStatus::Void.reconciled(100, 100), PoolStatus::Void);
        assert_eq!(PoolStatus::Exhausted.reconciled(40, 100), PoolStatus::Active);
        // An empty pool can never be exhausted by generation
        assert_eq!(PoolStatus::New.reconciled(0, 0), PoolStatus::New);
    }

    #[test]
    fn test_pool_capacity() {
        let p = pool(100, 60, 40, PoolStatus::Active);
        assert_eq!(p.unreserved(), 40);
        assert_eq!(p.remaining(), 60);
        assert!(p.is_allocatable());

        assert!(!pool(100, 100, 40, PoolStatus::Active).is_allocatable());
        assert!(!pool(100, 10, 10, PoolStatus::Void).is_allocatable());
    }

    #[test]
    fn test_from_new_generates_id() {
        let new = NewSerialPool {
            pool_id: None,
            product_gtin: "04006381333931".to_string(),
            total_to_generate: 10,
        };
        let p = SerialPool::from_new(&new, Utc::now());
        assert!(Uuid::parse_str(&p.pool_id).is_ok());
        assert_eq!(p.status, PoolStatus::New);
        assert_eq!(p.reserved_count, 0);
    }
}
