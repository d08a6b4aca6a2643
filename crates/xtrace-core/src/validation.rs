//! # Validation Module
//!
//! Input validation for pool creation, allocation requests and printing.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: CLI (clap)                                                   │
//! │  └── Type parsing (numbers, dates)                                     │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  ├── Quantities, serial lengths, lot widths                            │
//! │  └── GTIN check digits, company prefixes                               │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── UNIQUE (full_serial_number)                                       │
//! │  ├── CHECK constraints on counters and status                          │
//! │  └── Foreign key serial_numbers.pool_id → serial_pools                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::types::NewSerialPool;
use crate::{MAX_BATCH_LOT_LENGTH, MAX_SERIAL_LENGTH};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Width of the `pool_id` column.
const MAX_POOL_ID_LENGTH: usize = 50;

// =============================================================================
// Identifier Validators
// =============================================================================

/// Validates a caller-chosen pool identifier.
///
/// ## Rules
/// - Must not be empty
/// - At most 50 characters
/// - Letters, digits, hyphens and underscores only
pub fn validate_pool_id(pool_id: &str) -> ValidationResult<()> {
    let pool_id = pool_id.trim();

    if pool_id.is_empty() {
        return Err(ValidationError::Required {
            field: "pool_id".to_string(),
        });
    }

    if pool_id.len() > MAX_POOL_ID_LENGTH {
        return Err(ValidationError::TooLong {
            field: "pool_id".to_string(),
            max: MAX_POOL_ID_LENGTH,
        });
    }

    if !pool_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "pool_id".to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(())
}

/// Validates a GTIN-8/12/13/14 including its GS1 mod-10 check digit.
///
/// ## Example
/// ```rust
/// use xtrace_core::validation::validate_gtin;
///
/// assert!(validate_gtin("4006381333931").is_ok());
/// assert!(validate_gtin("4006381333932").is_err());
/// ```
pub fn validate_gtin(gtin: &str) -> ValidationResult<()> {
    let gtin = gtin.trim();

    if gtin.is_empty() {
        return Err(ValidationError::Required {
            field: "gtin".to_string(),
        });
    }

    if !gtin.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::InvalidFormat {
            field: "gtin".to_string(),
            reason: "must contain only digits".to_string(),
        });
    }

    if !matches!(gtin.len(), 8 | 12 | 13 | 14) {
        return Err(ValidationError::InvalidFormat {
            field: "gtin".to_string(),
            reason: format!("must be 8, 12, 13 or 14 digits, got {}", gtin.len()),
        });
    }

    let digits: Vec<u32> = gtin.bytes().map(|b| u32::from(b - b'0')).collect();
    let (body, check) = digits.split_at(digits.len() - 1);

    if gs1_check_digit(body) != check[0] {
        return Err(ValidationError::InvalidFormat {
            field: "gtin".to_string(),
            reason: "check digit mismatch".to_string(),
        });
    }

    Ok(())
}

/// Left-pads a validated GTIN to 14 digits.
pub fn normalize_gtin(gtin: &str) -> String {
    format!("{:0>14}", gtin.trim())
}

/// GS1 mod-10: weights 3,1,3,1... starting from the rightmost body digit.
fn gs1_check_digit(body: &[u32]) -> u32 {
    let sum: u32 = body
        .iter()
        .rev()
        .enumerate()
        .map(|(i, d)| if i % 2 == 0 { d * 3 } else { *d })
        .sum();
    (10 - sum % 10) % 10
}

/// Validates a GS1 company prefix (6 to 12 digits).
pub fn validate_company_prefix(prefix: &str) -> ValidationResult<()> {
    if prefix.is_empty() {
        return Err(ValidationError::Required {
            field: "company_prefix".to_string(),
        });
    }

    if !prefix.chars().all(|c| c.is_ascii_digit()) || !(6..=12).contains(&prefix.len()) {
        return Err(ValidationError::InvalidFormat {
            field: "company_prefix".to_string(),
            reason: "must be 6 to 12 digits".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates an allocation quantity (> 0).
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    Ok(())
}

/// Validates a serial length against the column width.
pub fn validate_serial_length(length: usize) -> ValidationResult<()> {
    if length == 0 || length > MAX_SERIAL_LENGTH {
        return Err(ValidationError::OutOfRange {
            field: "identifier_length".to_string(),
            min: 1,
            max: MAX_SERIAL_LENGTH as i64,
        });
    }

    Ok(())
}

/// Validates a pool creation request.
///
/// ## Rules
/// - `pool_id`, when given, passes [`validate_pool_id`]
/// - `product_gtin` passes [`validate_gtin`]
/// - `total_to_generate` ≥ 0
pub fn validate_new_pool(new: &NewSerialPool) -> ValidationResult<()> {
    if let Some(pool_id) = &new.pool_id {
        validate_pool_id(pool_id)?;
    }

    validate_gtin(&new.product_gtin)?;

    if new.total_to_generate < 0 {
        return Err(ValidationError::OutOfRange {
            field: "total_to_generate".to_string(),
            min: 0,
            max: i64::MAX,
        });
    }

    Ok(())
}

// =============================================================================
// Printing Validators
// =============================================================================

/// Validates a batch/lot number bound at printing time.
pub fn validate_batch_lot(lot: &str) -> ValidationResult<()> {
    let lot = lot.trim();

    if lot.is_empty() {
        return Err(ValidationError::Required {
            field: "batch_lot".to_string(),
        });
    }

    if lot.len() > MAX_BATCH_LOT_LENGTH {
        return Err(ValidationError::TooLong {
            field: "batch_lot".to_string(),
            max: MAX_BATCH_LOT_LENGTH,
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_pool_id() {
        assert!(validate_pool_id("P1").is_ok());
        assert!(validate_pool_id("run_2024-07").is_ok());

        assert!(validate_pool_id("").is_err());
        assert!(validate_pool_id("has space").is_err());
        assert!(validate_pool_id(&"A".repeat(51)).is_err());
    }

    #[test]
    fn test_validate_gtin() {
        assert!(validate_gtin("4006381333931").is_ok());
        assert!(validate_gtin("04006381333931").is_ok());

        assert!(validate_gtin("4006381333932").is_err());
        assert!(validate_gtin("40063813339").is_err());
        assert!(validate_gtin("40063813339A1").is_err());
        assert!(validate_gtin("").is_err());
    }

    #[test]
    fn test_normalize_gtin() {
        assert_eq!(normalize_gtin("4006381333931"), "04006381333931");
        assert_eq!(normalize_gtin("04006381333931"), "04006381333931");
    }

    #[test]
    fn test_validate_company_prefix() {
        assert!(validate_company_prefix("4006381").is_ok());
        assert!(validate_company_prefix("12345").is_err());
        assert!(validate_company_prefix("12345a7").is_err());
    }

    #[test]
    fn test_validate_quantity_and_length() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-5).is_err());

        assert!(validate_serial_length(1).is_ok());
        assert!(validate_serial_length(20).is_ok());
        assert!(validate_serial_length(0).is_err());
        assert!(validate_serial_length(21).is_err());
    }

    #[test]
    fn test_validate_new_pool() {
        let mut new = NewSerialPool {
            pool_id: Some("P1".to_string()),
            product_gtin: "4006381333931".to_string(),
            total_to_generate: 100,
        };
        assert!(validate_new_pool(&new).is_ok());

        new.total_to_generate = -1;
        assert!(validate_new_pool(&new).is_err());

        new.total_to_generate = 0;
        new.pool_id = Some(String::new());
        assert!(validate_new_pool(&new).is_err());
    }

    #[test]
    fn test_validate_batch_lot() {
        assert!(validate_batch_lot("LOT-2024-001").is_ok());
        assert!(validate_batch_lot("  ").is_err());
        assert!(validate_batch_lot(&"L".repeat(21)).is_err());
    }
}
