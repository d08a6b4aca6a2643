//! # Serial Generator
//!
//! Produces candidate serials: `length` symbols drawn uniformly from a fixed
//! alphabet with the thread-local CSPRNG.
//!
//! ## Collisions Are Expected
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  candidate space = |alphabet| ^ length                                  │
//! │                                                                         │
//! │  62 ^ 12 ≈ 3.2e21   → duplicates vanishingly rare at 10^6 serials      │
//! │  62 ^ 4  ≈ 1.5e7    → birthday bound hit after ~4,000 serials          │
//! │   2 ^ 2  = 4        → at most 4 distinct serials, ever                  │
//! │                                                                         │
//! │  Callers must treat every candidate as possibly taken.                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `rand::rng()` is ChaCha-based and reseeded from the OS, so candidates are
//! not predictable from earlier output.

use rand::Rng;

use crate::error::ValidationError;
use crate::validation::{validate_serial_length, ValidationResult};

/// Upper/lower-case ASCII letters and digits.
const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

// =============================================================================
// Alphabet
// =============================================================================

/// The set of symbols a serial is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alphabet {
    symbols: Vec<u8>,
}

impl Alphabet {
    /// The 62-symbol alphanumeric alphabet.
    pub fn alphanumeric() -> Self {
        Alphabet {
            symbols: ALPHANUMERIC.to_vec(),
        }
    }

    /// Builds a custom alphabet.
    ///
    /// ## Rules
    /// - At least one symbol
    /// - ASCII letters and digits only (serials go into GS1 EPC URIs)
    /// - No repeated symbols (repeats would skew the distribution)
    pub fn new(symbols: &str) -> ValidationResult<Self> {
        if symbols.is_empty() {
            return Err(ValidationError::Required {
                field: "alphabet".to_string(),
            });
        }

        if !symbols.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(ValidationError::InvalidFormat {
                field: "alphabet".to_string(),
                reason: "must contain only ASCII letters and digits".to_string(),
            });
        }

        let mut seen = [false; 128];
        for b in symbols.bytes() {
            if std::mem::replace(&mut seen[b as usize], true) {
                return Err(ValidationError::InvalidFormat {
                    field: "alphabet".to_string(),
                    reason: format!("symbol '{}' repeated", b as char),
                });
            }
        }

        Ok(Alphabet {
            symbols: symbols.as_bytes().to_vec(),
        })
    }

    /// Number of symbols.
    #[inline]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

impl Default for Alphabet {
    fn default() -> Self {
        Alphabet::alphanumeric()
    }
}

// =============================================================================
// Generator
// =============================================================================

/// Stateless candidate generator for one alphabet and length.
///
/// ## Usage
/// ```rust
/// use xtrace_core::generator::{Alphabet, SerialGenerator};
///
/// let generator = SerialGenerator::new(Alphabet::new("AB").unwrap(), 2).unwrap();
/// assert_eq!(generator.candidate_space(), 4);
///
/// let serial = generator.generate();
/// assert!(serial.chars().all(|c| c == 'A' || c == 'B'));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialGenerator {
    alphabet: Alphabet,
    length: usize,
}

impl SerialGenerator {
    /// Creates a generator; `length` must fit the serial column (1..=20).
    pub fn new(alphabet: Alphabet, length: usize) -> ValidationResult<Self> {
        validate_serial_length(length)?;
        Ok(SerialGenerator { alphabet, length })
    }

    /// Generator over the default 62-symbol alphabet.
    pub fn alphanumeric(length: usize) -> ValidationResult<Self> {
        SerialGenerator::new(Alphabet::alphanumeric(), length)
    }

    #[inline]
    pub fn length(&self) -> usize {
        self.length
    }

    #[inline]
    pub fn alphabet(&self) -> &Alphabet {
        &self.alphabet
    }

    /// Generates one candidate from the thread-local CSPRNG.
    pub fn generate(&self) -> String {
        self.generate_with(&mut rand::rng())
    }

    /// Generates one candidate from the given random source.
    pub fn generate_with<R: Rng + ?Sized>(&self, rng: &mut R) -> String {
        let symbols = &self.alphabet.symbols;
        (0..self.length)
            .map(|_| symbols[rng.random_range(0..symbols.len())] as char)
            .collect()
    }

    /// Number of distinct serials this generator can produce
    /// (`|alphabet| ^ length`, saturating).
    pub fn candidate_space(&self) -> u128 {
        (self.alphabet.len() as u128).saturating_pow(self.length as u32)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn test_alphanumeric_alphabet() {
        let alphabet = Alphabet::alphanumeric();
        assert_eq!(alphabet.len(), 62);
        assert_eq!(Alphabet::default(), alphabet);
    }

    #[test]
    fn test_custom_alphabet_rules() {
        assert!(Alphabet::new("AB").is_ok());
        assert!(Alphabet::new("").is_err());
        assert!(Alphabet::new("A-B").is_err());
        assert!(Alphabet::new("ABA").is_err());
        assert!(Alphabet::new("Aé").is_err());
    }

    #[test]
    fn test_length_bounds() {
        assert!(SerialGenerator::alphanumeric(0).is_err());
        assert!(SerialGenerator::alphanumeric(21).is_err());
        assert!(SerialGenerator::alphanumeric(20).is_ok());
    }

    #[test]
    fn test_generate_shape() {
        let generator = SerialGenerator::alphanumeric(12).unwrap();
        for _ in 0..100 {
            let serial = generator.generate();
            assert_eq!(serial.len(), 12);
            assert!(serial.bytes().all(|b| b.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn test_seeded_generation_is_deterministic() {
        let generator = SerialGenerator::alphanumeric(10).unwrap();
        let a = generator.generate_with(&mut StdRng::seed_from_u64(42));
        let b = generator.generate_with(&mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
    }

    #[test]
    fn test_small_space_is_fully_covered() {
        let generator = SerialGenerator::new(Alphabet::new("AB").unwrap(), 2).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let seen: HashSet<String> = (0..500).map(|_| generator.generate_with(&mut rng)).collect();

        assert_eq!(seen.len() as u128, generator.candidate_space());
    }

    #[test]
    fn test_candidate_space_saturates() {
        let generator = SerialGenerator::alphanumeric(20).unwrap();
        assert_eq!(generator.candidate_space(), 62u128.pow(20));

        let generator = SerialGenerator::alphanumeric(12).unwrap();
        assert_eq!(generator.candidate_space(), 62u128.pow(12));
    }
}
