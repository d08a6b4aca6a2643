//! Admin CLI configuration.
//!
//! Configuration is loaded from environment variables with fallback to
//! defaults. Command-line flags override whatever is loaded here.

use std::env;
use std::path::PathBuf;

use serde::Serialize;
use xtrace_core::epcis::EpcisConfig;
use xtrace_core::{DEFAULT_ATTEMPT_MULTIPLIER, DEFAULT_BATCH_SIZE};

/// Database file used when `XTRACE_DB_PATH` is unset.
pub const DEFAULT_DB_PATH: &str = "xtrace.db";

/// Admin CLI configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminConfig {
    /// SQLite database file
    pub db_path: PathBuf,

    /// Candidates per allocation batch
    pub batch_size: usize,

    /// Attempt ceiling as a multiple of the granted quantity
    pub attempt_multiplier: u32,

    /// Business location for EPCIS events
    pub facility_gln: Option<String>,

    /// GS1 company prefix for SGTIN URIs
    pub company_prefix: Option<String>,

    /// EPCIS read point (optional)
    pub read_point: Option<String>,
}

impl AdminConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through a variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = AdminConfig {
            db_path: lookup("XTRACE_DB_PATH")
                .unwrap_or_else(|| DEFAULT_DB_PATH.to_string())
                .into(),

            batch_size: parse_or(&lookup, "XTRACE_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,

            attempt_multiplier: parse_or(
                &lookup,
                "XTRACE_ATTEMPT_MULTIPLIER",
                DEFAULT_ATTEMPT_MULTIPLIER,
            )?,

            facility_gln: non_empty(lookup("XTRACE_FACILITY_GLN")),
            company_prefix: non_empty(lookup("XTRACE_COMPANY_PREFIX")),
            read_point: non_empty(lookup("XTRACE_READ_POINT")),
        };

        if config.batch_size == 0 {
            return Err(ConfigError::InvalidValue("XTRACE_BATCH_SIZE".to_string()));
        }
        if config.attempt_multiplier == 0 {
            return Err(ConfigError::InvalidValue(
                "XTRACE_ATTEMPT_MULTIPLIER".to_string(),
            ));
        }

        Ok(config)
    }

    /// Builds the EPCIS encoder configuration.
    ///
    /// Facility GLN and company prefix have no defaults and must be set
    /// through the environment or flags.
    pub fn epcis(&self) -> Result<EpcisConfig, ConfigError> {
        let gln = self
            .facility_gln
            .as_deref()
            .ok_or_else(|| ConfigError::MissingRequired("XTRACE_FACILITY_GLN".to_string()))?;
        let prefix = self
            .company_prefix
            .as_deref()
            .ok_or_else(|| ConfigError::MissingRequired("XTRACE_COMPANY_PREFIX".to_string()))?;

        let config = EpcisConfig::new(gln, prefix)
            .map_err(|e| ConfigError::Epcis(e.to_string()))?;

        Ok(match &self.read_point {
            Some(read_point) => config.with_read_point(read_point.clone()),
            None => config,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}")]
    InvalidValue(String),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid EPCIS configuration: {0}")]
    Epcis(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AdminConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AdminConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.db_path, PathBuf::from(DEFAULT_DB_PATH));
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.attempt_multiplier, DEFAULT_ATTEMPT_MULTIPLIER);
        assert!(config.facility_gln.is_none());
    }

    #[test]
    fn test_env_values() {
        let config = load(&[
            ("XTRACE_DB_PATH", "/var/lib/xtrace/serials.db"),
            ("XTRACE_BATCH_SIZE", "250"),
            ("XTRACE_ATTEMPT_MULTIPLIER", " 4 "),
            ("XTRACE_READ_POINT", ""),
        ])
        .unwrap();

        assert_eq!(config.db_path, PathBuf::from("/var/lib/xtrace/serials.db"));
        assert_eq!(config.batch_size, 250);
        assert_eq!(config.attempt_multiplier, 4);
        assert!(config.read_point.is_none());
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            load(&[("XTRACE_BATCH_SIZE", "lots")]),
            Err(ConfigError::InvalidValue(key)) if key == "XTRACE_BATCH_SIZE"
        ));
        assert!(matches!(
            load(&[("XTRACE_ATTEMPT_MULTIPLIER", "0")]),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_epcis_requires_gln_and_prefix() {
        let config = load(&[("XTRACE_COMPANY_PREFIX", "4006381")]).unwrap();
        assert!(matches!(
            config.epcis(),
            Err(ConfigError::MissingRequired(key)) if key == "XTRACE_FACILITY_GLN"
        ));

        let config = load(&[
            ("XTRACE_FACILITY_GLN", "urn:epc:id:sgln:4006381.00000.0"),
            ("XTRACE_COMPANY_PREFIX", "4006381"),
            ("XTRACE_READ_POINT", "urn:epc:id:sgln:4006381.00000.1"),
        ])
        .unwrap();
        let epcis = config.epcis().unwrap();
        assert_eq!(epcis.company_prefix, "4006381");
        assert_eq!(epcis.read_point.as_deref(), Some("urn:epc:id:sgln:4006381.00000.1"));

        let bad = AdminConfig {
            company_prefix: Some("40".to_string()),
            ..config
        };
        assert!(matches!(bad.epcis(), Err(ConfigError::Epcis(_))));
    }
}
