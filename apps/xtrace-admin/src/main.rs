//! xtrace-admin - Operator command line for XTrace serial pools.
//!
//! ## Exit Codes
//! ```text
//! ┌──────┬──────────────────────────────────────────────────────────────┐
//! │ 0    │ full success                                                 │
//! │ 2    │ partial allocation, counts printed                           │
//! │ 3    │ rejected: unknown / void / exhausted pool, invalid input     │
//! │ 1    │ fatal store error                                            │
//! └──────┴──────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use xtrace_core::epcis::{DocumentFormat, EpcisError};
use xtrace_core::{CoreError, PoolStatus, SerialStatus, ValidationError, DEFAULT_SERIAL_LENGTH};
use xtrace_db::{AllocationError, Database, DbConfig, DbError};

mod commands;
mod config;

use commands::{Completion, Output};
use config::{AdminConfig, ConfigError};

const EXIT_FATAL: u8 = 1;
const EXIT_PARTIAL: u8 = 2;
const EXIT_REJECTED: u8 = 3;

/// XTrace - serial number pools, allocation and EPCIS export
#[derive(Parser)]
#[command(name = "xtrace-admin")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// SQLite database file (can also be set via XTRACE_DB_PATH)
    #[arg(long, env = "XTRACE_DB_PATH", global = true)]
    db_path: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a serial pool for a product
    CreatePool {
        /// Product GTIN (8, 12, 13 or 14 digits)
        #[arg(long)]
        gtin: String,

        /// Number of serials the pool will hold
        #[arg(long)]
        total: i64,

        /// Pool identifier (a UUID is generated when omitted)
        #[arg(long)]
        pool_id: Option<String>,
    },

    /// Generate new serials into a pool
    Allocate {
        #[arg(long)]
        pool: String,

        /// Serials to create
        #[arg(long)]
        quantity: i64,

        /// Serial length in characters
        #[arg(long, default_value_t = DEFAULT_SERIAL_LENGTH)]
        length: usize,

        /// Custom alphabet (default A-Z a-z 0-9)
        #[arg(long)]
        alphabet: Option<String>,

        /// Candidates per batch (overrides XTRACE_BATCH_SIZE)
        #[arg(long)]
        batch_size: Option<usize>,

        /// Attempt ceiling multiple (overrides XTRACE_ATTEMPT_MULTIPLIER)
        #[arg(long)]
        attempt_multiplier: Option<u32>,
    },

    /// Show one pool with its serial counts
    ShowPool {
        #[arg(long)]
        pool: String,
    },

    /// List pools
    ListPools {
        /// Only pools in this status (NEW, ACTIVE, EXHAUSTED, VOID)
        #[arg(long)]
        status: Option<PoolStatus>,
    },

    /// Cancel a pool; no further allocation is possible
    VoidPool {
        #[arg(long)]
        pool: String,
    },

    /// Re-derive a pool's counters from stored serials after a crash
    Recover {
        #[arg(long)]
        pool: String,
    },

    /// Claim allocated serials for printing and bind lot data
    Print {
        #[arg(long)]
        pool: String,

        #[arg(long)]
        count: i64,

        /// Batch / lot number
        #[arg(long)]
        lot: String,

        /// Expiration date (YYYY-MM-DD)
        #[arg(long)]
        expiry: NaiveDate,
    },

    /// Move a serial to CONSUMED or VOID
    Transition {
        #[arg(long)]
        serial: String,

        #[arg(long, value_enum)]
        to: TargetStatus,
    },

    /// Export printed serials as an EPCIS commissioning event
    ExportEpcis {
        #[arg(long)]
        pool: String,

        #[arg(long, value_enum, default_value_t = ExportFormat::Xml)]
        format: ExportFormat,

        /// Only serials of this lot
        #[arg(long)]
        lot: Option<String>,

        /// Maximum serials in the event
        #[arg(long, default_value_t = 1000)]
        limit: i64,

        /// Write to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Overrides XTRACE_FACILITY_GLN
        #[arg(long)]
        facility_gln: Option<String>,

        /// Overrides XTRACE_COMPANY_PREFIX
        #[arg(long)]
        company_prefix: Option<String>,

        /// Overrides XTRACE_READ_POINT
        #[arg(long)]
        read_point: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TargetStatus {
    Consumed,
    Void,
}

impl From<TargetStatus> for SerialStatus {
    fn from(status: TargetStatus) -> Self {
        match status {
            TargetStatus::Consumed => SerialStatus::Consumed,
            TargetStatus::Void => SerialStatus::Void,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ExportFormat {
    Xml,
    Json,
}

impl From<ExportFormat> for DocumentFormat {
    fn from(format: ExportFormat) -> Self {
        match format {
            ExportFormat::Xml => DocumentFormat::Xml,
            ExportFormat::Json => DocumentFormat::Json,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            // --help and --version come through here too
            return if err.use_stderr() {
                ExitCode::from(EXIT_REJECTED)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(Completion::Done) => ExitCode::SUCCESS,
        Ok(Completion::Partial) => ExitCode::from(EXIT_PARTIAL),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}

/// Initialize logging on stderr so stdout stays clean for results.
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug,sqlx=info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,xtrace=debug,sqlx=warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

async fn run(cli: Cli) -> Result<Completion> {
    let mut config = AdminConfig::load().context("Invalid configuration")?;
    if let Some(db_path) = cli.db_path {
        config.db_path = db_path;
    }

    let db = Database::new(DbConfig::new(&config.db_path))
        .await
        .with_context(|| format!("Failed to open database {}", config.db_path.display()))?;
    if !db.health_check().await {
        anyhow::bail!("Database {} is not answering queries", config.db_path.display());
    }
    let out = Output::new(cli.json);

    let completion = match cli.command {
        Commands::CreatePool {
            gtin,
            total,
            pool_id,
        } => commands::pools::create(&db, &out, pool_id, gtin, total).await,

        Commands::Allocate {
            pool,
            quantity,
            length,
            alphabet,
            batch_size,
            attempt_multiplier,
        } => {
            if let Some(batch_size) = batch_size {
                config.batch_size = batch_size;
            }
            if let Some(multiplier) = attempt_multiplier {
                config.attempt_multiplier = multiplier;
            }
            let args = commands::allocate::AllocateArgs {
                pool_id: pool,
                quantity,
                length,
                alphabet,
            };
            commands::allocate::run(&db, &config, &out, args).await
        }

        Commands::ShowPool { pool } => commands::pools::show(&db, &out, &pool).await,
        Commands::ListPools { status } => commands::pools::list(&db, &out, status).await,
        Commands::VoidPool { pool } => commands::pools::void(&db, &out, &pool).await,
        Commands::Recover { pool } => commands::pools::recover(&db, &out, &pool).await,

        Commands::Print {
            pool,
            count,
            lot,
            expiry,
        } => commands::serials::print(&db, &out, &pool, count, lot, expiry).await,

        Commands::Transition { serial, to } => {
            commands::serials::transition(&db, &out, &serial, to.into()).await
        }

        Commands::ExportEpcis {
            pool,
            format,
            lot,
            limit,
            output,
            facility_gln,
            company_prefix,
            read_point,
        } => {
            config.facility_gln = facility_gln.or(config.facility_gln);
            config.company_prefix = company_prefix.or(config.company_prefix);
            config.read_point = read_point.or(config.read_point);
            let args = commands::epcis::ExportArgs {
                pool_id: pool,
                format: format.into(),
                lot,
                limit,
                output,
            };
            commands::epcis::run(&db, &config, &out, args).await
        }
    };

    db.close().await;
    completion
}

/// Maps a failure to the process exit code.
///
/// Rejections (bad input, unknown / void / exhausted pool, illegal
/// transitions) exit with 3; anything else is a store failure.
fn exit_code(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(err) = cause.downcast_ref::<AllocationError>() {
            return if err.is_rejection() {
                EXIT_REJECTED
            } else {
                EXIT_FATAL
            };
        }
        if let Some(err) = cause.downcast_ref::<DbError>() {
            return match err {
                DbError::Domain(_) | DbError::UniqueViolation { .. } => EXIT_REJECTED,
                _ => EXIT_FATAL,
            };
        }
        if cause.is::<CoreError>()
            || cause.is::<ValidationError>()
            || cause.is::<EpcisError>()
            || cause.is::<ConfigError>()
        {
            return EXIT_REJECTED;
        }
    }
    EXIT_FATAL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_allocate() {
        let cli = Cli::try_parse_from([
            "xtrace-admin",
            "allocate",
            "--pool",
            "P1",
            "--quantity",
            "100",
            "--batch-size",
            "50",
        ])
        .unwrap();

        match cli.command {
            Commands::Allocate {
                pool,
                quantity,
                length,
                batch_size,
                attempt_multiplier,
                ..
            } => {
                assert_eq!(pool, "P1");
                assert_eq!(quantity, 100);
                assert_eq!(length, DEFAULT_SERIAL_LENGTH);
                assert_eq!(batch_size, Some(50));
                assert_eq!(attempt_multiplier, None);
            }
            _ => panic!("expected allocate"),
        }
    }

    #[test]
    fn test_parses_status_and_dates() {
        let cli = Cli::try_parse_from(["xtrace-admin", "list-pools", "--status", "exhausted"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::ListPools {
                status: Some(PoolStatus::Exhausted)
            }
        ));

        let err = Cli::try_parse_from([
            "xtrace-admin",
            "print",
            "--pool",
            "P1",
            "--count",
            "5",
            "--lot",
            "L1",
            "--expiry",
            "2028-13-01",
        ]);
        assert!(err.is_err());
    }

    #[test]
    fn test_exit_codes() {
        let rejected = anyhow::Error::new(AllocationError::Rejected(CoreError::PoolNotFound(
            "P9".to_string(),
        )));
        assert_eq!(exit_code(&rejected), EXIT_REJECTED);

        let voided = anyhow::Error::new(DbError::Domain(CoreError::PoolVoided("P1".to_string())))
            .context("Failed to print");
        assert_eq!(exit_code(&voided), EXIT_REJECTED);

        let fatal = anyhow::Error::new(AllocationError::StoreFailure {
            pool_id: "P1".to_string(),
            requested: 10,
            created: 3,
            source: DbError::QueryFailed("disk I/O error".to_string()),
        });
        assert_eq!(exit_code(&fatal), EXIT_FATAL);

        let missing = anyhow::Error::new(ConfigError::MissingRequired("XTRACE_FACILITY_GLN".into()));
        assert_eq!(exit_code(&missing), EXIT_REJECTED);

        assert_eq!(exit_code(&anyhow::anyhow!("unknown")), EXIT_FATAL);
    }
}
