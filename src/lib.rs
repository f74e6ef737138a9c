//! Ballot casting, tally aggregation and integrity certification
//!
//! Turns individual ballot events into an auditable election result:
//! at most one confirmed ballot per voter, a fully re-derivable tally, a
//! deterministic tamper-evident fingerprint and a monotonic lifecycle that
//! ends in certification.

pub mod apuration;
pub mod config;
pub mod crypto;
pub mod eligibility;
pub mod errors;
pub mod recorder;
pub mod store;
pub mod tally;
pub mod types;

// Re-export commonly used types
pub use apuration::{Apuration, PartialTally, PartialView, TallyReport};
pub use errors::{Error, ErrorClass, Result};

use config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging with `RUST_LOG`, defaulting to `apuration=info`
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "apuration=info".into()),
        )
        .try_init()
        .map_err(|e| Error::internal(format!("Failed to install logger: {e}")))?;

    tracing::info!("🗳️  Apuration v{} initialized", VERSION);
    Ok(())
}

/// Initialize logging from configuration
///
/// `format` is `pretty` or `compact`; anything else falls back to compact.
pub fn init_with(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_new(format!("apuration={}", logging.level))
        .map_err(|e| Error::config(format!("Invalid LOG_LEVEL: {e}")))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = match logging.format.as_str() {
        "pretty" => builder.pretty().try_init(),
        _ => builder.compact().try_init(),
    };
    installed.map_err(|e| Error::internal(format!("Failed to install logger: {e}")))?;

    tracing::info!(
        "🗳️  Apuration v{} initialized (level={}, format={})",
        VERSION,
        logging.level,
        logging.format
    );
    Ok(())
}
