//! Configuration management for the apuration pipeline
//!
//! Loads secrets and tally policy from environment variables with validation.

use crate::types::ElectionPhase;
use crate::{Error, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Security configuration for fingerprints, receipts and certification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Salt for anonymized voter fingerprints (base64 encoded, minimum 32 bytes)
    pub voter_salt: String,

    /// Salt for vote fingerprints and receipt codes (base64 encoded, minimum 32 bytes)
    pub receipt_salt: String,

    /// Ed25519 seed used to sign certifications (base64, exactly 32 bytes).
    /// When absent an ephemeral key is generated at startup.
    pub certification_key: Option<String>,
}

impl SecurityConfig {
    /// Load security configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load security configuration through an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let voter_salt = lookup("APURATION_VOTER_SALT")
            .ok_or_else(|| Error::config("APURATION_VOTER_SALT environment variable required"))?;

        let receipt_salt = lookup("APURATION_RECEIPT_SALT")
            .ok_or_else(|| Error::config("APURATION_RECEIPT_SALT environment variable required"))?;

        Self::validate_salt(&voter_salt, "APURATION_VOTER_SALT")?;
        Self::validate_salt(&receipt_salt, "APURATION_RECEIPT_SALT")?;

        let certification_key = lookup("APURATION_CERTIFICATION_KEY");
        let config = Self {
            voter_salt,
            receipt_salt,
            certification_key,
        };
        config.certification_seed()?;

        Ok(config)
    }

    /// Create configuration for testing
    pub fn for_testing() -> Self {
        let engine = base64::engine::general_purpose::STANDARD;
        Self {
            voter_salt: engine.encode(rand::random::<[u8; 32]>()),
            receipt_salt: engine.encode(rand::random::<[u8; 32]>()),
            certification_key: None,
        }
    }

    /// Validate a base64-encoded salt
    fn validate_salt(salt: &str, name: &str) -> Result<()> {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(salt)
            .map_err(|_| Error::config(format!("{name} must be valid base64")))?;

        if decoded.len() < 32 {
            return Err(Error::config(format!(
                "{name} must be at least 32 bytes when decoded"
            )));
        }

        Ok(())
    }

    /// Get voter salt as bytes
    pub fn voter_salt_bytes(&self) -> Result<Vec<u8>> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.voter_salt)
            .map_err(|_| Error::config("Invalid voter salt"))
    }

    /// Get receipt salt as bytes
    pub fn receipt_salt_bytes(&self) -> Result<Vec<u8>> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.receipt_salt)
            .map_err(|_| Error::config("Invalid receipt salt"))
    }

    /// Decode the certification seed, if one is configured
    pub fn certification_seed(&self) -> Result<Option<[u8; 32]>> {
        let Some(encoded) = &self.certification_key else {
            return Ok(None);
        };
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|_| Error::config("APURATION_CERTIFICATION_KEY must be valid base64"))?;
        let seed: [u8; 32] = decoded.try_into().map_err(|_| {
            Error::config("APURATION_CERTIFICATION_KEY must decode to exactly 32 bytes")
        })?;
        Ok(Some(seed))
    }
}

/// Rule that orders slates with equal vote counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TieBreak {
    /// Lower ballot number first, then slate id
    #[default]
    SlateNumber,
    /// Order in which the slate directory lists the slates
    EncounterOrder,
}

impl TieBreak {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "slate-number" => Ok(Self::SlateNumber),
            "encounter-order" => Ok(Self::EncounterOrder),
            other => Err(Error::config(format!("Unknown APURATION_TIE_BREAK: {other}"))),
        }
    }
}

/// Tally policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyConfig {
    pub tie_break: TieBreak,
    /// Election phases in which partial tallies may be shown
    pub partial_visibility_phases: Vec<ElectionPhase>,
}

impl Default for TallyConfig {
    fn default() -> Self {
        Self {
            tie_break: TieBreak::default(),
            partial_visibility_phases: vec![ElectionPhase::Tallying, ElectionPhase::Result],
        }
    }
}

impl TallyConfig {
    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = lookup("APURATION_TIE_BREAK") {
            config.tie_break = TieBreak::parse(&value)?;
        }

        if let Some(value) = lookup("APURATION_PARTIAL_PHASES") {
            config.partial_visibility_phases = value
                .split(',')
                .filter(|name| !name.trim().is_empty())
                .map(|name| {
                    ElectionPhase::parse(name).ok_or_else(|| {
                        Error::config(format!("Unknown phase in APURATION_PARTIAL_PHASES: {name}"))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
        }

        Ok(config)
    }

    /// Whether a partial tally may be shown while the election is in `phase`
    pub fn permits_partial(&self, phase: ElectionPhase) -> bool {
        self.partial_visibility_phases.contains(&phase)
    }
}

/// Per-voter lock housekeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Interval at which idle per-voter lock entries are dropped
    pub prune_interval_seconds: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            prune_interval_seconds: 300,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub security: SecurityConfig,
    pub tally: TallyConfig,
    pub locks: LockConfig,
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Config {
    /// Load configuration from environment
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let security = SecurityConfig::from_lookup(&lookup)?;
        let tally = TallyConfig::from_lookup(&lookup)?;

        let prune_interval_seconds: u64 = lookup("APURATION_LOCK_PRUNE_SECONDS")
            .unwrap_or_else(|| "300".to_string())
            .parse()
            .map_err(|_| Error::config("Invalid APURATION_LOCK_PRUNE_SECONDS"))?;
        if prune_interval_seconds == 0 {
            return Err(Error::config(
                "APURATION_LOCK_PRUNE_SECONDS must be at least 1",
            ));
        }

        let logging = LoggingConfig {
            level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            format: lookup("LOG_FORMAT").unwrap_or_else(|| "compact".to_string()),
        };

        Ok(Self {
            security,
            tally,
            locks: LockConfig {
                prune_interval_seconds,
            },
            logging,
        })
    }

    /// Create configuration for testing
    pub fn for_testing() -> Self {
        Self {
            security: SecurityConfig::for_testing(),
            tally: TallyConfig::default(),
            locks: LockConfig {
                prune_interval_seconds: 1,
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}
