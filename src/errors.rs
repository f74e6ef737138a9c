//! Error handling for the apuration pipeline

use crate::tally::lifecycle::Transition;
use crate::types::TallyStatus;

/// Result type alias for the apuration pipeline
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the apuration pipeline
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Voter is registered but not apt for this election
    #[error("Voter is not eligible: {reason}")]
    NotEligible { reason: String },

    /// Voter already has a confirmed ballot in this election
    #[error("Voter has already voted in this election")]
    AlreadyVoted,

    /// Election is not accepting ballots right now
    #[error("Voting is not open: {reason}")]
    VotingClosed { reason: String },

    /// Slate missing, not approved, or not part of this election
    #[error("Invalid slate: {reason}")]
    InvalidSlate { reason: String },

    /// Lifecycle action not legal from the run's current status
    #[error("Invalid transition: cannot {action} a tally run that is {from}")]
    InvalidTransition {
        from: TallyStatus,
        action: Transition,
    },

    /// Certified runs are frozen
    #[error("Tally run is already certified")]
    AlreadyCertified,

    /// Missing election, voter, slate, ballot or run
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Recomputed fingerprint disagrees with the stored one
    #[error("Integrity mismatch: stored fingerprint {stored}, recomputed {recomputed}")]
    IntegrityMismatch { stored: String, recomputed: String },

    /// Cryptographic operation errors
    #[error("Cryptographic error: {message}")]
    Crypto { message: String },

    /// Storage backend errors
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Coarse error category used by the transport layer to pick a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Conflict,
    Forbidden,
    NotFound,
    BadRequest,
    Integrity,
    Internal,
}

impl Error {
    /// Create a new crypto error
    pub fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto {
            message: message.into(),
        }
    }

    /// Create a new storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a not-found error for the named entity
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Classify for the transport layer
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::AlreadyVoted
            | Self::VotingClosed { .. }
            | Self::InvalidTransition { .. }
            | Self::AlreadyCertified => ErrorClass::Conflict,
            Self::NotEligible { .. } => ErrorClass::Forbidden,
            Self::NotFound { .. } => ErrorClass::NotFound,
            Self::InvalidSlate { .. } => ErrorClass::BadRequest,
            Self::IntegrityMismatch { .. } => ErrorClass::Integrity,
            Self::Crypto { .. }
            | Self::Storage { .. }
            | Self::Config { .. }
            | Self::Serialization(_)
            | Self::Internal { .. } => ErrorClass::Internal,
        }
    }

    /// Whether repeating the same call may succeed
    ///
    /// Ballot-domain and state-machine errors need a new caller decision and
    /// are never retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage { .. } | Self::Internal { .. })
    }
}

/// Convenience macros for creating specific error types
#[macro_export]
macro_rules! crypto_error {
    ($msg:expr) => {
        $crate::Error::crypto($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::crypto(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! storage_error {
    ($msg:expr) => {
        $crate::Error::storage($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::storage(format!($fmt, $($arg)*))
    };
}
