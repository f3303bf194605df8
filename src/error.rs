//! Engine error taxonomy
//!
//! Domain rule violations come back as `NotFound`, `Forbidden`, `Conflict` or
//! `Validation`, each carrying the precondition that failed. Only store
//! connectivity problems stay opaque.

use challenge_market_core::DomainError;
use challenge_market_storage::StorageError;
use thiserror::Error;
use tracing::error;

use crate::ledger::LedgerError;

pub const CONCURRENT_MODIFICATION: &str =
    "participation was modified concurrently, reload and retry";

pub const NOT_OPEN_FOR_PARTICIPATION: &str = "challenge is not open for participation";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(StorageError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl EngineError {
    /// Stable machine-readable kind, used in API error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "not_found",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::Conflict(_) => "conflict",
            EngineError::Validation(_) => "validation",
            EngineError::Storage(_) => "storage",
            EngineError::Ledger(_) => "ledger",
        }
    }

    /// Human-readable reason without the kind prefix
    pub fn reason(&self) -> String {
        match self {
            EngineError::NotFound(r)
            | EngineError::Forbidden(r)
            | EngineError::Conflict(r)
            | EngineError::Validation(r) => r.clone(),
            EngineError::Storage(_) => "internal storage error".to_string(),
            EngineError::Ledger(e) => e.to_string(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Conflict(_))
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        EngineError::NotFound(what.into())
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        EngineError::Forbidden(reason.into())
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        EngineError::Conflict(reason.into())
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        EngineError::Validation(reason.into())
    }
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => EngineError::NotFound(what),
            StorageError::VersionConflict(_) => {
                EngineError::Conflict(CONCURRENT_MODIFICATION.to_string())
            }
            StorageError::Duplicate(_) => {
                EngineError::Conflict("already participating in this challenge".to_string())
            }
            StorageError::CapacityReached(_) => {
                EngineError::Conflict("maximum participants reached".to_string())
            }
            StorageError::Closed(_) => {
                EngineError::NotFound(NOT_OPEN_FOR_PARTICIPATION.to_string())
            }
            StorageError::Invariant(reason) => EngineError::Conflict(reason),
            fatal => {
                error!(error = %fatal, "Storage failure");
                EngineError::Storage(fatal)
            }
        }
    }
}

impl From<DomainError> for EngineError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InvalidTransition { .. } | DomainError::RewardAlreadyAwarded => {
                EngineError::Conflict(err.to_string())
            }
            DomainError::UnknownVariant { .. } | DomainError::DeadlineOutOfRange { .. } => {
                EngineError::Validation(err.to_string())
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
