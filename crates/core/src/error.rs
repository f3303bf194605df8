//! Error types for domain rules

use crate::participation::ParticipationStatus;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, DomainError>;

/// Violations of rules that live entirely inside the domain types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("cannot move participation from {from} to {to}")]
    InvalidTransition {
        from: ParticipationStatus,
        to: ParticipationStatus,
    },

    #[error("reward already awarded for this participation")]
    RewardAlreadyAwarded,

    #[error("unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("a {days}-day time limit puts the deadline out of range")]
    DeadlineOutOfRange { days: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_display() {
        let err = DomainError::InvalidTransition {
            from: ParticipationStatus::Rejected,
            to: ParticipationStatus::Completed,
        };
        assert_eq!(
            err.to_string(),
            "cannot move participation from rejected to completed"
        );
    }

    #[test]
    fn test_unknown_variant_display() {
        let err = DomainError::UnknownVariant {
            kind: "challenge status",
            value: "archived".to_string(),
        };
        assert_eq!(err.to_string(), "unknown challenge status: archived");
    }
}
