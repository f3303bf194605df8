//! Core domain types for the challenge marketplace
//!
//! Everything here is plain data plus the rules that can be checked without
//! touching storage: the challenge status machine, the participation state
//! machine and the reward instruction handed to the gamification ledger.

pub mod challenge;
pub mod error;
pub mod participation;
pub mod reward;

pub use challenge::{
    Challenge, ChallengeDraft, ChallengePatch, ChallengeStatus, ChallengeType, TrackingMode,
};
pub use error::{DomainError, Result};
pub use participation::{Participation, ParticipationStatus};
pub use reward::{GrantStatus, RewardGrant, RewardInstruction};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Identifier of a challenge
    ChallengeId
);
uuid_id!(
    /// Identifier of a participation (one per challenge and user)
    ParticipationId
);
uuid_id!(
    /// Identifier of a marketplace user, owned by the identity service
    UserId
);
uuid_id!(
    /// Identifier of a reward grant in the delivery outbox
    RewardGrantId
);
