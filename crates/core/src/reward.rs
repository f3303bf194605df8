//! Reward instructions and the delivery outbox entry

use crate::error::{DomainError, Result};
use crate::{ChallengeId, ParticipationId, RewardGrantId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What the gamification ledger should award for one completed participation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RewardInstruction {
    pub xp: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coins: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bonus_value: Option<f64>,
}

impl RewardInstruction {
    pub fn xp_only(xp: u32) -> Self {
        Self {
            xp,
            coins: None,
            badge_code: None,
            bonus_value: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GrantStatus {
    /// Waiting for (re)delivery to the ledger
    #[default]
    Pending,
    Delivered,
    /// Gave up after the configured number of attempts
    Abandoned,
}

impl GrantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantStatus::Pending => "pending",
            GrantStatus::Delivered => "delivered",
            GrantStatus::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for GrantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GrantStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(GrantStatus::Pending),
            "delivered" => Ok(GrantStatus::Delivered),
            "abandoned" => Ok(GrantStatus::Abandoned),
            other => Err(DomainError::UnknownVariant {
                kind: "grant status",
                value: other.to_string(),
            }),
        }
    }
}

/// Outbox row written in the same store operation that completes a participation.
///
/// Exactly one grant exists per participation. Its id doubles as the
/// idempotency key sent to the ledger.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RewardGrant {
    pub id: RewardGrantId,
    pub participation_id: ParticipationId,
    pub challenge_id: ChallengeId,
    pub user_id: UserId,
    pub instruction: RewardInstruction,
    pub status: GrantStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    /// Set while a delivery attempt is in flight; nobody else sends before it lapses
    #[serde(default)]
    pub claimed_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl RewardGrant {
    pub fn new(
        participation_id: ParticipationId,
        challenge_id: ChallengeId,
        user_id: UserId,
        instruction: RewardInstruction,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RewardGrantId::new(),
            participation_id,
            challenge_id,
            user_id,
            instruction,
            status: GrantStatus::Pending,
            attempts: 0,
            last_error: None,
            claimed_until: None,
            created_at: now,
            delivered_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == GrantStatus::Pending
    }

    /// Pending and not held by an unexpired delivery claim
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && self.claimed_until.map_or(true, |until| until <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_grant_is_pending() {
        let grant = RewardGrant::new(
            ParticipationId::new(),
            ChallengeId::new(),
            UserId::new(),
            RewardInstruction::xp_only(50),
            Utc::now(),
        );
        assert!(grant.is_pending());
        assert_eq!(grant.attempts, 0);
        assert!(grant.delivered_at.is_none());
    }

    #[test]
    fn test_claim_blocks_until_it_lapses() {
        let now = Utc::now();
        let mut grant = RewardGrant::new(
            ParticipationId::new(),
            ChallengeId::new(),
            UserId::new(),
            RewardInstruction::xp_only(50),
            now,
        );
        assert!(grant.is_claimable(now));

        grant.claimed_until = Some(now + chrono::Duration::seconds(60));
        assert!(!grant.is_claimable(now));
        assert!(grant.is_claimable(now + chrono::Duration::seconds(60)));

        grant.claimed_until = None;
        grant.status = GrantStatus::Delivered;
        assert!(!grant.is_claimable(now));
    }

    #[test]
    fn test_instruction_omits_absent_fields() {
        let json = serde_json::to_value(RewardInstruction::xp_only(10)).unwrap();
        assert_eq!(json, serde_json::json!({ "xp": 10 }));
    }

    #[test]
    fn test_grant_status_parse() {
        assert_eq!("delivered".parse::<GrantStatus>().unwrap(), GrantStatus::Delivered);
        assert!("lost".parse::<GrantStatus>().is_err());
    }
}
