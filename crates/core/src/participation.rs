//! Participation state machine
//!
//! One participation exists per (challenge, user) pair. Its status moves
//! through:
//!
//! ```text
//! (join) -> Pending -> Accepted -> InProgress -> ProofSubmitted -> Completed
//!              |          |            |              |
//!              v          +------------+--------------+--> Failed
//!           Rejected      (any non-terminal) --> Withdrawn
//! ```
//!
//! Rejected and Withdrawn can be re-entered by joining again, which resets
//! the same record back to Pending.

use crate::error::{DomainError, Result};
use crate::reward::RewardInstruction;
use crate::{ChallengeId, ParticipationId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipationStatus {
    /// Waiting for the owner to accept or reject
    Pending,
    /// Accepted, no progress reported yet
    Accepted,
    /// Rejected by the owner; re-enterable
    Rejected,
    /// At least one progress update received
    InProgress,
    /// Proof is waiting for the owner's verification
    ProofSubmitted,
    Completed,
    Failed,
    /// Withdrawn by the participant; re-enterable
    Withdrawn,
}

impl ParticipationStatus {
    pub const ALL: [ParticipationStatus; 8] = [
        ParticipationStatus::Pending,
        ParticipationStatus::Accepted,
        ParticipationStatus::Rejected,
        ParticipationStatus::InProgress,
        ParticipationStatus::ProofSubmitted,
        ParticipationStatus::Completed,
        ParticipationStatus::Failed,
        ParticipationStatus::Withdrawn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipationStatus::Pending => "pending",
            ParticipationStatus::Accepted => "accepted",
            ParticipationStatus::Rejected => "rejected",
            ParticipationStatus::InProgress => "in_progress",
            ParticipationStatus::ProofSubmitted => "proof_submitted",
            ParticipationStatus::Completed => "completed",
            ParticipationStatus::Failed => "failed",
            ParticipationStatus::Withdrawn => "withdrawn",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ParticipationStatus::Rejected
                | ParticipationStatus::Completed
                | ParticipationStatus::Failed
                | ParticipationStatus::Withdrawn
        )
    }

    /// A new join request may reset these back to Pending
    pub fn is_reenterable(&self) -> bool {
        matches!(
            self,
            ParticipationStatus::Rejected | ParticipationStatus::Withdrawn
        )
    }

    /// Counts toward the challenge's participant capacity
    pub fn occupies_slot(&self) -> bool {
        !self.is_reenterable()
    }

    /// Accepted and working on the challenge; blocks challenge deletion
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ParticipationStatus::Accepted
                | ParticipationStatus::InProgress
                | ParticipationStatus::ProofSubmitted
        )
    }

    pub fn can_transition_to(&self, to: ParticipationStatus) -> bool {
        use ParticipationStatus::*;
        match (self, to) {
            // Re-entry
            (Rejected, Pending) | (Withdrawn, Pending) => true,

            // Owner response
            (Pending, Accepted) | (Pending, Rejected) => true,

            // First progress update
            (Accepted, InProgress) => true,

            // Proof submission and its review
            (Accepted, ProofSubmitted) | (InProgress, ProofSubmitted) => true,
            (ProofSubmitted, Accepted) | (ProofSubmitted, InProgress) => true,

            // Completion
            (Accepted, Completed) | (InProgress, Completed) | (ProofSubmitted, Completed) => true,

            // Failure
            (Accepted, Failed) | (InProgress, Failed) | (ProofSubmitted, Failed) => true,

            // Withdrawal from anything still open
            (Pending, Withdrawn)
            | (Accepted, Withdrawn)
            | (InProgress, Withdrawn)
            | (ProofSubmitted, Withdrawn) => true,

            _ => false,
        }
    }
}

impl fmt::Display for ParticipationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParticipationStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::UnknownVariant {
                kind: "participation status",
                value: s.to_string(),
            })
    }
}

/// One user's attempt at one challenge
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participation {
    pub id: ParticipationId,
    pub challenge_id: ChallengeId,
    pub user_id: UserId,
    pub status: ParticipationStatus,
    pub current_progress: u32,
    pub user_message: Option<String>,
    pub entrepreneur_response: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub reward_awarded: bool,
    pub xp_awarded: u32,
    pub coins_awarded: u32,
    pub proof_text: Option<String>,
    pub proof_image_ref: Option<String>,
    pub proof_submitted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    /// Set on the first progress update (Accepted -> InProgress)
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency token, bumped by the store on every write
    pub version: u64,
}

impl Participation {
    /// A fresh Pending participation
    pub fn new(
        challenge_id: ChallengeId,
        user_id: UserId,
        user_message: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ParticipationId::new(),
            challenge_id,
            user_id,
            status: ParticipationStatus::Pending,
            current_progress: 0,
            user_message,
            entrepreneur_response: None,
            deadline: None,
            reward_awarded: false,
            xp_awarded: 0,
            coins_awarded: 0,
            proof_text: None,
            proof_image_ref: None,
            proof_submitted_at: None,
            created_at: now,
            accepted_at: None,
            started_at: None,
            completed_at: None,
            updated_at: now,
            version: 0,
        }
    }

    fn transition(&mut self, to: ParticipationStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(DomainError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    fn clear_proof(&mut self) {
        self.proof_text = None;
        self.proof_image_ref = None;
        self.proof_submitted_at = None;
    }

    /// Reset a Rejected or Withdrawn participation to Pending, keeping its id
    pub fn rejoin(&mut self, user_message: Option<String>, now: DateTime<Utc>) -> Result<()> {
        self.transition(ParticipationStatus::Pending, now)?;
        self.current_progress = 0;
        self.user_message = user_message;
        self.entrepreneur_response = None;
        self.deadline = None;
        self.accepted_at = None;
        self.started_at = None;
        self.completed_at = None;
        self.clear_proof();
        Ok(())
    }

    pub fn accept(
        &mut self,
        response: Option<String>,
        deadline: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.transition(ParticipationStatus::Accepted, now)?;
        self.entrepreneur_response = response;
        self.accepted_at = Some(now);
        self.deadline = deadline;
        Ok(())
    }

    pub fn reject(&mut self, response: Option<String>, now: DateTime<Utc>) -> Result<()> {
        self.transition(ParticipationStatus::Rejected, now)?;
        self.entrepreneur_response = response;
        Ok(())
    }

    /// Store a reported progress count; the first report starts the participation
    pub fn record_progress(&mut self, value: u32, now: DateTime<Utc>) -> Result<()> {
        match self.status {
            ParticipationStatus::Accepted => {
                self.transition(ParticipationStatus::InProgress, now)?;
                self.started_at = Some(now);
            }
            ParticipationStatus::InProgress => self.updated_at = now,
            other => {
                return Err(DomainError::InvalidTransition {
                    from: other,
                    to: ParticipationStatus::InProgress,
                })
            }
        }
        self.current_progress = value;
        Ok(())
    }

    pub fn submit_proof(
        &mut self,
        text: Option<String>,
        image_ref: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.transition(ParticipationStatus::ProofSubmitted, now)?;
        self.proof_text = text;
        self.proof_image_ref = image_ref;
        self.proof_submitted_at = Some(now);
        Ok(())
    }

    /// Send the proof back; the participant returns to where they were before submitting
    pub fn reject_proof(&mut self, response: Option<String>, now: DateTime<Utc>) -> Result<()> {
        let resume = if self.started_at.is_some() {
            ParticipationStatus::InProgress
        } else {
            ParticipationStatus::Accepted
        };
        self.transition(resume, now)?;
        self.entrepreneur_response = response;
        self.clear_proof();
        Ok(())
    }

    /// Move to Completed and flip the one-way reward flag
    pub fn complete(
        &mut self,
        reward: &RewardInstruction,
        response: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.reward_awarded {
            return Err(DomainError::RewardAlreadyAwarded);
        }
        self.transition(ParticipationStatus::Completed, now)?;
        if response.is_some() {
            self.entrepreneur_response = response;
        }
        self.completed_at = Some(now);
        self.reward_awarded = true;
        self.xp_awarded = reward.xp;
        self.coins_awarded = reward.coins.unwrap_or(0);
        Ok(())
    }

    pub fn fail(&mut self, response: Option<String>, now: DateTime<Utc>) -> Result<()> {
        self.transition(ParticipationStatus::Failed, now)?;
        if response.is_some() {
            self.entrepreneur_response = response;
        }
        Ok(())
    }

    pub fn withdraw(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(ParticipationStatus::Withdrawn, now)
    }

    /// Past the deadline while still working on the challenge
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status.is_active() && self.deadline.is_some_and(|deadline| deadline < now)
    }
}
