//! Read models returned by engine operations
//!
//! Derived values (percentages, overdue flags, counts) are computed here on
//! every read and never persisted.

use challenge_market_core::{
    Challenge, Participation, ParticipationId, ParticipationStatus, TrackingMode,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A challenge as shown to the public, with the caller's own participation if any
#[derive(Debug, Clone, Serialize)]
pub struct ChallengeView {
    #[serde(flatten)]
    pub challenge: Challenge,
    /// Participations that are neither Rejected nor Withdrawn
    pub participant_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub my_participation: Option<ParticipationSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParticipationSummary {
    pub id: ParticipationId,
    pub status: ParticipationStatus,
    pub current_progress: u32,
    pub progress_percentage: u8,
    pub reward_awarded: bool,
}

impl ParticipationSummary {
    pub fn new(participation: &Participation, challenge: &Challenge) -> Self {
        Self {
            id: participation.id,
            status: participation.status,
            current_progress: participation.current_progress,
            progress_percentage: challenge.progress_percentage(participation.current_progress),
            reward_awarded: participation.reward_awarded,
        }
    }
}

/// Owner dashboard row
#[derive(Debug, Clone, Serialize)]
pub struct OwnerChallengeSummary {
    #[serde(flatten)]
    pub challenge: Challenge,
    pub participant_count: u32,
    pub pending_count: u32,
    pub proof_pending_count: u32,
}

/// A participation with its derived display fields
#[derive(Debug, Clone, Serialize)]
pub struct ParticipationView {
    #[serde(flatten)]
    pub participation: Participation,
    pub progress_percentage: u8,
    pub is_overdue: bool,
}

impl ParticipationView {
    pub fn new(participation: Participation, challenge: &Challenge, now: DateTime<Utc>) -> Self {
        Self {
            progress_percentage: challenge.progress_percentage(participation.current_progress),
            is_overdue: participation.is_overdue(now),
            participation,
        }
    }
}

/// Live progress of one participation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressView {
    pub participation_id: ParticipationId,
    pub current_progress: u32,
    pub target_count: Option<u32>,
    pub percentage: u8,
    pub status: ParticipationStatus,
    pub deadline: Option<DateTime<Utc>>,
    pub is_overdue: bool,
    /// Automatic tracking: target reached. Manual proof: proof awaiting review.
    pub eligible_for_completion: bool,
}

impl ProgressView {
    pub fn new(participation: &Participation, challenge: &Challenge, now: DateTime<Utc>) -> Self {
        let eligible_for_completion = match challenge.tracking_mode {
            TrackingMode::Automatic => {
                participation.status.is_active()
                    && challenge.target_reached(participation.current_progress)
            }
            TrackingMode::ManualProof => {
                participation.status == ParticipationStatus::ProofSubmitted
            }
        };

        Self {
            participation_id: participation.id,
            current_progress: participation.current_progress,
            target_count: challenge.target_count,
            percentage: challenge.progress_percentage(participation.current_progress),
            status: participation.status,
            deadline: participation.deadline,
            is_overdue: participation.is_overdue(now),
            eligible_for_completion,
        }
    }
}
