//! Challenge definition and status rules

use crate::error::{DomainError, Result};
use crate::reward::RewardInstruction;
use crate::{ChallengeId, UserId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of goal a challenge sets for its participants
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeType {
    BookingMilestone,
    ReviewChallenge,
    SpeedChallenge,
    LoyaltyChallenge,
    ReferralChallenge,
    SeasonalChallenge,
}

impl ChallengeType {
    pub const ALL: [ChallengeType; 6] = [
        ChallengeType::BookingMilestone,
        ChallengeType::ReviewChallenge,
        ChallengeType::SpeedChallenge,
        ChallengeType::LoyaltyChallenge,
        ChallengeType::ReferralChallenge,
        ChallengeType::SeasonalChallenge,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeType::BookingMilestone => "booking_milestone",
            ChallengeType::ReviewChallenge => "review_challenge",
            ChallengeType::SpeedChallenge => "speed_challenge",
            ChallengeType::LoyaltyChallenge => "loyalty_challenge",
            ChallengeType::ReferralChallenge => "referral_challenge",
            ChallengeType::SeasonalChallenge => "seasonal_challenge",
        }
    }
}

impl fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChallengeType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::UnknownVariant {
                kind: "challenge type",
                value: s.to_string(),
            })
    }
}

/// How completion is verified
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrackingMode {
    /// The owner reports a progress count
    #[default]
    Automatic,
    /// The participant submits proof that the owner reviews
    ManualProof,
}

impl TrackingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingMode::Automatic => "automatic",
            TrackingMode::ManualProof => "manual_proof",
        }
    }
}

impl fmt::Display for TrackingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackingMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "automatic" => Ok(TrackingMode::Automatic),
            "manual_proof" => Ok(TrackingMode::ManualProof),
            other => Err(DomainError::UnknownVariant {
                kind: "tracking mode",
                value: other.to_string(),
            }),
        }
    }
}

/// Status of a challenge, controlled by its owner
///
/// Draft -> Active -> Completed, with Draft/Active -> Cancelled as the
/// terminal escape hatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeStatus {
    #[default]
    Draft,
    Active,
    Completed,
    Cancelled,
}

impl ChallengeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeStatus::Draft => "draft",
            ChallengeStatus::Active => "active",
            ChallengeStatus::Completed => "completed",
            ChallengeStatus::Cancelled => "cancelled",
        }
    }

    /// Closed challenges can no longer be edited
    pub fn is_closed(&self) -> bool {
        matches!(self, ChallengeStatus::Completed | ChallengeStatus::Cancelled)
    }

    pub fn is_valid_transition(&self, to: ChallengeStatus) -> bool {
        matches!(
            (self, to),
            (ChallengeStatus::Draft, ChallengeStatus::Active)
                | (ChallengeStatus::Draft, ChallengeStatus::Cancelled)
                | (ChallengeStatus::Active, ChallengeStatus::Cancelled)
                | (ChallengeStatus::Active, ChallengeStatus::Completed)
        )
    }
}

impl fmt::Display for ChallengeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChallengeStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(ChallengeStatus::Draft),
            "active" => Ok(ChallengeStatus::Active),
            "completed" => Ok(ChallengeStatus::Completed),
            "cancelled" => Ok(ChallengeStatus::Cancelled),
            other => Err(DomainError::UnknownVariant {
                kind: "challenge status",
                value: other.to_string(),
            }),
        }
    }
}

/// Input for creating a challenge
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChallengeDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub challenge_type: ChallengeType,
    #[serde(default)]
    pub tracking_mode: TrackingMode,
    #[serde(default)]
    pub target_count: Option<u32>,
    #[serde(default)]
    pub time_limit_days: Option<u32>,
    #[serde(default)]
    pub xp_reward: u32,
    #[serde(default)]
    pub coin_reward: Option<u32>,
    #[serde(default)]
    pub badge_code: Option<String>,
    #[serde(default)]
    pub reward_description: Option<String>,
    #[serde(default)]
    pub bonus_value: Option<f64>,
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub max_participants: Option<u32>,
}

impl ChallengeDraft {
    pub fn new(title: impl Into<String>, challenge_type: ChallengeType) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            challenge_type,
            tracking_mode: TrackingMode::Automatic,
            target_count: None,
            time_limit_days: None,
            xp_reward: 0,
            coin_reward: None,
            badge_code: None,
            reward_description: None,
            bonus_value: None,
            starts_at: None,
            ends_at: None,
            max_participants: None,
        }
    }

    pub fn with_tracking_mode(mut self, mode: TrackingMode) -> Self {
        self.tracking_mode = mode;
        self
    }

    pub fn with_target_count(mut self, target: u32) -> Self {
        self.target_count = Some(target);
        self
    }

    pub fn with_time_limit_days(mut self, days: u32) -> Self {
        self.time_limit_days = Some(days);
        self
    }

    pub fn with_xp_reward(mut self, xp: u32) -> Self {
        self.xp_reward = xp;
        self
    }

    pub fn with_badge(mut self, badge_code: impl Into<String>) -> Self {
        self.badge_code = Some(badge_code.into());
        self
    }

    pub fn with_max_participants(mut self, max: u32) -> Self {
        self.max_participants = Some(max);
        self
    }

    pub fn with_window(mut self, starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> Self {
        self.starts_at = Some(starts_at);
        self.ends_at = Some(ends_at);
        self
    }
}

/// Partial update of a challenge; only supplied fields are merged
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengePatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub challenge_type: Option<ChallengeType>,
    pub tracking_mode: Option<TrackingMode>,
    pub target_count: Option<u32>,
    pub time_limit_days: Option<u32>,
    pub xp_reward: Option<u32>,
    pub coin_reward: Option<u32>,
    pub badge_code: Option<String>,
    pub reward_description: Option<String>,
    pub bonus_value: Option<f64>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub max_participants: Option<u32>,
}

impl ChallengePatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.challenge_type.is_none()
            && self.tracking_mode.is_none()
            && self.target_count.is_none()
            && self.time_limit_days.is_none()
            && self.xp_reward.is_none()
            && self.coin_reward.is_none()
            && self.badge_code.is_none()
            && self.reward_description.is_none()
            && self.bonus_value.is_none()
            && self.starts_at.is_none()
            && self.ends_at.is_none()
            && self.max_participants.is_none()
    }
}

/// A challenge owned by one entrepreneur
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: ChallengeId,
    pub owner_id: UserId,
    pub title: String,
    pub description: String,
    pub challenge_type: ChallengeType,
    pub tracking_mode: TrackingMode,
    pub status: ChallengeStatus,
    pub target_count: Option<u32>,
    pub time_limit_days: Option<u32>,
    pub xp_reward: u32,
    pub coin_reward: Option<u32>,
    pub badge_code: Option<String>,
    pub reward_description: Option<String>,
    pub bonus_value: Option<f64>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub max_participants: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Challenge {
    /// Build a new Draft challenge from its creation input
    pub fn from_draft(owner_id: UserId, draft: ChallengeDraft, now: DateTime<Utc>) -> Self {
        Self {
            id: ChallengeId::new(),
            owner_id,
            title: draft.title.trim().to_string(),
            description: draft.description,
            challenge_type: draft.challenge_type,
            tracking_mode: draft.tracking_mode,
            status: ChallengeStatus::Draft,
            target_count: draft.target_count,
            time_limit_days: draft.time_limit_days,
            xp_reward: draft.xp_reward,
            coin_reward: draft.coin_reward,
            badge_code: draft.badge_code,
            reward_description: draft.reward_description,
            bonus_value: draft.bonus_value,
            starts_at: draft.starts_at,
            ends_at: draft.ends_at,
            max_participants: draft.max_participants,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merge the supplied fields of a patch
    pub fn apply_patch(&mut self, patch: ChallengePatch, now: DateTime<Utc>) {
        if let Some(title) = patch.title {
            self.title = title.trim().to_string();
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(challenge_type) = patch.challenge_type {
            self.challenge_type = challenge_type;
        }
        if let Some(mode) = patch.tracking_mode {
            self.tracking_mode = mode;
        }
        if let Some(target) = patch.target_count {
            self.target_count = Some(target);
        }
        if let Some(days) = patch.time_limit_days {
            self.time_limit_days = Some(days);
        }
        if let Some(xp) = patch.xp_reward {
            self.xp_reward = xp;
        }
        if let Some(coins) = patch.coin_reward {
            self.coin_reward = Some(coins);
        }
        if let Some(badge) = patch.badge_code {
            self.badge_code = Some(badge);
        }
        if let Some(description) = patch.reward_description {
            self.reward_description = Some(description);
        }
        if let Some(bonus) = patch.bonus_value {
            self.bonus_value = Some(bonus);
        }
        if let Some(starts_at) = patch.starts_at {
            self.starts_at = Some(starts_at);
        }
        if let Some(ends_at) = patch.ends_at {
            self.ends_at = Some(ends_at);
        }
        if let Some(max) = patch.max_participants {
            self.max_participants = Some(max);
        }
        self.updated_at = now;
    }

    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.owner_id == user_id
    }

    /// Whether `now` falls inside the optional validity window (bounds inclusive)
    pub fn is_within_window(&self, now: DateTime<Utc>) -> bool {
        let started = self.starts_at.map_or(true, |start| now >= start);
        let not_ended = self.ends_at.map_or(true, |end| now <= end);
        started && not_ended
    }

    /// Only Active challenges inside their window accept new participants
    pub fn is_joinable(&self, now: DateTime<Utc>) -> bool {
        self.status == ChallengeStatus::Active && self.is_within_window(now)
    }

    /// Deadline for a participation accepted at `accepted_at`
    pub fn deadline_from(&self, accepted_at: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        let Some(days) = self.time_limit_days else {
            return Ok(None);
        };
        Duration::try_days(i64::from(days))
            .and_then(|limit| accepted_at.checked_add_signed(limit))
            .map(Some)
            .ok_or(DomainError::DeadlineOutOfRange { days })
    }

    /// Display percentage, `min(100, progress * 100 / target)`, or 0 without a target
    pub fn progress_percentage(&self, current_progress: u32) -> u8 {
        match self.target_count {
            Some(target) if target > 0 => {
                let pct = u64::from(current_progress) * 100 / u64::from(target);
                pct.min(100) as u8
            }
            _ => 0,
        }
    }

    /// Whether the reported count has reached the target
    pub fn target_reached(&self, current_progress: u32) -> bool {
        self.target_count
            .is_some_and(|target| current_progress >= target)
    }

    /// What the ledger should award when a participation completes
    pub fn reward_instruction(&self) -> RewardInstruction {
        RewardInstruction {
            xp: self.xp_reward,
            coins: self.coin_reward,
            badge_code: self.badge_code.clone(),
            bonus_value: self.bonus_value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn challenge() -> Challenge {
        Challenge::from_draft(
            UserId::new(),
            ChallengeDraft::new("  Book five sessions ", ChallengeType::BookingMilestone)
                .with_target_count(5)
                .with_xp_reward(150),
            Utc::now(),
        )
    }

    #[test]
    fn test_from_draft_starts_as_trimmed_draft() {
        let c = challenge();
        assert_eq!(c.status, ChallengeStatus::Draft);
        assert_eq!(c.title, "Book five sessions");
        assert_eq!(c.created_at, c.updated_at);
    }

    #[test]
    fn test_status_transitions() {
        use ChallengeStatus::*;
        assert!(Draft.is_valid_transition(Active));
        assert!(Draft.is_valid_transition(Cancelled));
        assert!(Active.is_valid_transition(Cancelled));
        assert!(Active.is_valid_transition(Completed));

        assert!(!Active.is_valid_transition(Draft));
        assert!(!Active.is_valid_transition(Active));
        assert!(!Cancelled.is_valid_transition(Active));
        assert!(!Completed.is_valid_transition(Active));
        assert!(!Draft.is_valid_transition(Completed));
    }

    #[test]
    fn test_window_bounds() {
        let now = Utc::now();
        let mut c = challenge();
        c.status = ChallengeStatus::Active;
        assert!(c.is_joinable(now));

        c.starts_at = Some(now + Duration::hours(1));
        assert!(!c.is_within_window(now));

        c.starts_at = Some(now - Duration::days(2));
        c.ends_at = Some(now - Duration::days(1));
        assert!(!c.is_joinable(now));

        c.ends_at = Some(now);
        assert!(c.is_joinable(now));
    }

    #[test]
    fn test_draft_is_never_joinable() {
        let c = challenge();
        assert!(!c.is_joinable(Utc::now()));
    }

    #[test]
    fn test_progress_percentage() {
        let mut c = challenge();
        assert_eq!(c.progress_percentage(0), 0);
        assert_eq!(c.progress_percentage(2), 40);
        assert_eq!(c.progress_percentage(5), 100);
        assert_eq!(c.progress_percentage(12), 100);

        c.target_count = None;
        assert_eq!(c.progress_percentage(12), 0);
        assert!(!c.target_reached(12));
    }

    #[test]
    fn test_deadline_from_time_limit() {
        let mut c = challenge();
        let accepted = Utc::now();
        assert_eq!(c.deadline_from(accepted), Ok(None));

        c.time_limit_days = Some(7);
        assert_eq!(c.deadline_from(accepted), Ok(Some(accepted + Duration::days(7))));
    }

    #[test]
    fn test_deadline_past_calendar_range_is_error() {
        let mut c = challenge();
        c.time_limit_days = Some(1_000_000_000);
        assert_eq!(
            c.deadline_from(Utc::now()),
            Err(DomainError::DeadlineOutOfRange {
                days: 1_000_000_000
            })
        );
    }

    #[test]
    fn test_apply_patch_merges_only_supplied_fields() {
        let mut c = challenge();
        let original_description = c.description.clone();
        let later = c.updated_at + Duration::seconds(5);

        c.apply_patch(
            ChallengePatch {
                title: Some("Book six sessions".to_string()),
                target_count: Some(6),
                ..Default::default()
            },
            later,
        );

        assert_eq!(c.title, "Book six sessions");
        assert_eq!(c.target_count, Some(6));
        assert_eq!(c.xp_reward, 150);
        assert_eq!(c.description, original_description);
        assert_eq!(c.updated_at, later);
    }

    #[test]
    fn test_string_roundtrips() {
        for t in ChallengeType::ALL {
            assert_eq!(t.as_str().parse::<ChallengeType>().unwrap(), t);
        }
        assert_eq!(
            "manual_proof".parse::<TrackingMode>().unwrap(),
            TrackingMode::ManualProof
        );
        assert!("archived".parse::<ChallengeStatus>().is_err());
    }

    #[test]
    fn test_reward_instruction_copies_reward_fields() {
        let mut c = challenge();
        c.badge_code = Some("first-five".to_string());
        c.coin_reward = Some(20);

        let reward = c.reward_instruction();
        assert_eq!(reward.xp, 150);
        assert_eq!(reward.coins, Some(20));
        assert_eq!(reward.badge_code.as_deref(), Some("first-five"));
    }
}
