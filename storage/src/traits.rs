use async_trait::async_trait;
use challenge_market_core::{
    Challenge, ChallengeId, ChallengeType, DomainError, Participation, ParticipationId,
    ParticipationStatus, RewardGrant, RewardGrantId, UserId,
};
use chrono::{DateTime, Utc};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),
    #[error("pool error: {0}")]
    Pool(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("version conflict: {0}")]
    VersionConflict(String),
    #[error("duplicate: {0}")]
    Duplicate(String),
    #[error("capacity reached: {0}")]
    CapacityReached(String),
    #[error("closed: {0}")]
    Closed(String),
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl StorageError {
    /// Infrastructure failures, as opposed to domain signals raised by the store
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StorageError::Database(_) | StorageError::Pool(_) | StorageError::Serialization(_)
        )
    }
}

impl From<tokio_postgres::Error> for StorageError {
    fn from(err: tokio_postgres::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for StorageError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        StorageError::Pool(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<DomainError> for StorageError {
    fn from(err: DomainError) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Challenge listing filter
#[derive(Clone, Debug, Default)]
pub struct ChallengeFilter {
    pub challenge_type: Option<ChallengeType>,
    /// Case-insensitive substring match over title and description
    pub search: Option<String>,
    /// Only Active challenges whose validity window contains `now`
    pub active_at: Option<DateTime<Utc>>,
    pub owner_id: Option<UserId>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl ChallengeFilter {
    pub fn matches(&self, challenge: &Challenge) -> bool {
        if let Some(t) = self.challenge_type {
            if challenge.challenge_type != t {
                return false;
            }
        }
        if let Some(owner) = self.owner_id {
            if challenge.owner_id != owner {
                return false;
            }
        }
        if let Some(now) = self.active_at {
            if !challenge.is_joinable(now) {
                return false;
            }
        }
        if let Some(search) = self.search.as_deref() {
            let needle = search.to_lowercase();
            if !challenge.title.to_lowercase().contains(&needle)
                && !challenge.description.to_lowercase().contains(&needle)
            {
                return false;
            }
        }
        true
    }
}

/// Participation listing filter; every supplied field must match
#[derive(Clone, Debug, Default)]
pub struct ParticipationFilter {
    pub challenge_id: Option<ChallengeId>,
    pub user_id: Option<UserId>,
    pub status: Option<ParticipationStatus>,
    /// Participations in challenges owned by this user
    pub challenge_owner: Option<UserId>,
}

/// Per-challenge participation tallies
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ParticipationCounts {
    /// Everything except Rejected and Withdrawn; compared against capacity
    pub occupying: u32,
    pub pending: u32,
    pub proof_submitted: u32,
    /// Accepted, InProgress or ProofSubmitted
    pub active: u32,
}

impl ParticipationCounts {
    pub fn tally<'a>(statuses: impl IntoIterator<Item = &'a ParticipationStatus>) -> Self {
        let mut counts = Self::default();
        for status in statuses {
            counts.add(*status, 1);
        }
        counts
    }

    /// Account for `n` participations in `status`
    pub fn add(&mut self, status: ParticipationStatus, n: u32) {
        if status.occupies_slot() {
            self.occupying += n;
        }
        if status.is_active() {
            self.active += n;
        }
        match status {
            ParticipationStatus::Pending => self.pending += n,
            ParticipationStatus::ProofSubmitted => self.proof_submitted += n,
            _ => {}
        }
    }
}

/// Persistence for challenges, participations and the reward outbox.
///
/// Every method is one consistency unit. The compound operations
/// (`insert_participation`, `update_participation`, `complete_participation`,
/// `update_challenge`, `delete_challenge`) evaluate their guards and apply
/// their writes atomically with respect to every other call on the same
/// challenge or participation.
#[async_trait]
pub trait ChallengeStore: Send + Sync {
    // ==================== Challenges ====================

    async fn insert_challenge(&self, challenge: &Challenge) -> Result<()>;
    async fn get_challenge(&self, id: ChallengeId) -> Result<Option<Challenge>>;

    /// Overwrite a challenge. Fails with `CapacityReached` when its
    /// `max_participants` is below the number of occupying participations.
    async fn update_challenge(&self, challenge: &Challenge) -> Result<()>;

    /// Delete a challenge and its participations. Fails with `Invariant`
    /// while any participation is active.
    async fn delete_challenge(&self, id: ChallengeId) -> Result<()>;

    /// Matching challenges, newest first
    async fn list_challenges(&self, filter: &ChallengeFilter) -> Result<Vec<Challenge>>;

    // ==================== Participations ====================

    async fn get_participation(&self, id: ParticipationId) -> Result<Option<Participation>>;
    async fn find_participation(
        &self,
        challenge_id: ChallengeId,
        user_id: UserId,
    ) -> Result<Option<Participation>>;

    /// Insert a new participation. Fails with `Duplicate` if the (challenge,
    /// user) pair exists.
    ///
    /// With `admit_at` set the write admits a participant: the stored challenge
    /// must be joinable at that instant (`Closed` otherwise) and its
    /// `max_participants` must leave room (`CapacityReached` otherwise).
    async fn insert_participation(
        &self,
        participation: &Participation,
        admit_at: Option<DateTime<Utc>>,
    ) -> Result<Participation>;

    /// Compare-and-set on `participation.version`; returns the stored row with
    /// its bumped version. `admit_at` applies the same admission guard as
    /// `insert_participation`, not counting this participation itself.
    async fn update_participation(
        &self,
        participation: &Participation,
        admit_at: Option<DateTime<Utc>>,
    ) -> Result<Participation>;

    /// Compare-and-set a Completed participation together with its reward
    /// grant. Fails with `Invariant` if the stored row already has
    /// `reward_awarded` set.
    async fn complete_participation(
        &self,
        participation: &Participation,
        grant: &RewardGrant,
    ) -> Result<Participation>;

    /// Matching participations, newest first
    async fn list_participations(&self, filter: &ParticipationFilter)
        -> Result<Vec<Participation>>;

    async fn count_participations(&self, challenge_id: ChallengeId)
        -> Result<ParticipationCounts>;

    // ==================== Reward outbox ====================

    async fn get_grant(&self, id: RewardGrantId) -> Result<Option<RewardGrant>>;
    async fn grant_for_participation(
        &self,
        participation_id: ParticipationId,
    ) -> Result<Option<RewardGrant>>;

    /// Pending grants below `max_attempts` with no claim outstanding at `now`,
    /// oldest first
    async fn pending_grants(
        &self,
        max_attempts: u32,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<RewardGrant>>;

    /// Reserve a delivery attempt until `lease_until`: bumps `attempts` only if
    /// it still equals `expected_attempts`, the grant is Pending and no other
    /// claim is outstanding at `now`. Returns false if another caller holds
    /// or took the attempt.
    async fn claim_grant_attempt(
        &self,
        id: RewardGrantId,
        expected_attempts: u32,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool>;

    /// Settle the grant and release its claim
    async fn mark_grant_delivered(&self, id: RewardGrantId, at: DateTime<Utc>) -> Result<()>;

    /// Record a failed attempt and release its claim; `abandon` moves the
    /// grant out of Pending
    async fn record_grant_failure(&self, id: RewardGrantId, error: &str, abandon: bool)
        -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use challenge_market_core::ChallengeDraft;

    #[test]
    fn test_counts_tally() {
        use ParticipationStatus::*;
        let statuses = [
            Pending,
            Pending,
            Accepted,
            ProofSubmitted,
            Rejected,
            Withdrawn,
            Completed,
        ];
        let counts = ParticipationCounts::tally(statuses.iter());
        assert_eq!(counts.occupying, 5);
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.proof_submitted, 1);
        assert_eq!(counts.active, 2);
    }

    #[test]
    fn test_filter_search_is_case_insensitive() {
        let mut challenge = Challenge::from_draft(
            UserId::new(),
            ChallengeDraft::new("Spring Cleaning Sprint", ChallengeType::SeasonalChallenge),
            Utc::now(),
        );
        challenge.description = "Book three deep cleans".to_string();

        let by_title = ChallengeFilter {
            search: Some("cleaning".to_string()),
            ..Default::default()
        };
        let by_description = ChallengeFilter {
            search: Some("DEEP".to_string()),
            ..Default::default()
        };
        let miss = ChallengeFilter {
            search: Some("yoga".to_string()),
            ..Default::default()
        };
        assert!(by_title.matches(&challenge));
        assert!(by_description.matches(&challenge));
        assert!(!miss.matches(&challenge));
    }

    #[test]
    fn test_filter_active_at_excludes_drafts() {
        let challenge = Challenge::from_draft(
            UserId::new(),
            ChallengeDraft::new("Draft", ChallengeType::SpeedChallenge),
            Utc::now(),
        );
        let filter = ChallengeFilter {
            active_at: Some(Utc::now()),
            ..Default::default()
        };
        assert!(!filter.matches(&challenge));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(StorageError::Database("down".to_string()).is_fatal());
        assert!(!StorageError::VersionConflict("p".to_string()).is_fatal());
        assert!(!StorageError::CapacityReached("c".to_string()).is_fatal());
    }
}
