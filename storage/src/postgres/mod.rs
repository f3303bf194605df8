//! PostgreSQL store
//!
//! Each compound operation runs in one transaction. Admissions lock the
//! challenge row (`SELECT ... FOR UPDATE`) and re-check joinability and
//! capacity under that lock, so concurrent joins for the same challenge
//! serialize. Other participation writes hold the row `FOR SHARE`, which keeps
//! `delete_challenge` from slipping between its check and its delete.
//! Participation writes compare-and-set on the `version` column.

pub mod challenges;
pub mod participations;
pub mod rewards;

use async_trait::async_trait;
use challenge_market_core::{
    Challenge, ChallengeId, Participation, ParticipationId, RewardGrant, RewardGrantId, UserId,
};
use chrono::{DateTime, Utc};
use tracing::info;

use crate::pg::{PgConfig, PgPool};
use crate::traits::{
    ChallengeFilter, ChallengeStore, ParticipationCounts, ParticipationFilter, Result,
};

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS challenges (
    id UUID PRIMARY KEY,
    owner_id UUID NOT NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    challenge_type TEXT NOT NULL,
    tracking_mode TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'draft',
    target_count BIGINT,
    time_limit_days BIGINT,
    xp_reward BIGINT NOT NULL DEFAULT 0,
    coin_reward BIGINT,
    badge_code TEXT,
    reward_description TEXT,
    bonus_value DOUBLE PRECISION,
    starts_at TIMESTAMPTZ,
    ends_at TIMESTAMPTZ,
    max_participants BIGINT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_challenges_owner ON challenges(owner_id);
CREATE INDEX IF NOT EXISTS idx_challenges_status ON challenges(status);
CREATE INDEX IF NOT EXISTS idx_challenges_created ON challenges(created_at DESC);

CREATE TABLE IF NOT EXISTS participations (
    id UUID PRIMARY KEY,
    challenge_id UUID NOT NULL REFERENCES challenges(id) ON DELETE CASCADE,
    user_id UUID NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    current_progress BIGINT NOT NULL DEFAULT 0,
    user_message TEXT,
    entrepreneur_response TEXT,
    deadline TIMESTAMPTZ,
    reward_awarded BOOLEAN NOT NULL DEFAULT FALSE,
    xp_awarded BIGINT NOT NULL DEFAULT 0,
    coins_awarded BIGINT NOT NULL DEFAULT 0,
    proof_text TEXT,
    proof_image_ref TEXT,
    proof_submitted_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    accepted_at TIMESTAMPTZ,
    started_at TIMESTAMPTZ,
    completed_at TIMESTAMPTZ,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    version BIGINT NOT NULL DEFAULT 1,
    UNIQUE (challenge_id, user_id)
);

CREATE INDEX IF NOT EXISTS idx_participations_user ON participations(user_id);
CREATE INDEX IF NOT EXISTS idx_participations_status ON participations(challenge_id, status);

-- Outbox of rewards owed to the gamification ledger; survives challenge deletion
CREATE TABLE IF NOT EXISTS reward_grants (
    id UUID PRIMARY KEY,
    participation_id UUID NOT NULL UNIQUE,
    challenge_id UUID NOT NULL,
    user_id UUID NOT NULL,
    xp BIGINT NOT NULL,
    coins BIGINT,
    badge_code TEXT,
    bonus_value DOUBLE PRECISION,
    status TEXT NOT NULL DEFAULT 'pending',
    attempts BIGINT NOT NULL DEFAULT 0,
    last_error TEXT,
    claimed_until TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    delivered_at TIMESTAMPTZ
);

ALTER TABLE reward_grants ADD COLUMN IF NOT EXISTS claimed_until TIMESTAMPTZ;

CREATE INDEX IF NOT EXISTS idx_reward_grants_pending ON reward_grants(status, created_at);
"#;

/// Widen a stored BIGINT back to the u32 domain fields; out-of-range values clamp
pub(crate) fn to_u32(value: i64) -> u32 {
    value.clamp(0, i64::from(u32::MAX)) as u32
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build the pool from `config` and bring the schema up to date
    pub async fn connect(config: &PgConfig) -> Result<Self> {
        let store = Self::new(config.create_pool()?);
        store.migrate().await?;
        info!(target_db = %config.target(), pool_size = config.pool_size, "Connected to PostgreSQL");
        Ok(store)
    }

    /// Create tables and indexes if they do not exist yet
    pub async fn migrate(&self) -> Result<()> {
        let client = self.pool.get().await?;
        client.batch_execute(SCHEMA).await?;
        info!("Challenge market schema ready");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ChallengeStore for PgStore {
    async fn insert_challenge(&self, challenge: &Challenge) -> Result<()> {
        challenges::insert_challenge(&self.pool, challenge).await
    }

    async fn get_challenge(&self, id: ChallengeId) -> Result<Option<Challenge>> {
        challenges::get_challenge(&self.pool, id).await
    }

    async fn update_challenge(&self, challenge: &Challenge) -> Result<()> {
        challenges::update_challenge(&self.pool, challenge).await
    }

    async fn delete_challenge(&self, id: ChallengeId) -> Result<()> {
        challenges::delete_challenge(&self.pool, id).await
    }

    async fn list_challenges(&self, filter: &ChallengeFilter) -> Result<Vec<Challenge>> {
        challenges::list_challenges(&self.pool, filter).await
    }

    async fn get_participation(&self, id: ParticipationId) -> Result<Option<Participation>> {
        participations::get_participation(&self.pool, id).await
    }

    async fn find_participation(
        &self,
        challenge_id: ChallengeId,
        user_id: UserId,
    ) -> Result<Option<Participation>> {
        participations::find_participation(&self.pool, challenge_id, user_id).await
    }

    async fn insert_participation(
        &self,
        participation: &Participation,
        admit_at: Option<DateTime<Utc>>,
    ) -> Result<Participation> {
        participations::insert_participation(&self.pool, participation, admit_at).await
    }

    async fn update_participation(
        &self,
        participation: &Participation,
        admit_at: Option<DateTime<Utc>>,
    ) -> Result<Participation> {
        participations::update_participation(&self.pool, participation, admit_at).await
    }

    async fn complete_participation(
        &self,
        participation: &Participation,
        grant: &RewardGrant,
    ) -> Result<Participation> {
        participations::complete_participation(&self.pool, participation, grant).await
    }

    async fn list_participations(
        &self,
        filter: &ParticipationFilter,
    ) -> Result<Vec<Participation>> {
        participations::list_participations(&self.pool, filter).await
    }

    async fn count_participations(&self, challenge_id: ChallengeId) -> Result<ParticipationCounts> {
        participations::count_participations(&self.pool, challenge_id).await
    }

    async fn get_grant(&self, id: RewardGrantId) -> Result<Option<RewardGrant>> {
        rewards::get_grant(&self.pool, id).await
    }

    async fn grant_for_participation(
        &self,
        participation_id: ParticipationId,
    ) -> Result<Option<RewardGrant>> {
        rewards::grant_for_participation(&self.pool, participation_id).await
    }

    async fn pending_grants(
        &self,
        max_attempts: u32,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<RewardGrant>> {
        rewards::pending_grants(&self.pool, max_attempts, limit, now).await
    }

    async fn claim_grant_attempt(
        &self,
        id: RewardGrantId,
        expected_attempts: u32,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool> {
        rewards::claim_grant_attempt(&self.pool, id, expected_attempts, now, lease_until).await
    }

    async fn mark_grant_delivered(&self, id: RewardGrantId, at: DateTime<Utc>) -> Result<()> {
        rewards::mark_grant_delivered(&self.pool, id, at).await
    }

    async fn record_grant_failure(
        &self,
        id: RewardGrantId,
        error: &str,
        abandon: bool,
    ) -> Result<()> {
        rewards::record_grant_failure(&self.pool, id, error, abandon).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_u32_clamps() {
        assert_eq!(to_u32(-3), 0);
        assert_eq!(to_u32(42), 42);
        assert_eq!(to_u32(i64::MAX), u32::MAX);
    }

    #[test]
    fn test_schema_declares_pair_uniqueness() {
        assert!(SCHEMA.contains("UNIQUE (challenge_id, user_id)"));
        assert!(SCHEMA.contains("participation_id UUID NOT NULL UNIQUE"));
        assert!(SCHEMA.contains("ADD COLUMN IF NOT EXISTS claimed_until"));
    }
}
