use challenge_market_core::{
    ChallengeId, GrantStatus, ParticipationId, RewardGrant, RewardGrantId, RewardInstruction,
    UserId,
};
use chrono::{DateTime, Utc};
use deadpool_postgres::Transaction;
use tokio_postgres::error::SqlState;
use tokio_postgres::Row;
use tracing::warn;
use uuid::Uuid;

use super::to_u32;
use crate::pg::PgPool;
use crate::{Result, StorageError};

const COLUMNS: &str = "id, participation_id, challenge_id, user_id, xp, coins, badge_code,
    bonus_value, status, attempts, last_error, claimed_until, created_at, delivered_at";

fn grant_from_row(row: &Row) -> Result<RewardGrant> {
    let id: Uuid = row.get("id");
    let participation_id: Uuid = row.get("participation_id");
    let challenge_id: Uuid = row.get("challenge_id");
    let user_id: Uuid = row.get("user_id");
    let status: String = row.get("status");

    Ok(RewardGrant {
        id: RewardGrantId(id),
        participation_id: ParticipationId(participation_id),
        challenge_id: ChallengeId(challenge_id),
        user_id: UserId(user_id),
        instruction: RewardInstruction {
            xp: to_u32(row.get("xp")),
            coins: row.get::<_, Option<i64>>("coins").map(to_u32),
            badge_code: row.get("badge_code"),
            bonus_value: row.get("bonus_value"),
        },
        status: status.parse::<GrantStatus>()?,
        attempts: to_u32(row.get("attempts")),
        last_error: row.get("last_error"),
        claimed_until: row.get("claimed_until"),
        created_at: row.get("created_at"),
        delivered_at: row.get("delivered_at"),
    })
}

/// Insert the outbox row inside the transaction that completes its participation
pub(crate) async fn insert_grant(tx: &Transaction<'_>, grant: &RewardGrant) -> Result<()> {
    let result = tx
        .execute(
            "INSERT INTO reward_grants (id, participation_id, challenge_id, user_id, xp, coins,
                badge_code, bonus_value, status, attempts, last_error, claimed_until, created_at,
                delivered_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
            &[
                &grant.id.0,
                &grant.participation_id.0,
                &grant.challenge_id.0,
                &grant.user_id.0,
                &i64::from(grant.instruction.xp),
                &grant.instruction.coins.map(i64::from),
                &grant.instruction.badge_code,
                &grant.instruction.bonus_value,
                &grant.status.as_str(),
                &i64::from(grant.attempts),
                &grant.last_error,
                &grant.claimed_until,
                &grant.created_at,
                &grant.delivered_at,
            ],
        )
        .await;

    match result {
        Ok(_) => Ok(()),
        Err(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION) => {
            Err(StorageError::Invariant(format!(
                "participation {} already has a reward grant",
                grant.participation_id
            )))
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn get_grant(pool: &PgPool, id: RewardGrantId) -> Result<Option<RewardGrant>> {
    let client = pool.get().await?;

    let row = client
        .query_opt(
            &format!("SELECT {} FROM reward_grants WHERE id = $1", COLUMNS),
            &[&id.0],
        )
        .await?;

    row.as_ref().map(grant_from_row).transpose()
}

pub async fn grant_for_participation(
    pool: &PgPool,
    participation_id: ParticipationId,
) -> Result<Option<RewardGrant>> {
    let client = pool.get().await?;

    let row = client
        .query_opt(
            &format!(
                "SELECT {} FROM reward_grants WHERE participation_id = $1",
                COLUMNS
            ),
            &[&participation_id.0],
        )
        .await?;

    row.as_ref().map(grant_from_row).transpose()
}

pub async fn pending_grants(
    pool: &PgPool,
    max_attempts: u32,
    limit: usize,
    now: DateTime<Utc>,
) -> Result<Vec<RewardGrant>> {
    let client = pool.get().await?;

    let rows = client
        .query(
            &format!(
                "SELECT {} FROM reward_grants
                 WHERE status = 'pending' AND attempts < $1
                   AND (claimed_until IS NULL OR claimed_until <= $3)
                 ORDER BY created_at ASC
                 LIMIT $2",
                COLUMNS
            ),
            &[&i64::from(max_attempts), &(limit as i64), &now],
        )
        .await?;

    rows.iter().map(grant_from_row).collect()
}

pub async fn claim_grant_attempt(
    pool: &PgPool,
    id: RewardGrantId,
    expected_attempts: u32,
    now: DateTime<Utc>,
    lease_until: DateTime<Utc>,
) -> Result<bool> {
    let client = pool.get().await?;

    let claimed = client
        .execute(
            "UPDATE reward_grants SET attempts = attempts + 1, claimed_until = $4
             WHERE id = $1 AND attempts = $2 AND status = 'pending'
               AND (claimed_until IS NULL OR claimed_until <= $3)",
            &[&id.0, &i64::from(expected_attempts), &now, &lease_until],
        )
        .await?;

    Ok(claimed == 1)
}

pub async fn mark_grant_delivered(
    pool: &PgPool,
    id: RewardGrantId,
    at: DateTime<Utc>,
) -> Result<()> {
    let client = pool.get().await?;

    let updated = client
        .execute(
            "UPDATE reward_grants SET status = 'delivered', delivered_at = $2, last_error = NULL,
                claimed_until = NULL
             WHERE id = $1",
            &[&id.0, &at],
        )
        .await?;

    if updated == 0 {
        return Err(StorageError::NotFound(format!("reward grant {}", id)));
    }
    Ok(())
}

pub async fn record_grant_failure(
    pool: &PgPool,
    id: RewardGrantId,
    error: &str,
    abandon: bool,
) -> Result<()> {
    let client = pool.get().await?;

    let updated = client
        .execute(
            "UPDATE reward_grants
             SET last_error = $2,
                 claimed_until = NULL,
                 status = CASE WHEN $3 THEN 'abandoned' ELSE status END
             WHERE id = $1 AND status = 'pending'",
            &[&id.0, &error, &abandon],
        )
        .await?;

    if updated == 0 {
        warn!(grant_id = %id, "Reward grant failure recorded against a settled grant");
    }
    Ok(())
}
