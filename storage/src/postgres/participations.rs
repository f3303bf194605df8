use challenge_market_core::{ChallengeId, Participation, ParticipationId, RewardGrant, UserId};
use chrono::{DateTime, Utc};
use deadpool_postgres::Transaction;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;
use uuid::Uuid;

use super::{rewards, to_u32};
use crate::pg::PgPool;
use crate::traits::{ParticipationCounts, ParticipationFilter};
use crate::{Result, StorageError};

const COLUMNS: &str = "p.id, p.challenge_id, p.user_id, p.status, p.current_progress,
    p.user_message, p.entrepreneur_response, p.deadline, p.reward_awarded, p.xp_awarded,
    p.coins_awarded, p.proof_text, p.proof_image_ref, p.proof_submitted_at, p.created_at,
    p.accepted_at, p.started_at, p.completed_at, p.updated_at, p.version";

fn participation_from_row(row: &Row) -> Result<Participation> {
    let id: Uuid = row.get("id");
    let challenge_id: Uuid = row.get("challenge_id");
    let user_id: Uuid = row.get("user_id");
    let status: String = row.get("status");
    let version: i64 = row.get("version");

    Ok(Participation {
        id: ParticipationId(id),
        challenge_id: ChallengeId(challenge_id),
        user_id: UserId(user_id),
        status: status.parse()?,
        current_progress: to_u32(row.get("current_progress")),
        user_message: row.get("user_message"),
        entrepreneur_response: row.get("entrepreneur_response"),
        deadline: row.get("deadline"),
        reward_awarded: row.get("reward_awarded"),
        xp_awarded: to_u32(row.get("xp_awarded")),
        coins_awarded: to_u32(row.get("coins_awarded")),
        proof_text: row.get("proof_text"),
        proof_image_ref: row.get("proof_image_ref"),
        proof_submitted_at: row.get("proof_submitted_at"),
        created_at: row.get("created_at"),
        accepted_at: row.get("accepted_at"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        updated_at: row.get("updated_at"),
        version: version.max(0) as u64,
    })
}

fn version_conflict(participation: &Participation) -> StorageError {
    StorageError::VersionConflict(format!(
        "participation {} is no longer at version {}",
        participation.id, participation.version
    ))
}

pub async fn get_participation(pool: &PgPool, id: ParticipationId) -> Result<Option<Participation>> {
    let client = pool.get().await?;

    let row = client
        .query_opt(
            &format!("SELECT {} FROM participations p WHERE p.id = $1", COLUMNS),
            &[&id.0],
        )
        .await?;

    row.as_ref().map(participation_from_row).transpose()
}

pub async fn find_participation(
    pool: &PgPool,
    challenge_id: ChallengeId,
    user_id: UserId,
) -> Result<Option<Participation>> {
    let client = pool.get().await?;

    let row = client
        .query_opt(
            &format!(
                "SELECT {} FROM participations p WHERE p.challenge_id = $1 AND p.user_id = $2",
                COLUMNS
            ),
            &[&challenge_id.0, &user_id.0],
        )
        .await?;

    row.as_ref().map(participation_from_row).transpose()
}

/// Hold the challenge row against `delete_challenge` for the rest of the transaction
async fn share_challenge(tx: &Transaction<'_>, challenge_id: ChallengeId) -> Result<()> {
    tx.query_opt(
        "SELECT id FROM challenges WHERE id = $1 FOR SHARE",
        &[&challenge_id.0],
    )
    .await?;
    Ok(())
}

/// Lock the challenge row, then check it is joinable at `at` and has room.
///
/// Admissions for one challenge serialize on the row lock, and a concurrent
/// status or window change either commits before the check or waits for it.
async fn admit(
    tx: &Transaction<'_>,
    participation: &Participation,
    except: Option<ParticipationId>,
    at: DateTime<Utc>,
) -> Result<()> {
    let challenge_id = participation.challenge_id;
    let row = tx
        .query_opt(
            "SELECT status = 'active'
                    AND (starts_at IS NULL OR starts_at <= $2)
                    AND (ends_at IS NULL OR ends_at >= $2) AS open,
                    max_participants
             FROM challenges WHERE id = $1 FOR UPDATE",
            &[&challenge_id.0, &at],
        )
        .await?
        .ok_or_else(|| StorageError::NotFound(format!("challenge {}", challenge_id)))?;

    let open: bool = row.get("open");
    if !open {
        return Err(StorageError::Closed(format!(
            "challenge {} is not open for participation",
            challenge_id
        )));
    }
    let max: Option<i64> = row.get("max_participants");
    if let Some(max) = max {
        if occupying_except(tx, challenge_id, except).await? >= max {
            return Err(StorageError::CapacityReached(format!(
                "challenge {} is full",
                challenge_id
            )));
        }
    }
    Ok(())
}

async fn occupying_except(
    tx: &Transaction<'_>,
    challenge_id: ChallengeId,
    except: Option<ParticipationId>,
) -> Result<i64> {
    let except_uuid = except.map(|id| id.0);
    let row = tx
        .query_one(
            "SELECT COUNT(*) AS occupying FROM participations
             WHERE challenge_id = $1
               AND status NOT IN ('rejected', 'withdrawn')
               AND ($2::uuid IS NULL OR id <> $2)",
            &[&challenge_id.0, &except_uuid],
        )
        .await?;
    Ok(row.get("occupying"))
}

pub async fn insert_participation(
    pool: &PgPool,
    participation: &Participation,
    admit_at: Option<DateTime<Utc>>,
) -> Result<Participation> {
    let mut client = pool.get().await?;
    let tx = client.transaction().await?;

    let locked = tx
        .query_opt(
            "SELECT id FROM challenges WHERE id = $1 FOR UPDATE",
            &[&participation.challenge_id.0],
        )
        .await?;
    if locked.is_none() {
        return Err(StorageError::NotFound(format!(
            "challenge {}",
            participation.challenge_id
        )));
    }

    let existing = tx
        .query_opt(
            "SELECT id FROM participations WHERE challenge_id = $1 AND user_id = $2",
            &[&participation.challenge_id.0, &participation.user_id.0],
        )
        .await?;
    if existing.is_some() {
        return Err(StorageError::Duplicate(format!(
            "user {} already participates in challenge {}",
            participation.user_id, participation.challenge_id
        )));
    }

    if let Some(at) = admit_at {
        admit(&tx, participation, None, at).await?;
    }

    let result = tx
        .query_one(
            &format!(
                "INSERT INTO participations AS p (id, challenge_id, user_id, status,
                    current_progress, user_message, entrepreneur_response, deadline,
                    reward_awarded, xp_awarded, coins_awarded, proof_text, proof_image_ref,
                    proof_submitted_at, created_at, accepted_at, started_at, completed_at,
                    updated_at, version)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    $16, $17, $18, $19, 1)
                 RETURNING {}",
                COLUMNS
            ),
            &[
                &participation.id.0,
                &participation.challenge_id.0,
                &participation.user_id.0,
                &participation.status.as_str(),
                &i64::from(participation.current_progress),
                &participation.user_message,
                &participation.entrepreneur_response,
                &participation.deadline,
                &participation.reward_awarded,
                &i64::from(participation.xp_awarded),
                &i64::from(participation.coins_awarded),
                &participation.proof_text,
                &participation.proof_image_ref,
                &participation.proof_submitted_at,
                &participation.created_at,
                &participation.accepted_at,
                &participation.started_at,
                &participation.completed_at,
                &participation.updated_at,
            ],
        )
        .await;

    let row = match result {
        Ok(row) => row,
        Err(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION) => {
            return Err(StorageError::Duplicate(format!(
                "user {} already participates in challenge {}",
                participation.user_id, participation.challenge_id
            )));
        }
        Err(e) => return Err(e.into()),
    };
    let stored = participation_from_row(&row)?;

    tx.commit().await?;
    Ok(stored)
}

/// `UPDATE ... WHERE version = expected`; `None` when the guard did not match
async fn write_versioned(
    tx: &Transaction<'_>,
    participation: &Participation,
    require_unrewarded: bool,
) -> Result<Option<Participation>> {
    let expected = participation.version as i64;
    let row = tx
        .query_opt(
            &format!(
                "UPDATE participations AS p SET status = $3, current_progress = $4,
                    user_message = $5, entrepreneur_response = $6, deadline = $7,
                    reward_awarded = $8, xp_awarded = $9, coins_awarded = $10,
                    proof_text = $11, proof_image_ref = $12, proof_submitted_at = $13,
                    accepted_at = $14, started_at = $15, completed_at = $16, updated_at = $17,
                    version = p.version + 1
                 WHERE p.id = $1 AND p.version = $2 AND (NOT $18 OR p.reward_awarded = FALSE)
                 RETURNING {}",
                COLUMNS
            ),
            &[
                &participation.id.0,
                &expected,
                &participation.status.as_str(),
                &i64::from(participation.current_progress),
                &participation.user_message,
                &participation.entrepreneur_response,
                &participation.deadline,
                &participation.reward_awarded,
                &i64::from(participation.xp_awarded),
                &i64::from(participation.coins_awarded),
                &participation.proof_text,
                &participation.proof_image_ref,
                &participation.proof_submitted_at,
                &participation.accepted_at,
                &participation.started_at,
                &participation.completed_at,
                &participation.updated_at,
                &require_unrewarded,
            ],
        )
        .await?;

    row.as_ref().map(participation_from_row).transpose()
}

/// Explain why a versioned write matched nothing
async fn missed_write(tx: &Transaction<'_>, participation: &Participation) -> StorageError {
    let current = tx
        .query_opt(
            "SELECT version, reward_awarded FROM participations WHERE id = $1",
            &[&participation.id.0],
        )
        .await;
    match current {
        Ok(None) => StorageError::NotFound(format!("participation {}", participation.id)),
        Ok(Some(row)) => {
            let version: i64 = row.get("version");
            let rewarded: bool = row.get("reward_awarded");
            if version == participation.version as i64 && rewarded {
                StorageError::Invariant(format!(
                    "participation {} was already rewarded",
                    participation.id
                ))
            } else {
                version_conflict(participation)
            }
        }
        Err(e) => e.into(),
    }
}

pub async fn update_participation(
    pool: &PgPool,
    participation: &Participation,
    admit_at: Option<DateTime<Utc>>,
) -> Result<Participation> {
    let mut client = pool.get().await?;
    let tx = client.transaction().await?;

    match admit_at {
        Some(at) => admit(&tx, participation, Some(participation.id), at).await?,
        None => share_challenge(&tx, participation.challenge_id).await?,
    }

    let stored = match write_versioned(&tx, participation, false).await? {
        Some(stored) => stored,
        None => return Err(missed_write(&tx, participation).await),
    };

    tx.commit().await?;
    Ok(stored)
}

pub async fn complete_participation(
    pool: &PgPool,
    participation: &Participation,
    grant: &RewardGrant,
) -> Result<Participation> {
    let mut client = pool.get().await?;
    let tx = client.transaction().await?;

    share_challenge(&tx, participation.challenge_id).await?;
    let stored = match write_versioned(&tx, participation, true).await? {
        Some(stored) => stored,
        None => return Err(missed_write(&tx, participation).await),
    };
    rewards::insert_grant(&tx, grant).await?;

    tx.commit().await?;
    Ok(stored)
}

pub async fn list_participations(
    pool: &PgPool,
    filter: &ParticipationFilter,
) -> Result<Vec<Participation>> {
    let client = pool.get().await?;

    let mut conditions: Vec<String> = Vec::new();
    let mut params: Vec<Box<dyn ToSql + Sync + Send>> = Vec::new();

    if let Some(challenge_id) = filter.challenge_id {
        params.push(Box::new(challenge_id.0));
        conditions.push(format!("p.challenge_id = ${}", params.len()));
    }
    if let Some(user_id) = filter.user_id {
        params.push(Box::new(user_id.0));
        conditions.push(format!("p.user_id = ${}", params.len()));
    }
    if let Some(status) = filter.status {
        params.push(Box::new(status.as_str()));
        conditions.push(format!("p.status = ${}", params.len()));
    }
    if let Some(owner) = filter.challenge_owner {
        params.push(Box::new(owner.0));
        conditions.push(format!("c.owner_id = ${}", params.len()));
    }

    let mut sql = format!(
        "SELECT {} FROM participations p JOIN challenges c ON c.id = p.challenge_id",
        COLUMNS
    );
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    sql.push_str(" ORDER BY p.created_at DESC");

    let refs: Vec<&(dyn ToSql + Sync)> = params
        .iter()
        .map(|p| p.as_ref() as &(dyn ToSql + Sync))
        .collect();
    let rows = client.query(&sql, &refs).await?;

    rows.iter().map(participation_from_row).collect()
}

pub async fn count_participations(
    pool: &PgPool,
    challenge_id: ChallengeId,
) -> Result<ParticipationCounts> {
    let client = pool.get().await?;

    let rows = client
        .query(
            "SELECT status, COUNT(*) AS n FROM participations
             WHERE challenge_id = $1 GROUP BY status",
            &[&challenge_id.0],
        )
        .await?;

    let mut counts = ParticipationCounts::default();
    for row in &rows {
        let status: String = row.get("status");
        let n: i64 = row.get("n");
        counts.add(status.parse()?, to_u32(n));
    }
    Ok(counts)
}
