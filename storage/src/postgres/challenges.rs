use challenge_market_core::{Challenge, ChallengeId, UserId};
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;
use tracing::debug;
use uuid::Uuid;

use super::to_u32;
use crate::pg::PgPool;
use crate::traits::ChallengeFilter;
use crate::{Result, StorageError};

const COLUMNS: &str = "id, owner_id, title, description, challenge_type, tracking_mode, status,
    target_count, time_limit_days, xp_reward, coin_reward, badge_code, reward_description,
    bonus_value, starts_at, ends_at, max_participants, created_at, updated_at";

fn opt_i64(value: Option<u32>) -> Option<i64> {
    value.map(i64::from)
}

fn challenge_from_row(row: &Row) -> Result<Challenge> {
    let challenge_type: String = row.get("challenge_type");
    let tracking_mode: String = row.get("tracking_mode");
    let status: String = row.get("status");
    let owner: Uuid = row.get("owner_id");
    let id: Uuid = row.get("id");

    Ok(Challenge {
        id: ChallengeId(id),
        owner_id: UserId(owner),
        title: row.get("title"),
        description: row.get("description"),
        challenge_type: challenge_type.parse()?,
        tracking_mode: tracking_mode.parse()?,
        status: status.parse()?,
        target_count: row.get::<_, Option<i64>>("target_count").map(to_u32),
        time_limit_days: row.get::<_, Option<i64>>("time_limit_days").map(to_u32),
        xp_reward: to_u32(row.get("xp_reward")),
        coin_reward: row.get::<_, Option<i64>>("coin_reward").map(to_u32),
        badge_code: row.get("badge_code"),
        reward_description: row.get("reward_description"),
        bonus_value: row.get("bonus_value"),
        starts_at: row.get("starts_at"),
        ends_at: row.get("ends_at"),
        max_participants: row.get::<_, Option<i64>>("max_participants").map(to_u32),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

pub async fn insert_challenge(pool: &PgPool, challenge: &Challenge) -> Result<()> {
    let client = pool.get().await?;

    client
        .execute(
            "INSERT INTO challenges (id, owner_id, title, description, challenge_type, tracking_mode,
                status, target_count, time_limit_days, xp_reward, coin_reward, badge_code,
                reward_description, bonus_value, starts_at, ends_at, max_participants,
                created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)",
            &[
                &challenge.id.0,
                &challenge.owner_id.0,
                &challenge.title,
                &challenge.description,
                &challenge.challenge_type.as_str(),
                &challenge.tracking_mode.as_str(),
                &challenge.status.as_str(),
                &opt_i64(challenge.target_count),
                &opt_i64(challenge.time_limit_days),
                &i64::from(challenge.xp_reward),
                &opt_i64(challenge.coin_reward),
                &challenge.badge_code,
                &challenge.reward_description,
                &challenge.bonus_value,
                &challenge.starts_at,
                &challenge.ends_at,
                &opt_i64(challenge.max_participants),
                &challenge.created_at,
                &challenge.updated_at,
            ],
        )
        .await?;

    Ok(())
}

pub async fn get_challenge(pool: &PgPool, id: ChallengeId) -> Result<Option<Challenge>> {
    let client = pool.get().await?;

    let row = client
        .query_opt(
            &format!("SELECT {} FROM challenges WHERE id = $1", COLUMNS),
            &[&id.0],
        )
        .await?;

    row.as_ref().map(challenge_from_row).transpose()
}

pub async fn update_challenge(pool: &PgPool, challenge: &Challenge) -> Result<()> {
    let mut client = pool.get().await?;
    let tx = client.transaction().await?;

    let locked = tx
        .query_opt(
            "SELECT id FROM challenges WHERE id = $1 FOR UPDATE",
            &[&challenge.id.0],
        )
        .await?;
    if locked.is_none() {
        return Err(StorageError::NotFound(format!("challenge {}", challenge.id)));
    }

    if let Some(max) = challenge.max_participants {
        let row = tx
            .query_one(
                "SELECT COUNT(*) AS occupying FROM participations
                 WHERE challenge_id = $1 AND status NOT IN ('rejected', 'withdrawn')",
                &[&challenge.id.0],
            )
            .await?;
        let occupying: i64 = row.get("occupying");
        if occupying > i64::from(max) {
            return Err(StorageError::CapacityReached(format!(
                "challenge {} already has {} participants",
                challenge.id, occupying
            )));
        }
    }

    tx.execute(
        "UPDATE challenges SET title = $2, description = $3, challenge_type = $4,
            tracking_mode = $5, status = $6, target_count = $7, time_limit_days = $8,
            xp_reward = $9, coin_reward = $10, badge_code = $11, reward_description = $12,
            bonus_value = $13, starts_at = $14, ends_at = $15, max_participants = $16,
            updated_at = $17
         WHERE id = $1",
        &[
            &challenge.id.0,
            &challenge.title,
            &challenge.description,
            &challenge.challenge_type.as_str(),
            &challenge.tracking_mode.as_str(),
            &challenge.status.as_str(),
            &opt_i64(challenge.target_count),
            &opt_i64(challenge.time_limit_days),
            &i64::from(challenge.xp_reward),
            &opt_i64(challenge.coin_reward),
            &challenge.badge_code,
            &challenge.reward_description,
            &challenge.bonus_value,
            &challenge.starts_at,
            &challenge.ends_at,
            &opt_i64(challenge.max_participants),
            &challenge.updated_at,
        ],
    )
    .await?;

    tx.commit().await?;
    Ok(())
}

pub async fn delete_challenge(pool: &PgPool, id: ChallengeId) -> Result<()> {
    let mut client = pool.get().await?;
    let tx = client.transaction().await?;

    let locked = tx
        .query_opt("SELECT id FROM challenges WHERE id = $1 FOR UPDATE", &[&id.0])
        .await?;
    if locked.is_none() {
        return Err(StorageError::NotFound(format!("challenge {}", id)));
    }

    let row = tx
        .query_one(
            "SELECT EXISTS (
                SELECT 1 FROM participations
                WHERE challenge_id = $1 AND status IN ('accepted', 'in_progress', 'proof_submitted')
             ) AS has_active",
            &[&id.0],
        )
        .await?;
    let has_active: bool = row.get("has_active");
    if has_active {
        return Err(StorageError::Invariant(format!(
            "challenge {} has active participants",
            id
        )));
    }

    tx.execute("DELETE FROM challenges WHERE id = $1", &[&id.0])
        .await?;
    tx.commit().await?;

    debug!(challenge_id = %id, "Deleted challenge");
    Ok(())
}

/// `%term%` with LIKE metacharacters escaped
fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

pub async fn list_challenges(pool: &PgPool, filter: &ChallengeFilter) -> Result<Vec<Challenge>> {
    let client = pool.get().await?;

    let mut conditions: Vec<String> = Vec::new();
    let mut params: Vec<Box<dyn ToSql + Sync + Send>> = Vec::new();

    if let Some(t) = filter.challenge_type {
        params.push(Box::new(t.as_str()));
        conditions.push(format!("challenge_type = ${}", params.len()));
    }
    if let Some(owner) = filter.owner_id {
        params.push(Box::new(owner.0));
        conditions.push(format!("owner_id = ${}", params.len()));
    }
    if let Some(now) = filter.active_at {
        params.push(Box::new(now));
        let n = params.len();
        conditions.push(format!(
            "status = 'active' AND (starts_at IS NULL OR starts_at <= ${n}) AND (ends_at IS NULL OR ends_at >= ${n})"
        ));
    }
    if let Some(search) = filter.search.as_deref() {
        params.push(Box::new(like_pattern(search)));
        let n = params.len();
        conditions.push(format!("(title ILIKE ${n} OR description ILIKE ${n})"));
    }

    let mut sql = format!("SELECT {} FROM challenges", COLUMNS);
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    sql.push_str(" ORDER BY created_at DESC");

    if let Some(limit) = filter.limit {
        params.push(Box::new(limit as i64));
        sql.push_str(&format!(" LIMIT ${}", params.len()));
    }
    params.push(Box::new(filter.offset as i64));
    sql.push_str(&format!(" OFFSET ${}", params.len()));

    let refs: Vec<&(dyn ToSql + Sync)> = params
        .iter()
        .map(|p| p.as_ref() as &(dyn ToSql + Sync))
        .collect();
    let rows = client.query(&sql, &refs).await?;

    rows.iter().map(challenge_from_row).collect()
}
