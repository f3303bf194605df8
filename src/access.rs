//! Loading records together with the caller's right to act on them

use challenge_market_core::{Challenge, ChallengeId, Participation, ParticipationId};
use challenge_market_storage::ChallengeStore;

use crate::auth::Principal;
use crate::error::{EngineError, Result};

pub async fn load_challenge(store: &dyn ChallengeStore, id: ChallengeId) -> Result<Challenge> {
    store
        .get_challenge(id)
        .await?
        .ok_or_else(|| EngineError::not_found(format!("challenge {} not found", id)))
}

pub async fn load_participation(
    store: &dyn ChallengeStore,
    id: ParticipationId,
) -> Result<Participation> {
    store
        .get_participation(id)
        .await?
        .ok_or_else(|| EngineError::not_found(format!("participation {} not found", id)))
}

/// A challenge the caller owns, as an entrepreneur
pub async fn owned_challenge(
    store: &dyn ChallengeStore,
    principal: &Principal,
    id: ChallengeId,
) -> Result<Challenge> {
    principal.require_entrepreneur()?;
    let challenge = load_challenge(store, id).await?;
    if !challenge.is_owned_by(principal.user_id) {
        return Err(EngineError::forbidden("not your challenge"));
    }
    Ok(challenge)
}

/// A participation in one of the caller's challenges, with that challenge
pub async fn participation_for_owner(
    store: &dyn ChallengeStore,
    principal: &Principal,
    id: ParticipationId,
) -> Result<(Participation, Challenge)> {
    principal.require_entrepreneur()?;
    let participation = load_participation(store, id).await?;
    let challenge = load_challenge(store, participation.challenge_id).await?;
    if !challenge.is_owned_by(principal.user_id) {
        return Err(EngineError::forbidden("not your challenge"));
    }
    Ok((participation, challenge))
}

/// The caller's own participation, as a client, with its challenge
pub async fn participation_for_user(
    store: &dyn ChallengeStore,
    principal: &Principal,
    id: ParticipationId,
) -> Result<(Participation, Challenge)> {
    principal.require_client()?;
    let participation = load_participation(store, id).await?;
    if participation.user_id != principal.user_id {
        return Err(EngineError::forbidden("not your participation"));
    }
    let challenge = load_challenge(store, participation.challenge_id).await?;
    Ok((participation, challenge))
}

/// Either side of a participation: its user or the challenge owner
pub async fn participation_for_either(
    store: &dyn ChallengeStore,
    principal: &Principal,
    id: ParticipationId,
) -> Result<(Participation, Challenge)> {
    let participation = load_participation(store, id).await?;
    let challenge = load_challenge(store, participation.challenge_id).await?;
    if participation.user_id != principal.user_id && !challenge.is_owned_by(principal.user_id) {
        return Err(EngineError::forbidden("not your participation"));
    }
    Ok((participation, challenge))
}
