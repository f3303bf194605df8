//! Challenge catalog
//!
//! Challenges are created as Draft by their owner, published with `activate`
//! and closed with `cancel` or `close`. Only the owner mutates a challenge.

use challenge_market_core::{
    Challenge, ChallengeDraft, ChallengeId, ChallengePatch, ChallengeStatus, ChallengeType, UserId,
};
use challenge_market_storage::{ChallengeFilter, ChallengeStore, StorageError};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

use crate::access::{load_challenge, owned_challenge};
use crate::auth::Principal;
use crate::config::Limits;
use crate::error::{EngineError, Result};
use crate::validation::validate_challenge;
use crate::views::{ChallengeView, OwnerChallengeSummary, ParticipationSummary};

/// Listing parameters
#[derive(Clone, Debug, Default)]
pub struct ChallengeQuery {
    pub challenge_type: Option<ChallengeType>,
    pub search: Option<String>,
    /// Only Active challenges inside their validity window
    pub active_only: bool,
    pub owner: Option<UserId>,
    pub limit: Option<usize>,
    pub offset: usize,
}

pub struct ChallengeCatalog {
    store: Arc<dyn ChallengeStore>,
    limits: Limits,
}

impl ChallengeCatalog {
    pub fn new(store: Arc<dyn ChallengeStore>, limits: Limits) -> Self {
        Self { store, limits }
    }

    pub async fn create(&self, principal: &Principal, draft: ChallengeDraft) -> Result<Challenge> {
        principal.require_entrepreneur()?;

        let challenge = Challenge::from_draft(principal.user_id, draft, Utc::now());
        validate_challenge(&challenge, &self.limits)?;
        self.store.insert_challenge(&challenge).await?;

        info!(
            challenge_id = %challenge.id,
            owner_id = %challenge.owner_id,
            challenge_type = %challenge.challenge_type,
            "Challenge created"
        );
        Ok(challenge)
    }

    /// Publish a Draft challenge; anything but the caller's own draft is NotFound
    pub async fn activate(&self, principal: &Principal, id: ChallengeId) -> Result<Challenge> {
        principal.require_entrepreneur()?;
        let mut challenge = load_challenge(self.store.as_ref(), id).await?;
        if !challenge.is_owned_by(principal.user_id) || challenge.status != ChallengeStatus::Draft {
            return Err(EngineError::not_found("no draft challenge with that id"));
        }
        validate_challenge(&challenge, &self.limits)?;
        self.set_status(&mut challenge, ChallengeStatus::Active).await?;
        Ok(challenge)
    }

    /// Withdraw a Draft or Active challenge for good
    pub async fn cancel(&self, principal: &Principal, id: ChallengeId) -> Result<Challenge> {
        let mut challenge = owned_challenge(self.store.as_ref(), principal, id).await?;
        self.set_status(&mut challenge, ChallengeStatus::Cancelled)
            .await?;
        Ok(challenge)
    }

    /// Stop accepting participants; running participations can still finish
    pub async fn close(&self, principal: &Principal, id: ChallengeId) -> Result<Challenge> {
        let mut challenge = owned_challenge(self.store.as_ref(), principal, id).await?;
        self.set_status(&mut challenge, ChallengeStatus::Completed)
            .await?;
        Ok(challenge)
    }

    async fn set_status(&self, challenge: &mut Challenge, to: ChallengeStatus) -> Result<()> {
        let from = challenge.status;
        if !from.is_valid_transition(to) {
            return Err(EngineError::conflict(format!(
                "cannot move challenge from {} to {}",
                from, to
            )));
        }
        challenge.status = to;
        challenge.updated_at = Utc::now();
        self.store.update_challenge(challenge).await?;

        info!(challenge_id = %challenge.id, from = %from, to = %to, "Challenge status changed");
        Ok(())
    }

    /// Merge the supplied fields into an open challenge
    pub async fn update(
        &self,
        principal: &Principal,
        id: ChallengeId,
        patch: ChallengePatch,
    ) -> Result<Challenge> {
        if patch.is_empty() {
            return Err(EngineError::validation("no fields to update"));
        }
        let mut challenge = owned_challenge(self.store.as_ref(), principal, id).await?;
        if challenge.status.is_closed() {
            return Err(EngineError::conflict("challenge is closed"));
        }

        challenge.apply_patch(patch, Utc::now());
        validate_challenge(&challenge, &self.limits)?;

        self.store
            .update_challenge(&challenge)
            .await
            .map_err(|e| match e {
                StorageError::CapacityReached(_) => EngineError::conflict(
                    "max_participants is below the current number of participants",
                ),
                other => other.into(),
            })?;

        info!(challenge_id = %challenge.id, "Challenge updated");
        Ok(challenge)
    }

    /// Delete a challenge with no active participants, together with its participations
    pub async fn delete(&self, principal: &Principal, id: ChallengeId) -> Result<()> {
        owned_challenge(self.store.as_ref(), principal, id).await?;

        self.store
            .delete_challenge(id)
            .await
            .map_err(|e| match e {
                StorageError::Invariant(_) => {
                    EngineError::conflict("challenge has active participants")
                }
                other => other.into(),
            })?;

        info!(challenge_id = %id, owner_id = %principal.user_id, "Challenge deleted");
        Ok(())
    }

    /// Matching challenges, newest first
    pub async fn list(&self, query: ChallengeQuery) -> Result<Vec<Challenge>> {
        let filter = ChallengeFilter {
            challenge_type: query.challenge_type,
            search: query
                .search
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            active_at: query.active_only.then(Utc::now),
            owner_id: query.owner,
            limit: Some(self.limits.page_size(query.limit)),
            offset: query.offset,
        };

        let challenges = self.store.list_challenges(&filter).await?;
        debug!(count = challenges.len(), "Listed challenges");
        Ok(challenges)
    }

    /// Joinable challenges only
    pub async fn list_active(&self, mut query: ChallengeQuery) -> Result<Vec<Challenge>> {
        query.active_only = true;
        self.list(query).await
    }

    /// One challenge with its participant count and, for a known caller, their participation.
    /// Challenges that are not Active are only visible to their owner.
    pub async fn get(&self, id: ChallengeId, caller: Option<&Principal>) -> Result<ChallengeView> {
        let challenge = load_challenge(self.store.as_ref(), id).await?;
        let is_owner = caller.is_some_and(|p| challenge.is_owned_by(p.user_id));
        if challenge.status != ChallengeStatus::Active && !is_owner {
            return Err(EngineError::not_found(format!("challenge {} not found", id)));
        }

        let counts = self.store.count_participations(id).await?;
        let my_participation = match caller {
            Some(principal) => self
                .store
                .find_participation(id, principal.user_id)
                .await?
                .map(|p| ParticipationSummary::new(&p, &challenge)),
            None => None,
        };

        Ok(ChallengeView {
            participant_count: counts.occupying,
            my_participation,
            challenge,
        })
    }

    /// Owner dashboard: every own challenge with its participation counters
    pub async fn list_own(&self, principal: &Principal) -> Result<Vec<OwnerChallengeSummary>> {
        principal.require_entrepreneur()?;

        let filter = ChallengeFilter {
            owner_id: Some(principal.user_id),
            ..Default::default()
        };
        let challenges = self.store.list_challenges(&filter).await?;

        let mut summaries = Vec::with_capacity(challenges.len());
        for challenge in challenges {
            let counts = self.store.count_participations(challenge.id).await?;
            summaries.push(OwnerChallengeSummary {
                challenge,
                participant_count: counts.occupying,
                pending_count: counts.pending,
                proof_pending_count: counts.proof_submitted,
            });
        }
        Ok(summaries)
    }
}
