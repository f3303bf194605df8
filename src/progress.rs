//! Progress & proof engine
//!
//! Automatic challenges get a progress count reported by their owner;
//! reaching the target only makes a participation eligible, completion stays
//! an explicit owner action. Manual-proof challenges collect text and/or an
//! image reference from the participant, which the owner approves or sends
//! back. Rejected proof may be resubmitted any number of times.

use challenge_market_core::{ChallengeId, ParticipationId, ParticipationStatus, TrackingMode};
use challenge_market_storage::{ChallengeStore, ParticipationFilter};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::access::{
    load_challenge, owned_challenge, participation_for_either, participation_for_owner,
    participation_for_user,
};
use crate::auth::Principal;
use crate::config::Limits;
use crate::error::{EngineError, Result};
use crate::reward::RewardDispatcher;
use crate::validation::optional_text;
use crate::views::{ParticipationView, ProgressView};

pub struct ProgressEngine {
    store: Arc<dyn ChallengeStore>,
    rewards: Arc<RewardDispatcher>,
    limits: Limits,
}

impl ProgressEngine {
    pub fn new(
        store: Arc<dyn ChallengeStore>,
        rewards: Arc<RewardDispatcher>,
        limits: Limits,
    ) -> Self {
        Self {
            store,
            rewards,
            limits,
        }
    }

    /// Report the participant's current count; the first report moves Accepted to InProgress
    pub async fn update_progress(
        &self,
        principal: &Principal,
        id: ParticipationId,
        value: u32,
    ) -> Result<ParticipationView> {
        let (mut participation, challenge) =
            participation_for_owner(self.store.as_ref(), principal, id).await?;

        let now = Utc::now();
        participation.record_progress(value, now).map_err(|_| {
            EngineError::conflict(format!(
                "progress can only be reported while accepted or in progress (status: {})",
                participation.status
            ))
        })?;
        let stored = self.store.update_participation(&participation, None).await?;

        info!(
            participation_id = %stored.id,
            challenge_id = %stored.challenge_id,
            progress = value,
            target = ?challenge.target_count,
            "Progress updated"
        );
        Ok(ParticipationView::new(stored, &challenge, now))
    }

    /// Live progress, for the participant or the challenge owner
    pub async fn progress_view(
        &self,
        principal: &Principal,
        id: ParticipationId,
    ) -> Result<ProgressView> {
        let (participation, challenge) =
            participation_for_either(self.store.as_ref(), principal, id).await?;
        Ok(ProgressView::new(&participation, &challenge, Utc::now()))
    }

    /// Hand in proof for a manual-proof challenge
    pub async fn submit_proof(
        &self,
        principal: &Principal,
        id: ParticipationId,
        text: Option<String>,
        image_ref: Option<String>,
    ) -> Result<ParticipationView> {
        let text = optional_text("proof text", text, self.limits.max_proof_text_len)?;
        let image_ref = optional_text("image_ref", image_ref, self.limits.max_message_len)?;
        if text.is_none() && image_ref.is_none() {
            return Err(EngineError::validation(
                "proof requires text or an image reference",
            ));
        }

        let (mut participation, challenge) =
            participation_for_user(self.store.as_ref(), principal, id).await?;
        if challenge.tracking_mode != TrackingMode::ManualProof {
            return Err(EngineError::conflict(
                "challenge does not accept proof submissions",
            ));
        }
        match participation.status {
            ParticipationStatus::Accepted | ParticipationStatus::InProgress => {}
            ParticipationStatus::ProofSubmitted => {
                return Err(EngineError::conflict("proof already submitted"))
            }
            _ => return Err(EngineError::conflict("participation is not active")),
        }

        let now = Utc::now();
        participation.submit_proof(text, image_ref, now)?;
        let stored = self.store.update_participation(&participation, None).await?;

        info!(
            participation_id = %stored.id,
            challenge_id = %stored.challenge_id,
            user_id = %stored.user_id,
            "Proof submitted"
        );
        Ok(ParticipationView::new(stored, &challenge, now))
    }

    /// Approve proof (completes and rewards) or send it back to the participant
    pub async fn verify_proof(
        &self,
        principal: &Principal,
        id: ParticipationId,
        approve: bool,
        response: Option<String>,
    ) -> Result<ParticipationView> {
        let response = optional_text("response", response, self.limits.max_message_len)?;
        let (mut participation, challenge) =
            participation_for_owner(self.store.as_ref(), principal, id).await?;
        if participation.status != ParticipationStatus::ProofSubmitted {
            return Err(EngineError::conflict("no proof awaiting verification"));
        }

        if approve {
            let stored = self
                .rewards
                .complete(participation, &challenge, response)
                .await?;
            return Ok(ParticipationView::new(stored, &challenge, Utc::now()));
        }

        let now = Utc::now();
        participation.reject_proof(response, now)?;
        let stored = self.store.update_participation(&participation, None).await?;

        info!(
            participation_id = %stored.id,
            challenge_id = %stored.challenge_id,
            status = %stored.status,
            "Proof sent back"
        );
        Ok(ParticipationView::new(stored, &challenge, now))
    }

    /// Proof awaiting review across the owner's challenges, oldest submission first
    pub async fn list_pending_proofs(
        &self,
        principal: &Principal,
        challenge_id: Option<ChallengeId>,
    ) -> Result<Vec<ParticipationView>> {
        principal.require_entrepreneur()?;
        if let Some(id) = challenge_id {
            owned_challenge(self.store.as_ref(), principal, id).await?;
        }

        let filter = ParticipationFilter {
            challenge_id,
            status: Some(ParticipationStatus::ProofSubmitted),
            challenge_owner: Some(principal.user_id),
            ..Default::default()
        };
        let mut pending = self.store.list_participations(&filter).await?;
        pending.sort_by_key(|p| p.proof_submitted_at);

        let now = Utc::now();
        let mut challenges = HashMap::new();
        let mut views = Vec::with_capacity(pending.len());
        for participation in pending {
            if !challenges.contains_key(&participation.challenge_id) {
                let challenge =
                    load_challenge(self.store.as_ref(), participation.challenge_id).await?;
                challenges.insert(challenge.id, challenge);
            }
            let challenge = &challenges[&participation.challenge_id];
            views.push(ParticipationView::new(participation, challenge, now));
        }
        Ok(views)
    }
}
