//! Challenge lifecycle façade
//!
//! Single entry point for everything a client or entrepreneur does with a
//! participation. Each operation checks the caller's role and ownership,
//! loads what it needs, validates the transition against the participation
//! state machine and writes the result with a version check. Nothing is
//! written when validation fails.

use challenge_market_core::{
    ChallengeId, Participation, ParticipationId, ParticipationStatus, UserId,
};
use challenge_market_storage::{ChallengeStore, ParticipationFilter};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::access::{
    load_challenge, owned_challenge, participation_for_owner, participation_for_user,
};
use crate::auth::Principal;
use crate::challenges::ChallengeCatalog;
use crate::config::{EngineConfig, Limits};
use crate::error::{EngineError, Result, NOT_OPEN_FOR_PARTICIPATION};
use crate::ledger::{GamificationLedger, HttpLedger, NoopLedger};
use crate::progress::ProgressEngine;
use crate::reward::RewardDispatcher;
use crate::validation::optional_text;
use crate::views::{ParticipationView, ProgressView};

pub struct ChallengeService {
    store: Arc<dyn ChallengeStore>,
    catalog: ChallengeCatalog,
    progress: ProgressEngine,
    rewards: Arc<RewardDispatcher>,
    limits: Limits,
}

impl ChallengeService {
    pub fn new(
        store: Arc<dyn ChallengeStore>,
        ledger: Arc<dyn GamificationLedger>,
        config: &EngineConfig,
    ) -> Self {
        let rewards = Arc::new(RewardDispatcher::new(store.clone(), ledger, &config.rewards));

        Self {
            catalog: ChallengeCatalog::new(store.clone(), config.limits.clone()),
            progress: ProgressEngine::new(store.clone(), rewards.clone(), config.limits.clone()),
            rewards,
            limits: config.limits.clone(),
            store,
        }
    }

    /// Build the service with the ledger named in the config, or the no-op ledger
    pub fn from_config(store: Arc<dyn ChallengeStore>, config: &EngineConfig) -> Result<Self> {
        let ledger: Arc<dyn GamificationLedger> = match config.ledger.base_url.as_deref() {
            Some(url) => {
                info!(ledger_url = %url, "Using HTTP gamification ledger");
                Arc::new(HttpLedger::from_config(&config.ledger, url)?)
            }
            None => {
                info!("No gamification ledger configured, rewards will not leave the engine");
                Arc::new(NoopLedger)
            }
        };
        Ok(Self::new(store, ledger, config))
    }

    pub fn catalog(&self) -> &ChallengeCatalog {
        &self.catalog
    }

    pub fn rewards(&self) -> Arc<RewardDispatcher> {
        self.rewards.clone()
    }

    // ==================== Client ====================

    /// Join an open challenge, or re-join after a rejection or withdrawal
    pub async fn join(
        &self,
        principal: &Principal,
        challenge_id: ChallengeId,
        message: Option<String>,
    ) -> Result<ParticipationView> {
        principal.require_client()?;
        let message = optional_text("message", message, self.limits.max_message_len)?;

        let now = Utc::now();
        let challenge = load_challenge(self.store.as_ref(), challenge_id).await?;
        if !challenge.is_joinable(now) {
            return Err(EngineError::not_found(NOT_OPEN_FOR_PARTICIPATION));
        }

        let existing = self
            .store
            .find_participation(challenge_id, principal.user_id)
            .await?;

        let stored = match existing {
            Some(mut participation) => {
                if !participation.status.is_reenterable() {
                    return Err(EngineError::conflict(
                        "already participating in this challenge",
                    ));
                }
                participation.rejoin(message, now)?;
                let stored = self
                    .store
                    .update_participation(&participation, Some(now))
                    .await?;
                info!(
                    participation_id = %stored.id,
                    challenge_id = %challenge_id,
                    user_id = %principal.user_id,
                    "Participant re-joined"
                );
                stored
            }
            None => {
                let participation =
                    Participation::new(challenge_id, principal.user_id, message, now);
                let stored = self
                    .store
                    .insert_participation(&participation, Some(now))
                    .await?;
                info!(
                    participation_id = %stored.id,
                    challenge_id = %challenge_id,
                    user_id = %principal.user_id,
                    "Participant joined"
                );
                stored
            }
        };

        Ok(ParticipationView::new(stored, &challenge, now))
    }

    pub async fn withdraw(
        &self,
        principal: &Principal,
        id: ParticipationId,
    ) -> Result<ParticipationView> {
        let (mut participation, challenge) =
            participation_for_user(self.store.as_ref(), principal, id).await?;
        if participation.status.is_terminal() {
            return Err(EngineError::conflict(format!(
                "participation is already {}",
                participation.status
            )));
        }

        let now = Utc::now();
        participation.withdraw(now)?;
        let stored = self.store.update_participation(&participation, None).await?;

        info!(
            participation_id = %stored.id,
            challenge_id = %stored.challenge_id,
            user_id = %stored.user_id,
            "Participant withdrew"
        );
        Ok(ParticipationView::new(stored, &challenge, now))
    }

    /// The caller's participations, newest first
    pub async fn list_my_participations(
        &self,
        principal: &Principal,
    ) -> Result<Vec<ParticipationView>> {
        principal.require_client()?;
        let filter = ParticipationFilter {
            user_id: Some(principal.user_id),
            ..Default::default()
        };
        let participations = self.store.list_participations(&filter).await?;
        debug!(user_id = %principal.user_id, count = participations.len(), "Listed participations");
        self.with_challenges(participations).await
    }

    pub async fn submit_proof(
        &self,
        principal: &Principal,
        id: ParticipationId,
        text: Option<String>,
        image_ref: Option<String>,
    ) -> Result<ParticipationView> {
        self.progress
            .submit_proof(principal, id, text, image_ref)
            .await
    }

    /// Live progress, for the participant or the challenge owner
    pub async fn progress_view(
        &self,
        principal: &Principal,
        id: ParticipationId,
    ) -> Result<ProgressView> {
        self.progress.progress_view(principal, id).await
    }

    // ==================== Entrepreneur ====================

    /// Accept or reject a Pending participation
    pub async fn respond(
        &self,
        principal: &Principal,
        id: ParticipationId,
        accept: bool,
        response: Option<String>,
    ) -> Result<ParticipationView> {
        let response = optional_text("response", response, self.limits.max_message_len)?;
        let (mut participation, challenge) =
            participation_for_owner(self.store.as_ref(), principal, id).await?;
        if participation.status != ParticipationStatus::Pending {
            return Err(EngineError::conflict(format!(
                "participation is not pending (status: {})",
                participation.status
            )));
        }

        let now = Utc::now();
        if accept {
            participation.accept(response, challenge.deadline_from(now)?, now)?;
        } else {
            participation.reject(response, now)?;
        }
        let stored = self.store.update_participation(&participation, None).await?;

        info!(
            participation_id = %stored.id,
            challenge_id = %stored.challenge_id,
            status = %stored.status,
            deadline = ?stored.deadline,
            "Participation answered"
        );
        Ok(ParticipationView::new(stored, &challenge, now))
    }

    pub async fn update_progress(
        &self,
        principal: &Principal,
        id: ParticipationId,
        value: u32,
    ) -> Result<ParticipationView> {
        self.progress.update_progress(principal, id, value).await
    }

    /// Complete an Accepted or InProgress participation and dispatch its reward once
    pub async fn mark_completed(
        &self,
        principal: &Principal,
        id: ParticipationId,
        response: Option<String>,
    ) -> Result<ParticipationView> {
        let response = optional_text("response", response, self.limits.max_message_len)?;
        let (participation, challenge) =
            participation_for_owner(self.store.as_ref(), principal, id).await?;
        if participation.reward_awarded {
            return Err(EngineError::conflict(
                "reward already awarded for this participation",
            ));
        }
        match participation.status {
            ParticipationStatus::Accepted | ParticipationStatus::InProgress => {}
            ParticipationStatus::ProofSubmitted => {
                return Err(EngineError::conflict(
                    "proof is awaiting verification, verify it instead",
                ))
            }
            other => {
                return Err(EngineError::conflict(format!(
                    "cannot complete a participation that is {}",
                    other
                )))
            }
        }

        let stored = self
            .rewards
            .complete(participation, &challenge, response)
            .await?;
        Ok(ParticipationView::new(stored, &challenge, Utc::now()))
    }

    /// Explicit failure; deadlines never fail a participation on their own
    pub async fn mark_failed(
        &self,
        principal: &Principal,
        id: ParticipationId,
        response: Option<String>,
    ) -> Result<ParticipationView> {
        let response = optional_text("response", response, self.limits.max_message_len)?;
        let (mut participation, challenge) =
            participation_for_owner(self.store.as_ref(), principal, id).await?;
        if !participation.status.is_active() {
            return Err(EngineError::conflict(format!(
                "cannot fail a participation that is {}",
                participation.status
            )));
        }

        let now = Utc::now();
        participation.fail(response, now)?;
        let stored = self.store.update_participation(&participation, None).await?;

        info!(
            participation_id = %stored.id,
            challenge_id = %stored.challenge_id,
            overdue = participation.deadline.is_some_and(|d| d < now),
            "Participation failed"
        );
        Ok(ParticipationView::new(stored, &challenge, now))
    }

    pub async fn verify_proof(
        &self,
        principal: &Principal,
        id: ParticipationId,
        approve: bool,
        response: Option<String>,
    ) -> Result<ParticipationView> {
        self.progress
            .verify_proof(principal, id, approve, response)
            .await
    }

    pub async fn list_pending_proofs(
        &self,
        principal: &Principal,
        challenge_id: Option<ChallengeId>,
    ) -> Result<Vec<ParticipationView>> {
        self.progress
            .list_pending_proofs(principal, challenge_id)
            .await
    }

    /// All participations of one of the caller's challenges, newest first
    pub async fn list_participants(
        &self,
        principal: &Principal,
        challenge_id: ChallengeId,
    ) -> Result<Vec<ParticipationView>> {
        let challenge = owned_challenge(self.store.as_ref(), principal, challenge_id).await?;
        let filter = ParticipationFilter {
            challenge_id: Some(challenge_id),
            ..Default::default()
        };
        let now = Utc::now();
        Ok(self
            .store
            .list_participations(&filter)
            .await?
            .into_iter()
            .map(|p| ParticipationView::new(p, &challenge, now))
            .collect())
    }

    async fn with_challenges(
        &self,
        participations: Vec<Participation>,
    ) -> Result<Vec<ParticipationView>> {
        let now = Utc::now();
        let mut challenges = HashMap::new();
        let mut views = Vec::with_capacity(participations.len());
        for participation in participations {
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

    /// Participation of `user_id` in `challenge_id`, if any
    pub async fn find_participation(
        &self,
        challenge_id: ChallengeId,
        user_id: UserId,
    ) -> Result<Option<Participation>> {
        Ok(self.store.find_participation(challenge_id, user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use challenge_market_core::{ChallengeDraft, ChallengeType, TrackingMode};
    use challenge_market_storage::MemoryStore;
    use chrono::Duration;

    struct Fixture {
        service: ChallengeService,
        owner: Principal,
        challenge_id: ChallengeId,
    }

    async fn fixture(draft: ChallengeDraft) -> Fixture {
        let store: Arc<dyn ChallengeStore> = Arc::new(MemoryStore::new());
        let service = ChallengeService::new(store, Arc::new(NoopLedger), &EngineConfig::default());
        let owner = Principal::entrepreneur(UserId::new());
        let challenge = service.catalog().create(&owner, draft).await.unwrap();
        service.catalog().activate(&owner, challenge.id).await.unwrap();
        Fixture {
            service,
            owner,
            challenge_id: challenge.id,
        }
    }

    fn counted() -> ChallengeDraft {
        ChallengeDraft::new("Book five sessions", ChallengeType::BookingMilestone)
            .with_target_count(5)
            .with_time_limit_days(7)
            .with_xp_reward(150)
    }

    #[tokio::test]
    async fn test_join_requires_client_role() {
        let f = fixture(counted()).await;
        let err = f
            .service
            .join(&f.owner, f.challenge_id, None)
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "client role required");
    }

    #[tokio::test]
    async fn test_join_draft_challenge_is_not_found() {
        let store: Arc<dyn ChallengeStore> = Arc::new(MemoryStore::new());
        let service = ChallengeService::new(store, Arc::new(NoopLedger), &EngineConfig::default());
        let owner = Principal::entrepreneur(UserId::new());
        let challenge = service.catalog().create(&owner, counted()).await.unwrap();

        let err = service
            .join(&Principal::client(UserId::new()), challenge.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_double_join_is_conflict() {
        let f = fixture(counted()).await;
        let client = Principal::client(UserId::new());
        f.service.join(&client, f.challenge_id, None).await.unwrap();

        let err = f
            .service
            .join(&client, f.challenge_id, None)
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "already participating in this challenge");
    }

    #[tokio::test]
    async fn test_accept_sets_deadline_from_time_limit() {
        let f = fixture(counted()).await;
        let client = Principal::client(UserId::new());
        let joined = f.service.join(&client, f.challenge_id, None).await.unwrap();

        let before = Utc::now();
        let accepted = f
            .service
            .respond(&f.owner, joined.participation.id, true, Some("welcome".into()))
            .await
            .unwrap();
        let deadline = accepted.participation.deadline.unwrap();
        assert!(deadline >= before + Duration::days(7));
        assert_eq!(
            accepted.participation.entrepreneur_response.as_deref(),
            Some("welcome")
        );

        let err = f
            .service
            .respond(&f.owner, joined.participation.id, true, None)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_accept_with_unrepresentable_deadline_is_validation() {
        let mut config = EngineConfig::default();
        config.limits.max_time_limit_days = u32::MAX;
        let store: Arc<dyn ChallengeStore> = Arc::new(MemoryStore::new());
        let service = ChallengeService::new(store, Arc::new(NoopLedger), &config);
        let owner = Principal::entrepreneur(UserId::new());
        let challenge = service
            .catalog()
            .create(
                &owner,
                ChallengeDraft::new("Forever", ChallengeType::SpeedChallenge)
                    .with_time_limit_days(1_000_000_000),
            )
            .await
            .unwrap();
        service.catalog().activate(&owner, challenge.id).await.unwrap();

        let client = Principal::client(UserId::new());
        let joined = service.join(&client, challenge.id, None).await.unwrap();
        let err = service
            .respond(&owner, joined.participation.id, true, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");

        let stored = service
            .find_participation(challenge.id, client.user_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ParticipationStatus::Pending);
        assert!(stored.deadline.is_none());
    }

    #[tokio::test]
    async fn test_respond_by_other_entrepreneur_is_forbidden() {
        let f = fixture(counted()).await;
        let joined = f
            .service
            .join(&Principal::client(UserId::new()), f.challenge_id, None)
            .await
            .unwrap();

        let err = f
            .service
            .respond(
                &Principal::entrepreneur(UserId::new()),
                joined.participation.id,
                true,
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "not your challenge");
    }

    #[tokio::test]
    async fn test_withdraw_only_own_participation() {
        let f = fixture(counted()).await;
        let joined = f
            .service
            .join(&Principal::client(UserId::new()), f.challenge_id, None)
            .await
            .unwrap();

        let err = f
            .service
            .withdraw(&Principal::client(UserId::new()), joined.participation.id)
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "not your participation");
    }

    #[tokio::test]
    async fn test_rejected_cannot_complete() {
        let f = fixture(counted()).await;
        let joined = f
            .service
            .join(&Principal::client(UserId::new()), f.challenge_id, None)
            .await
            .unwrap();
        f.service
            .respond(&f.owner, joined.participation.id, false, None)
            .await
            .unwrap();

        let err = f
            .service
            .mark_completed(&f.owner, joined.participation.id, None)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_mark_completed_refuses_pending_proof() {
        let f = fixture(counted().with_tracking_mode(TrackingMode::ManualProof)).await;
        let client = Principal::client(UserId::new());
        let joined = f.service.join(&client, f.challenge_id, None).await.unwrap();
        let id = joined.participation.id;
        f.service.respond(&f.owner, id, true, None).await.unwrap();
        f.service
            .submit_proof(&client, id, Some("done".into()), None)
            .await
            .unwrap();

        let err = f.service.mark_completed(&f.owner, id, None).await.unwrap_err();
        assert!(err.reason().contains("verify"));
    }

    #[tokio::test]
    async fn test_mark_failed_from_pending_is_conflict() {
        let f = fixture(counted()).await;
        let joined = f
            .service
            .join(&Principal::client(UserId::new()), f.challenge_id, None)
            .await
            .unwrap();

        let err = f
            .service
            .mark_failed(&f.owner, joined.participation.id, None)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_list_participants_and_own_participations() {
        let f = fixture(counted()).await;
        let alice = Principal::client(UserId::new());
        let bob = Principal::client(UserId::new());
        f.service.join(&alice, f.challenge_id, None).await.unwrap();
        f.service.join(&bob, f.challenge_id, None).await.unwrap();

        let participants = f
            .service
            .list_participants(&f.owner, f.challenge_id)
            .await
            .unwrap();
        assert_eq!(participants.len(), 2);

        let mine = f.service.list_my_participations(&alice).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].participation.user_id, alice.user_id);

        let err = f
            .service
            .list_participants(&Principal::entrepreneur(UserId::new()), f.challenge_id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_rejected_join_leaves_no_row() {
        let f = fixture(counted().with_max_participants(1)).await;
        f.service
            .join(&Principal::client(UserId::new()), f.challenge_id, None)
            .await
            .unwrap();

        let late = Principal::client(UserId::new());
        let err = f.service.join(&late, f.challenge_id, None).await.unwrap_err();
        assert_eq!(err.reason(), "maximum participants reached");
        assert!(f
            .service
            .find_participation(f.challenge_id, late.user_id)
            .await
            .unwrap()
            .is_none());
    }
}
