//! Reward dispatcher
//!
//! Completion flips the participation's `reward_awarded` flag and writes a
//! `RewardGrant` outbox row in one store operation. Delivery to the ledger
//! happens afterwards and may fail; the grant then stays Pending and the
//! retry worker picks it up. The flag is never rolled back.
//!
//! Each delivery attempt is claimed by compare-and-set on the grant's attempt
//! counter, and the claim holds a lease. While the lease runs no other
//! dispatcher picks the grant up, so one grant has at most one ledger call in
//! flight. A lease that lapses without a settled outcome (crashed dispatcher,
//! or a store write lost after the ledger accepted) lets the grant be sent
//! again under the same idempotency key.

use challenge_market_core::{Challenge, Participation, RewardGrant};
use challenge_market_storage::{ChallengeStore, StorageError};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::RewardConfig;
use crate::error::{EngineError, Result};
use crate::ledger::GamificationLedger;

/// Result of one delivery attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// Attempt failed; the grant stays Pending
    Retrying { attempts: u32 },
    /// Attempt failed and the grant ran out of attempts
    Abandoned,
    /// Already settled, or another dispatcher claimed this attempt
    Skipped,
}

/// Tally of one retry pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RetrySummary {
    pub delivered: usize,
    pub retrying: usize,
    pub abandoned: usize,
    pub skipped: usize,
}

impl RetrySummary {
    fn record(&mut self, outcome: DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Delivered => self.delivered += 1,
            DeliveryOutcome::Retrying { .. } => self.retrying += 1,
            DeliveryOutcome::Abandoned => self.abandoned += 1,
            DeliveryOutcome::Skipped => self.skipped += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.delivered + self.retrying + self.abandoned + self.skipped
    }
}

pub struct RewardDispatcher {
    store: Arc<dyn ChallengeStore>,
    ledger: Arc<dyn GamificationLedger>,
    max_attempts: u32,
    claim_lease: Duration,
}

impl RewardDispatcher {
    pub fn new(
        store: Arc<dyn ChallengeStore>,
        ledger: Arc<dyn GamificationLedger>,
        config: &RewardConfig,
    ) -> Self {
        let lease_secs = i64::try_from(config.claim_lease_secs.max(1)).unwrap_or(i64::MAX);
        Self {
            store,
            ledger,
            max_attempts: config.max_attempts.max(1),
            claim_lease: Duration::try_seconds(lease_secs).unwrap_or(Duration::MAX),
        }
    }

    /// Move a participation to Completed, record its grant, then try to deliver it.
    ///
    /// Returns the stored participation. A failed delivery does not fail the
    /// completion.
    pub async fn complete(
        &self,
        mut participation: Participation,
        challenge: &Challenge,
        response: Option<String>,
    ) -> Result<Participation> {
        let now = Utc::now();
        let instruction = challenge.reward_instruction();
        participation.complete(&instruction, response, now)?;

        let grant = RewardGrant::new(
            participation.id,
            participation.challenge_id,
            participation.user_id,
            instruction,
            now,
        );

        let stored = self
            .store
            .complete_participation(&participation, &grant)
            .await
            .map_err(|e| match e {
                StorageError::Invariant(_) => {
                    EngineError::conflict("reward already awarded for this participation")
                }
                other => other.into(),
            })?;

        info!(
            participation_id = %stored.id,
            challenge_id = %stored.challenge_id,
            user_id = %stored.user_id,
            grant_id = %grant.id,
            xp = stored.xp_awarded,
            "Participation completed"
        );

        if let Err(e) = self.deliver(&grant).await {
            warn!(
                grant_id = %grant.id,
                error = %e,
                "Reward grant left for the retry worker"
            );
        }

        Ok(stored)
    }

    /// Make one delivery attempt for a grant
    pub async fn deliver(&self, grant: &RewardGrant) -> Result<DeliveryOutcome> {
        let now = Utc::now();
        if !grant.is_claimable(now) {
            return Ok(DeliveryOutcome::Skipped);
        }
        let lease_until = now
            .checked_add_signed(self.claim_lease)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        if !self
            .store
            .claim_grant_attempt(grant.id, grant.attempts, now, lease_until)
            .await?
        {
            debug!(grant_id = %grant.id, "Delivery attempt already claimed");
            return Ok(DeliveryOutcome::Skipped);
        }
        let attempts = grant.attempts + 1;

        match self
            .ledger
            .award_challenge_completed(grant.id, grant.user_id, &grant.instruction)
            .await
        {
            Ok(()) => {
                self.store.mark_grant_delivered(grant.id, Utc::now()).await?;
                info!(
                    grant_id = %grant.id,
                    participation_id = %grant.participation_id,
                    attempts,
                    "Reward delivered"
                );
                Ok(DeliveryOutcome::Delivered)
            }
            Err(e) => {
                let abandon = attempts >= self.max_attempts;
                self.store
                    .record_grant_failure(grant.id, &e.to_string(), abandon)
                    .await?;
                if abandon {
                    error!(
                        grant_id = %grant.id,
                        participation_id = %grant.participation_id,
                        user_id = %grant.user_id,
                        attempts,
                        error = %e,
                        "Reward grant abandoned"
                    );
                    Ok(DeliveryOutcome::Abandoned)
                } else {
                    warn!(grant_id = %grant.id, attempts, error = %e, "Reward delivery failed");
                    Ok(DeliveryOutcome::Retrying { attempts })
                }
            }
        }
    }

    /// Re-deliver up to `batch_size` pending grants, oldest first
    pub async fn retry_pending(&self, batch_size: usize) -> Result<RetrySummary> {
        let grants = self
            .store
            .pending_grants(self.max_attempts, batch_size, Utc::now())
            .await?;

        let mut summary = RetrySummary::default();
        for grant in &grants {
            summary.record(self.deliver(grant).await?);
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerError;
    use async_trait::async_trait;
    use challenge_market_core::{
        ChallengeDraft, ChallengeStatus, ChallengeType, GrantStatus, RewardGrantId,
        RewardInstruction, UserId,
    };
    use challenge_market_storage::MemoryStore;
    use parking_lot::Mutex;

    /// Fails the first `failures` calls, then accepts
    #[derive(Default)]
    struct FlakyLedger {
        failures: Mutex<u32>,
        calls: Mutex<Vec<RewardGrantId>>,
    }

    impl FlakyLedger {
        fn failing(failures: u32) -> Self {
            Self {
                failures: Mutex::new(failures),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl GamificationLedger for FlakyLedger {
        async fn award_challenge_completed(
            &self,
            grant_id: RewardGrantId,
            _user_id: UserId,
            _reward: &RewardInstruction,
        ) -> std::result::Result<(), LedgerError> {
            self.calls.lock().push(grant_id);
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(LedgerError::Unavailable("connection refused".to_string()));
            }
            Ok(())
        }
    }

    fn policy(max_attempts: u32) -> RewardConfig {
        RewardConfig {
            max_attempts,
            ..Default::default()
        }
    }

    async fn accepted_participation(store: &MemoryStore) -> (Participation, Challenge) {
        let now = Utc::now();
        let mut challenge = Challenge::from_draft(
            UserId::new(),
            ChallengeDraft::new("Review three services", ChallengeType::ReviewChallenge)
                .with_xp_reward(75)
                .with_badge("critic"),
            now,
        );
        challenge.status = ChallengeStatus::Active;
        store.insert_challenge(&challenge).await.unwrap();

        let p = Participation::new(challenge.id, UserId::new(), None, now);
        let mut p = store.insert_participation(&p, None).await.unwrap();
        p.accept(None, None, now).unwrap();
        let p = store.update_participation(&p, None).await.unwrap();
        (p, challenge)
    }

    #[tokio::test]
    async fn test_complete_delivers_immediately() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(FlakyLedger::default());
        let dispatcher = RewardDispatcher::new(store.clone(), ledger.clone(), &policy(3));
        let (p, challenge) = accepted_participation(&store).await;

        let done = dispatcher.complete(p, &challenge, None).await.unwrap();
        assert!(done.reward_awarded);
        assert_eq!(done.xp_awarded, 75);

        let grant = store.grant_for_participation(done.id).await.unwrap().unwrap();
        assert_eq!(grant.status, GrantStatus::Delivered);
        assert_eq!(grant.attempts, 1);
        assert_eq!(grant.instruction.badge_code.as_deref(), Some("critic"));
        assert_eq!(ledger.calls.lock().as_slice(), &[grant.id]);
    }

    #[tokio::test]
    async fn test_ledger_failure_keeps_completion_and_grant_pending() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(FlakyLedger::failing(1));
        let dispatcher = RewardDispatcher::new(store.clone(), ledger.clone(), &policy(3));
        let (p, challenge) = accepted_participation(&store).await;

        let done = dispatcher.complete(p, &challenge, None).await.unwrap();
        assert!(done.reward_awarded);

        let grant = store.grant_for_participation(done.id).await.unwrap().unwrap();
        assert_eq!(grant.status, GrantStatus::Pending);
        assert_eq!(grant.attempts, 1);
        assert!(grant.last_error.as_deref().unwrap().contains("connection refused"));

        let summary = dispatcher.retry_pending(10).await.unwrap();
        assert_eq!(summary.delivered, 1);
        let grant = store.get_grant(grant.id).await.unwrap().unwrap();
        assert_eq!(grant.status, GrantStatus::Delivered);
        assert_eq!(ledger.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_retry_skips_grant_with_live_claim() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(FlakyLedger::failing(1));
        let dispatcher = RewardDispatcher::new(store.clone(), ledger.clone(), &policy(3));
        let (p, challenge) = accepted_participation(&store).await;

        let done = dispatcher.complete(p, &challenge, None).await.unwrap();
        let grant = store.grant_for_participation(done.id).await.unwrap().unwrap();
        assert!(grant.claimed_until.is_none());

        // Another dispatcher is mid-delivery
        let now = Utc::now();
        assert!(store
            .claim_grant_attempt(grant.id, 1, now, now + Duration::seconds(60))
            .await
            .unwrap());

        let summary = dispatcher.retry_pending(10).await.unwrap();
        assert_eq!(summary.total(), 0);
        assert_eq!(dispatcher.deliver(&grant).await.unwrap(), DeliveryOutcome::Skipped);
        assert_eq!(ledger.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_grant_abandoned_after_max_attempts() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(FlakyLedger::failing(10));
        let dispatcher = RewardDispatcher::new(store.clone(), ledger.clone(), &policy(2));
        let (p, challenge) = accepted_participation(&store).await;

        let done = dispatcher.complete(p, &challenge, None).await.unwrap();
        let summary = dispatcher.retry_pending(10).await.unwrap();
        assert_eq!(summary.abandoned, 1);

        let grant = store.grant_for_participation(done.id).await.unwrap().unwrap();
        assert_eq!(grant.status, GrantStatus::Abandoned);
        assert_eq!(grant.attempts, 2);

        let summary = dispatcher.retry_pending(10).await.unwrap();
        assert_eq!(summary.total(), 0);
        assert_eq!(ledger.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_second_completion_is_conflict() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(FlakyLedger::default());
        let dispatcher = RewardDispatcher::new(store.clone(), ledger.clone(), &policy(3));
        let (p, challenge) = accepted_participation(&store).await;

        let stale = p.clone();
        dispatcher.complete(p, &challenge, None).await.unwrap();
        let err = dispatcher.complete(stale, &challenge, None).await.unwrap_err();

        assert!(err.is_conflict());
        assert_eq!(ledger.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_deliver_skips_settled_grant() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = RewardDispatcher::new(store, Arc::new(FlakyLedger::default()), &policy(3));
        let mut grant = RewardGrant::new(
            challenge_market_core::ParticipationId::new(),
            challenge_market_core::ChallengeId::new(),
            UserId::new(),
            RewardInstruction::xp_only(5),
            Utc::now(),
        );
        grant.status = GrantStatus::Delivered;

        let outcome = dispatcher.deliver(&grant).await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::Skipped);
    }
}
