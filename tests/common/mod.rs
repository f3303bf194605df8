//! Shared helpers for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use challenge_market::core::{
    Challenge, ChallengeDraft, ChallengeType, RewardGrantId, RewardInstruction, TrackingMode,
    UserId,
};
use challenge_market::storage::{ChallengeStore, MemoryStore};
use challenge_market::{ChallengeService, EngineConfig, GamificationLedger, LedgerError, Principal};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One recorded ledger award
#[derive(Clone, Debug)]
pub struct Award {
    pub grant_id: RewardGrantId,
    pub user_id: UserId,
    pub reward: RewardInstruction,
}

/// Records every award; the first `failures` calls fail
#[derive(Default)]
pub struct CountingLedger {
    pub awards: Mutex<Vec<Award>>,
    failures: AtomicU32,
    /// Calls received, finished or not
    calls: AtomicU32,
    latency: Option<Duration>,
}

impl CountingLedger {
    pub fn failing(failures: u32) -> Self {
        Self {
            failures: AtomicU32::new(failures),
            ..Default::default()
        }
    }

    /// Every call takes `latency` before it answers
    pub fn slow(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Default::default()
        }
    }

    pub fn count(&self) -> usize {
        self.awards.lock().len()
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GamificationLedger for CountingLedger {
    async fn award_challenge_completed(
        &self,
        grant_id: RewardGrantId,
        user_id: UserId,
        reward: &RewardInstruction,
    ) -> Result<(), LedgerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(LedgerError::Unavailable("ledger offline".to_string()));
        }
        self.awards.lock().push(Award {
            grant_id,
            user_id,
            reward: reward.clone(),
        });
        Ok(())
    }
}

// ============================================================================
// TEST HELPERS
// ============================================================================

pub struct Harness {
    pub service: Arc<ChallengeService>,
    pub store: Arc<MemoryStore>,
    pub ledger: Arc<CountingLedger>,
    pub owner: Principal,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_ledger(CountingLedger::default())
    }

    pub fn with_ledger(ledger: CountingLedger) -> Self {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(ledger);
        let dyn_store: Arc<dyn ChallengeStore> = store.clone();
        let service = Arc::new(ChallengeService::new(
            dyn_store,
            ledger.clone(),
            &EngineConfig::default(),
        ));
        Self {
            service,
            store,
            ledger,
            owner: Principal::entrepreneur(UserId::new()),
        }
    }

    /// Create and activate a challenge owned by `self.owner`
    pub async fn active_challenge(&self, draft: ChallengeDraft) -> Challenge {
        let catalog = self.service.catalog();
        let challenge = catalog.create(&self.owner, draft).await.unwrap();
        catalog.activate(&self.owner, challenge.id).await.unwrap()
    }
}

pub fn booking_milestone(target: u32) -> ChallengeDraft {
    ChallengeDraft::new("Book five sessions this month", ChallengeType::BookingMilestone)
        .with_target_count(target)
        .with_time_limit_days(30)
        .with_xp_reward(200)
        .with_badge("regular")
}

pub fn review_with_proof() -> ChallengeDraft {
    ChallengeDraft::new("Post a photo review", ChallengeType::ReviewChallenge)
        .with_tracking_mode(TrackingMode::ManualProof)
        .with_xp_reward(50)
}

pub fn client() -> Principal {
    Principal::client(UserId::new())
}
