//! In-process store
//!
//! All state sits behind one `RwLock`, so every trait method is trivially a
//! single consistency unit. Used by the test suites and `--in-memory` runs.

use crate::traits::{
    ChallengeFilter, ChallengeStore, ParticipationCounts, ParticipationFilter, Result,
    StorageError,
};
use async_trait::async_trait;
use challenge_market_core::{
    Challenge, ChallengeId, GrantStatus, Participation, ParticipationId, RewardGrant,
    RewardGrantId, UserId,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

#[derive(Default)]
struct Inner {
    challenges: HashMap<ChallengeId, Challenge>,
    participations: HashMap<ParticipationId, Participation>,
    pairs: HashMap<(ChallengeId, UserId), ParticipationId>,
    grants: HashMap<RewardGrantId, RewardGrant>,
    grants_by_participation: HashMap<ParticipationId, RewardGrantId>,
}

impl Inner {
    fn occupying_except(&self, challenge_id: ChallengeId, except: Option<ParticipationId>) -> u32 {
        self.participations
            .values()
            .filter(|p| p.challenge_id == challenge_id)
            .filter(|p| Some(p.id) != except)
            .filter(|p| p.status.occupies_slot())
            .count() as u32
    }

    fn check_version(&self, participation: &Participation) -> Result<&Participation> {
        let stored = self
            .participations
            .get(&participation.id)
            .ok_or_else(|| StorageError::NotFound(format!("participation {}", participation.id)))?;
        if stored.version != participation.version {
            return Err(StorageError::VersionConflict(format!(
                "participation {} is at version {}, expected {}",
                participation.id, stored.version, participation.version
            )));
        }
        Ok(stored)
    }

    /// Joinability and capacity of the stored challenge, as seen under the write lock
    fn admit(
        &self,
        participation: &Participation,
        except: Option<ParticipationId>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let challenge = self
            .challenges
            .get(&participation.challenge_id)
            .ok_or_else(|| {
                StorageError::NotFound(format!("challenge {}", participation.challenge_id))
            })?;
        if !challenge.is_joinable(at) {
            return Err(StorageError::Closed(format!(
                "challenge {} is not open for participation",
                challenge.id
            )));
        }
        if let Some(max) = challenge.max_participants {
            if self.occupying_except(challenge.id, except) >= max {
                return Err(StorageError::CapacityReached(format!(
                    "challenge {} is full",
                    challenge.id
                )));
            }
        }
        Ok(())
    }

    fn grant_mut(&mut self, id: RewardGrantId) -> Result<&mut RewardGrant> {
        self.grants
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("reward grant {}", id)))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChallengeStore for MemoryStore {
    // ==================== Challenges ====================

    async fn insert_challenge(&self, challenge: &Challenge) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.challenges.contains_key(&challenge.id) {
            return Err(StorageError::Duplicate(format!("challenge {}", challenge.id)));
        }
        inner.challenges.insert(challenge.id, challenge.clone());
        Ok(())
    }

    async fn get_challenge(&self, id: ChallengeId) -> Result<Option<Challenge>> {
        Ok(self.inner.read().challenges.get(&id).cloned())
    }

    async fn update_challenge(&self, challenge: &Challenge) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.challenges.contains_key(&challenge.id) {
            return Err(StorageError::NotFound(format!("challenge {}", challenge.id)));
        }
        if let Some(max) = challenge.max_participants {
            let occupying = inner.occupying_except(challenge.id, None);
            if occupying > max {
                return Err(StorageError::CapacityReached(format!(
                    "challenge {} already has {} participants",
                    challenge.id, occupying
                )));
            }
        }
        inner.challenges.insert(challenge.id, challenge.clone());
        Ok(())
    }

    async fn delete_challenge(&self, id: ChallengeId) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.challenges.contains_key(&id) {
            return Err(StorageError::NotFound(format!("challenge {}", id)));
        }
        let has_active = inner
            .participations
            .values()
            .any(|p| p.challenge_id == id && p.status.is_active());
        if has_active {
            return Err(StorageError::Invariant(format!(
                "challenge {} has active participants",
                id
            )));
        }

        inner.challenges.remove(&id);
        let removed: Vec<Participation> = inner
            .participations
            .values()
            .filter(|p| p.challenge_id == id)
            .cloned()
            .collect();
        for p in &removed {
            inner.participations.remove(&p.id);
            inner.pairs.remove(&(p.challenge_id, p.user_id));
        }
        debug!(challenge_id = %id, participations = removed.len(), "Deleted challenge");
        Ok(())
    }

    async fn list_challenges(&self, filter: &ChallengeFilter) -> Result<Vec<Challenge>> {
        let inner = self.inner.read();
        let mut challenges: Vec<Challenge> = inner
            .challenges
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        challenges.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(challenges
            .into_iter()
            .skip(filter.offset)
            .take(limit)
            .collect())
    }

    // ==================== Participations ====================

    async fn get_participation(&self, id: ParticipationId) -> Result<Option<Participation>> {
        Ok(self.inner.read().participations.get(&id).cloned())
    }

    async fn find_participation(
        &self,
        challenge_id: ChallengeId,
        user_id: UserId,
    ) -> Result<Option<Participation>> {
        let inner = self.inner.read();
        Ok(inner
            .pairs
            .get(&(challenge_id, user_id))
            .and_then(|id| inner.participations.get(id))
            .cloned())
    }

    async fn insert_participation(
        &self,
        participation: &Participation,
        admit_at: Option<DateTime<Utc>>,
    ) -> Result<Participation> {
        let mut inner = self.inner.write();
        if !inner.challenges.contains_key(&participation.challenge_id) {
            return Err(StorageError::NotFound(format!(
                "challenge {}",
                participation.challenge_id
            )));
        }
        let key = (participation.challenge_id, participation.user_id);
        if inner.pairs.contains_key(&key) {
            return Err(StorageError::Duplicate(format!(
                "user {} already participates in challenge {}",
                participation.user_id, participation.challenge_id
            )));
        }
        if let Some(at) = admit_at {
            inner.admit(participation, None, at)?;
        }

        let mut stored = participation.clone();
        stored.version = 1;
        inner.pairs.insert(key, stored.id);
        inner.participations.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn update_participation(
        &self,
        participation: &Participation,
        admit_at: Option<DateTime<Utc>>,
    ) -> Result<Participation> {
        let mut inner = self.inner.write();
        inner.check_version(participation)?;
        if let Some(at) = admit_at {
            inner.admit(participation, Some(participation.id), at)?;
        }

        let mut stored = participation.clone();
        stored.version += 1;
        inner.participations.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn complete_participation(
        &self,
        participation: &Participation,
        grant: &RewardGrant,
    ) -> Result<Participation> {
        let mut inner = self.inner.write();
        let current = inner.check_version(participation)?;
        if current.reward_awarded {
            return Err(StorageError::Invariant(format!(
                "participation {} was already rewarded",
                participation.id
            )));
        }
        if inner
            .grants_by_participation
            .contains_key(&participation.id)
        {
            return Err(StorageError::Duplicate(format!(
                "reward grant for participation {}",
                participation.id
            )));
        }

        let mut stored = participation.clone();
        stored.version += 1;
        inner.participations.insert(stored.id, stored.clone());
        inner
            .grants_by_participation
            .insert(grant.participation_id, grant.id);
        inner.grants.insert(grant.id, grant.clone());
        Ok(stored)
    }

    async fn list_participations(
        &self,
        filter: &ParticipationFilter,
    ) -> Result<Vec<Participation>> {
        let inner = self.inner.read();
        let mut participations: Vec<Participation> = inner
            .participations
            .values()
            .filter(|p| filter.challenge_id.map_or(true, |id| p.challenge_id == id))
            .filter(|p| filter.user_id.map_or(true, |id| p.user_id == id))
            .filter(|p| filter.status.map_or(true, |s| p.status == s))
            .filter(|p| {
                filter.challenge_owner.map_or(true, |owner| {
                    inner
                        .challenges
                        .get(&p.challenge_id)
                        .is_some_and(|c| c.owner_id == owner)
                })
            })
            .cloned()
            .collect();
        participations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(participations)
    }

    async fn count_participations(&self, challenge_id: ChallengeId) -> Result<ParticipationCounts> {
        let inner = self.inner.read();
        Ok(ParticipationCounts::tally(
            inner
                .participations
                .values()
                .filter(|p| p.challenge_id == challenge_id)
                .map(|p| &p.status),
        ))
    }

    // ==================== Reward outbox ====================

    async fn get_grant(&self, id: RewardGrantId) -> Result<Option<RewardGrant>> {
        Ok(self.inner.read().grants.get(&id).cloned())
    }

    async fn grant_for_participation(
        &self,
        participation_id: ParticipationId,
    ) -> Result<Option<RewardGrant>> {
        let inner = self.inner.read();
        Ok(inner
            .grants_by_participation
            .get(&participation_id)
            .and_then(|id| inner.grants.get(id))
            .cloned())
    }

    async fn pending_grants(
        &self,
        max_attempts: u32,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<RewardGrant>> {
        let inner = self.inner.read();
        let mut grants: Vec<RewardGrant> = inner
            .grants
            .values()
            .filter(|g| g.is_claimable(now) && g.attempts < max_attempts)
            .cloned()
            .collect();
        grants.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        grants.truncate(limit);
        Ok(grants)
    }

    async fn claim_grant_attempt(
        &self,
        id: RewardGrantId,
        expected_attempts: u32,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool> {
        let mut inner = self.inner.write();
        let grant = inner.grant_mut(id)?;
        if !grant.is_claimable(now) || grant.attempts != expected_attempts {
            return Ok(false);
        }
        grant.attempts += 1;
        grant.claimed_until = Some(lease_until);
        Ok(true)
    }

    async fn mark_grant_delivered(&self, id: RewardGrantId, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.write();
        let grant = inner.grant_mut(id)?;
        grant.status = GrantStatus::Delivered;
        grant.delivered_at = Some(at);
        grant.last_error = None;
        grant.claimed_until = None;
        Ok(())
    }

    async fn record_grant_failure(
        &self,
        id: RewardGrantId,
        error: &str,
        abandon: bool,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        let grant = inner.grant_mut(id)?;
        grant.last_error = Some(error.to_string());
        grant.claimed_until = None;
        if abandon {
            grant.status = GrantStatus::Abandoned;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use challenge_market_core::{ChallengeDraft, ChallengeStatus, ChallengeType, RewardInstruction};
    use chrono::Duration;

    async fn store_with_challenge(max: Option<u32>) -> (MemoryStore, Challenge) {
        let store = MemoryStore::new();
        let mut draft = ChallengeDraft::new("Loyalty run", ChallengeType::LoyaltyChallenge);
        draft.max_participants = max;
        let mut challenge = Challenge::from_draft(UserId::new(), draft, Utc::now());
        challenge.status = ChallengeStatus::Active;
        store.insert_challenge(&challenge).await.unwrap();
        (store, challenge)
    }

    async fn completed_with_grant(store: &MemoryStore, challenge: &Challenge) -> RewardGrant {
        let mut p = store
            .insert_participation(&join(challenge), None)
            .await
            .unwrap();
        p.accept(None, None, Utc::now()).unwrap();
        let mut p = store.update_participation(&p, None).await.unwrap();
        let reward = RewardInstruction::xp_only(10);
        p.complete(&reward, None, Utc::now()).unwrap();
        let grant = RewardGrant::new(p.id, challenge.id, p.user_id, reward, Utc::now());
        store.complete_participation(&p, &grant).await.unwrap();
        grant
    }

    fn join(challenge: &Challenge) -> Participation {
        Participation::new(challenge.id, UserId::new(), None, Utc::now())
    }

    #[tokio::test]
    async fn test_insert_sets_first_version_and_indexes_pair() {
        let (store, challenge) = store_with_challenge(None).await;
        let p = join(&challenge);
        let stored = store.insert_participation(&p, None).await.unwrap();
        assert_eq!(stored.version, 1);

        let found = store
            .find_participation(challenge.id, p.user_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, p.id);
    }

    #[tokio::test]
    async fn test_duplicate_pair_rejected() {
        let (store, challenge) = store_with_challenge(None).await;
        let p = join(&challenge);
        store.insert_participation(&p, None).await.unwrap();

        let mut again = join(&challenge);
        again.user_id = p.user_id;
        let err = store.insert_participation(&again, None).await.unwrap_err();
        assert!(matches!(err, StorageError::Duplicate(_)));
    }

    #[tokio::test]
    async fn test_capacity_ignores_withdrawn() {
        let (store, challenge) = store_with_challenge(Some(1)).await;
        let now = Utc::now();
        let first = store
            .insert_participation(&join(&challenge), Some(now))
            .await
            .unwrap();

        let err = store
            .insert_participation(&join(&challenge), Some(now))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::CapacityReached(_)));

        let mut withdrawn = first.clone();
        withdrawn.withdraw(Utc::now()).unwrap();
        let withdrawn = store.update_participation(&withdrawn, None).await.unwrap();

        let second = store
            .insert_participation(&join(&challenge), Some(now))
            .await
            .unwrap();

        // The seat is taken again, so the withdrawn participant cannot come back
        let mut back = withdrawn;
        back.rejoin(None, Utc::now()).unwrap();
        let err = store
            .update_participation(&back, Some(now))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::CapacityReached(_)));

        let mut gone = second;
        gone.withdraw(Utc::now()).unwrap();
        store.update_participation(&gone, None).await.unwrap();
        let back = store.update_participation(&back, Some(now)).await.unwrap();
        assert_eq!(back.status, challenge_market_core::ParticipationStatus::Pending);
    }

    #[tokio::test]
    async fn test_admission_rechecks_stored_challenge() {
        let (store, mut challenge) = store_with_challenge(None).await;
        let now = Utc::now();
        let stayed = store
            .insert_participation(&join(&challenge), Some(now))
            .await
            .unwrap();
        let mut left = store
            .insert_participation(&join(&challenge), Some(now))
            .await
            .unwrap();
        left.withdraw(now).unwrap();
        let left = store.update_participation(&left, None).await.unwrap();

        challenge.status = ChallengeStatus::Cancelled;
        store.update_challenge(&challenge).await.unwrap();

        let err = store
            .insert_participation(&join(&challenge), Some(now))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Closed(_)));

        let mut back = left;
        back.rejoin(None, now).unwrap();
        let err = store
            .update_participation(&back, Some(now))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Closed(_)));

        // Ordinary updates of existing participations are not admissions
        let mut accepted = stayed;
        accepted.accept(None, None, now).unwrap();
        store.update_participation(&accepted, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_admission_respects_window() {
        let (store, mut challenge) = store_with_challenge(None).await;
        let now = Utc::now();
        challenge.starts_at = Some(now + Duration::days(1));
        challenge.ends_at = Some(now + Duration::days(2));
        store.update_challenge(&challenge).await.unwrap();

        let p = join(&challenge);
        let err = store.insert_participation(&p, Some(now)).await.unwrap_err();
        assert!(matches!(err, StorageError::Closed(_)));
        assert!(store
            .find_participation(challenge.id, p.user_id)
            .await
            .unwrap()
            .is_none());

        store
            .insert_participation(&p, Some(now + Duration::hours(36)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_stale_version_rejected() {
        let (store, challenge) = store_with_challenge(None).await;
        let stored = store
            .insert_participation(&join(&challenge), None)
            .await
            .unwrap();

        let mut first = stored.clone();
        first.accept(None, None, Utc::now()).unwrap();
        let updated = store.update_participation(&first, None).await.unwrap();
        assert_eq!(updated.version, 2);

        let mut second = stored;
        second.reject(None, Utc::now()).unwrap();
        let err = store.update_participation(&second, None).await.unwrap_err();
        assert!(matches!(err, StorageError::VersionConflict(_)));
    }

    #[tokio::test]
    async fn test_complete_writes_grant_once() {
        let (store, challenge) = store_with_challenge(None).await;
        let mut p = store
            .insert_participation(&join(&challenge), None)
            .await
            .unwrap();
        p.accept(None, None, Utc::now()).unwrap();
        let p = store.update_participation(&p, None).await.unwrap();

        let reward = RewardInstruction::xp_only(40);
        let mut done = p.clone();
        done.complete(&reward, None, Utc::now()).unwrap();
        let grant = RewardGrant::new(done.id, challenge.id, done.user_id, reward, Utc::now());
        let stored = store.complete_participation(&done, &grant).await.unwrap();
        assert!(stored.reward_awarded);

        let fetched = store.grant_for_participation(p.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, grant.id);

        // A replay carrying the stale version never reaches the grant table
        let err = store.complete_participation(&done, &grant).await.unwrap_err();
        assert!(matches!(err, StorageError::VersionConflict(_)));
    }

    #[tokio::test]
    async fn test_delete_blocked_by_active_participant() {
        let (store, challenge) = store_with_challenge(None).await;
        let mut p = store
            .insert_participation(&join(&challenge), None)
            .await
            .unwrap();
        p.accept(None, None, Utc::now()).unwrap();
        let p = store.update_participation(&p, None).await.unwrap();

        let err = store.delete_challenge(challenge.id).await.unwrap_err();
        assert!(matches!(err, StorageError::Invariant(_)));

        let mut failed = p.clone();
        failed.fail(None, Utc::now()).unwrap();
        store.update_participation(&failed, None).await.unwrap();
        store.delete_challenge(challenge.id).await.unwrap();

        assert!(store.get_challenge(challenge.id).await.unwrap().is_none());
        assert!(store.get_participation(p.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_grant_attempt_is_compare_and_set() {
        let (store, challenge) = store_with_challenge(None).await;
        let grant = completed_with_grant(&store, &challenge).await;
        let now = Utc::now();
        let lease = now + Duration::seconds(60);

        assert!(store.claim_grant_attempt(grant.id, 0, now, lease).await.unwrap());
        assert!(!store.claim_grant_attempt(grant.id, 0, now, lease).await.unwrap());

        store
            .record_grant_failure(grant.id, "ledger down", false)
            .await
            .unwrap();
        let pending = store.pending_grants(5, 10, now).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 1);
        assert_eq!(pending[0].last_error.as_deref(), Some("ledger down"));
        assert!(pending[0].claimed_until.is_none());

        assert!(store.pending_grants(1, 10, now).await.unwrap().is_empty());

        store.mark_grant_delivered(grant.id, Utc::now()).await.unwrap();
        assert!(store.pending_grants(5, 10, now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_in_flight_claim_hides_grant_until_lease_lapses() {
        let (store, challenge) = store_with_challenge(None).await;
        let grant = completed_with_grant(&store, &challenge).await;
        let now = Utc::now();
        let lease = now + Duration::seconds(60);

        assert!(store.claim_grant_attempt(grant.id, 0, now, lease).await.unwrap());
        assert!(store.pending_grants(5, 10, now).await.unwrap().is_empty());
        assert!(!store.claim_grant_attempt(grant.id, 1, now, lease).await.unwrap());

        // A dispatcher that died mid-delivery leaves the grant to the next scan
        let later = lease + Duration::seconds(1);
        let pending = store.pending_grants(5, 10, later).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 1);
        assert!(store
            .claim_grant_attempt(grant.id, 1, later, later + Duration::seconds(60))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_list_challenges_newest_first_with_paging() {
        let store = MemoryStore::new();
        let owner = UserId::new();
        let base = Utc::now();
        for i in 0..3 {
            let challenge = Challenge::from_draft(
                owner,
                ChallengeDraft::new(format!("c{}", i), ChallengeType::SpeedChallenge),
                base + chrono::Duration::seconds(i),
            );
            store.insert_challenge(&challenge).await.unwrap();
        }

        let all = store
            .list_challenges(&ChallengeFilter::default())
            .await
            .unwrap();
        let titles: Vec<&str> = all.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["c2", "c1", "c0"]);

        let page = store
            .list_challenges(&ChallengeFilter {
                limit: Some(1),
                offset: 1,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page[0].title, "c1");
    }
}
