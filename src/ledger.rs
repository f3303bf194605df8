//! Gamification ledger clients
//!
//! The ledger owns XP, levels and badges. The engine only tells it that a
//! participation completed and what to award; the grant id travels along as an
//! idempotency key so a re-delivered grant is never counted twice.

use async_trait::async_trait;
use challenge_market_core::{RewardGrantId, RewardInstruction, UserId};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::LedgerConfig;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// The ledger answered and refused the award
    #[error("ledger rejected award: {0}")]
    Rejected(String),

    /// The ledger could not be reached or did not answer in time
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait GamificationLedger: Send + Sync {
    /// Award the reward of one completed participation to `user_id`
    async fn award_challenge_completed(
        &self,
        grant_id: RewardGrantId,
        user_id: UserId,
        reward: &RewardInstruction,
    ) -> Result<(), LedgerError>;
}

#[derive(Debug, Serialize)]
struct AwardRequest<'a> {
    idempotency_key: RewardGrantId,
    user_id: UserId,
    #[serde(flatten)]
    reward: &'a RewardInstruction,
}

/// JSON-over-HTTP ledger client
pub struct HttpLedger {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpLedger {
    pub fn new(
        base_url: impl Into<String>,
        api_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::Unavailable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token,
        })
    }

    pub fn from_config(config: &LedgerConfig, base_url: &str) -> Result<Self, LedgerError> {
        Self::new(
            base_url,
            config.api_token.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn award_url(&self) -> String {
        format!("{}/api/v1/rewards/challenge-completed", self.base_url)
    }
}

#[async_trait]
impl GamificationLedger for HttpLedger {
    async fn award_challenge_completed(
        &self,
        grant_id: RewardGrantId,
        user_id: UserId,
        reward: &RewardInstruction,
    ) -> Result<(), LedgerError> {
        let body = AwardRequest {
            idempotency_key: grant_id,
            user_id,
            reward,
        };

        let mut request = self.client.post(self.award_url()).json(&body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| LedgerError::Unavailable(format!("failed to reach ledger: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LedgerError::Rejected(format!(
                "ledger returned {}: {}",
                status,
                detail.trim()
            )));
        }

        debug!(grant_id = %grant_id, user_id = %user_id, xp = reward.xp, "Ledger accepted award");
        Ok(())
    }
}

/// Ledger used when none is configured; accepts every award
#[derive(Debug, Default)]
pub struct NoopLedger;

#[async_trait]
impl GamificationLedger for NoopLedger {
    async fn award_challenge_completed(
        &self,
        grant_id: RewardGrantId,
        user_id: UserId,
        reward: &RewardInstruction,
    ) -> Result<(), LedgerError> {
        info!(
            grant_id = %grant_id,
            user_id = %user_id,
            xp = reward.xp,
            "No ledger configured, award dropped"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn reward() -> RewardInstruction {
        RewardInstruction {
            xp: 150,
            coins: Some(20),
            badge_code: Some("speedster".to_string()),
            bonus_value: None,
        }
    }

    #[tokio::test]
    async fn test_award_posts_instruction_with_idempotency_key() {
        let server = MockServer::start();
        let grant_id = RewardGrantId::new();
        let user_id = UserId::new();

        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/api/v1/rewards/challenge-completed")
                .header("authorization", "Bearer secret")
                .json_body(serde_json::json!({
                    "idempotency_key": grant_id.to_string(),
                    "user_id": user_id.to_string(),
                    "xp": 150,
                    "coins": 20,
                    "badge_code": "speedster"
                }));
            then.status(200);
        });

        let ledger = HttpLedger::new(
            server.base_url(),
            Some("secret".to_string()),
            Duration::from_secs(5),
        )
        .unwrap();
        let result = ledger
            .award_challenge_completed(grant_id, user_id, &reward())
            .await;

        assert!(result.is_ok());
        mock.assert();
    }

    #[tokio::test]
    async fn test_award_server_error_is_rejected() {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(POST).path("/api/v1/rewards/challenge-completed");
            then.status(500).body("ledger down for maintenance");
        });

        let ledger = HttpLedger::new(server.base_url(), None, Duration::from_secs(5)).unwrap();
        let err = ledger
            .award_challenge_completed(RewardGrantId::new(), UserId::new(), &reward())
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::Rejected(_)));
        assert!(err.to_string().contains("maintenance"));
    }

    #[tokio::test]
    async fn test_award_connection_error_is_unavailable() {
        let ledger =
            HttpLedger::new("http://127.0.0.1:65534", None, Duration::from_secs(2)).unwrap();

        let err = ledger
            .award_challenge_completed(RewardGrantId::new(), UserId::new(), &reward())
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::Unavailable(_)));
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let ledger =
            HttpLedger::new("http://ledger.local/", None, Duration::from_secs(1)).unwrap();
        assert_eq!(
            ledger.award_url(),
            "http://ledger.local/api/v1/rewards/challenge-completed"
        );
    }

    #[tokio::test]
    async fn test_noop_ledger_accepts() {
        let result = NoopLedger
            .award_challenge_completed(RewardGrantId::new(), UserId::new(), &reward())
            .await;
        assert!(result.is_ok());
    }
}
