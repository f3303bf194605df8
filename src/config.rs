//! Engine Configuration
//!
//! Defines the tunables of the challenge engine:
//! - Input limits (text lengths, reward ceiling, page sizes)
//! - Reward re-delivery policy
//! - Gamification ledger endpoint

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub limits: Limits,
    pub rewards: RewardConfig,
    pub ledger: LedgerConfig,
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }
}

/// Input limits enforced before anything is written
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Maximum challenge title length, in characters
    pub max_title_len: usize,
    pub max_description_len: usize,
    /// Join messages and entrepreneur responses
    pub max_message_len: usize,
    pub max_proof_text_len: usize,
    pub max_xp_reward: u32,
    /// Longest participation time limit a challenge may set
    pub max_time_limit_days: u32,
    pub default_page_size: usize,
    pub max_page_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_title_len: 200,
            max_description_len: 5000,
            max_message_len: 2000,
            max_proof_text_len: 5000,
            max_xp_reward: 100_000,
            max_time_limit_days: 3650,
            default_page_size: 20,
            max_page_size: 100,
        }
    }
}

impl Limits {
    /// Resolve a requested page size against the default and the ceiling
    pub fn page_size(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size.max(1))
    }
}

/// Reward outbox re-delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    /// How often the retry worker scans for pending grants
    pub retry_interval_secs: u64,
    /// Delivery attempts before a grant is abandoned
    pub max_attempts: u32,
    /// Grants handled per scan
    pub batch_size: usize,
    /// How long a claimed delivery attempt keeps other dispatchers away.
    /// Must outlast the ledger request timeout.
    pub claim_lease_secs: u64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            retry_interval_secs: 30,
            max_attempts: 8,
            batch_size: 50,
            claim_lease_secs: 60,
        }
    }
}

/// Gamification ledger endpoint; without a base URL rewards go to the no-op ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub base_url: Option<String>,
    #[serde(skip_serializing)]
    pub api_token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_token: None,
            timeout_secs: 10,
        }
    }
}
