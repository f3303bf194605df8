//! Challenge & Participation Engine
//!
//! Entrepreneurs publish time-boxed challenges that clients join, progress
//! through and get rewarded for completing. The engine owns the participation
//! state machine, capacity limits, proof review and the one-time hand-off of
//! rewards to the gamification ledger.
//!
//! ## Module Structure
//!
//! - `auth`: the authenticated caller (`Principal`) passed into every operation
//! - `challenges`: challenge catalog (create, activate, update, delete, list)
//! - `lifecycle`: participation façade (join, respond, withdraw, complete, fail)
//! - `progress`: progress reporting, proof submission and verification
//! - `reward`: reward dispatcher writing and delivering the grant outbox
//! - `ledger`: gamification ledger clients
//! - `worker`: background reward re-delivery
//! - `api`: axum REST surface

pub mod access;
pub mod api;
pub mod auth;
pub mod challenges;
pub mod config;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod progress;
pub mod reward;
pub mod validation;
pub mod views;
pub mod worker;

pub use auth::{Principal, Role};
pub use challenges::ChallengeCatalog;
pub use config::{EngineConfig, LedgerConfig, Limits, RewardConfig};
pub use error::{EngineError, Result};
pub use ledger::{GamificationLedger, HttpLedger, LedgerError, NoopLedger};
pub use lifecycle::ChallengeService;
pub use progress::ProgressEngine;
pub use reward::{DeliveryOutcome, RetrySummary, RewardDispatcher};
pub use views::{
    ChallengeView, OwnerChallengeSummary, ParticipationSummary, ParticipationView, ProgressView,
};
pub use worker::RewardRetryWorker;

pub use challenge_market_core as core;
pub use challenge_market_storage as storage;
