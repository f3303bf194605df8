//! Background workers.

pub mod reward_retry;

pub use reward_retry::{spawn_reward_retry_worker, RewardRetryWorker};
