//! Input checks shared by the catalog and participation operations

use challenge_market_core::Challenge;

use crate::config::Limits;
use crate::error::{EngineError, Result};

/// Reject `value` when it is longer than `max` characters
pub fn check_len(field: &str, value: &str, max: usize) -> Result<()> {
    let len = value.chars().count();
    if len > max {
        return Err(EngineError::validation(format!(
            "{} must be at most {} characters (got {})",
            field, max, len
        )));
    }
    Ok(())
}

/// Optional free text: trimmed, empty becomes `None`, length checked
pub fn optional_text(field: &str, value: Option<String>, max: usize) -> Result<Option<String>> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if v.is_empty() => Ok(None),
        Some(v) => {
            check_len(field, &v, max)?;
            Ok(Some(v))
        }
        None => Ok(None),
    }
}

fn positive(field: &str, value: Option<u32>) -> Result<()> {
    match value {
        Some(0) => Err(EngineError::validation(format!(
            "{} must be greater than zero",
            field
        ))),
        _ => Ok(()),
    }
}

/// Check a fully built or merged challenge against the configured limits
pub fn validate_challenge(challenge: &Challenge, limits: &Limits) -> Result<()> {
    if challenge.title.is_empty() {
        return Err(EngineError::validation("title is required"));
    }
    check_len("title", &challenge.title, limits.max_title_len)?;
    check_len(
        "description",
        &challenge.description,
        limits.max_description_len,
    )?;
    if let Some(description) = challenge.reward_description.as_deref() {
        check_len(
            "reward_description",
            description,
            limits.max_description_len,
        )?;
    }

    positive("target_count", challenge.target_count)?;
    positive("time_limit_days", challenge.time_limit_days)?;
    positive("max_participants", challenge.max_participants)?;
    if let Some(days) = challenge.time_limit_days {
        if days > limits.max_time_limit_days {
            return Err(EngineError::validation(format!(
                "time_limit_days must be at most {}",
                limits.max_time_limit_days
            )));
        }
    }

    if challenge.xp_reward > limits.max_xp_reward {
        return Err(EngineError::validation(format!(
            "xp_reward must be at most {}",
            limits.max_xp_reward
        )));
    }
    if let Some(badge) = challenge.badge_code.as_deref() {
        if badge.trim().is_empty() {
            return Err(EngineError::validation("badge_code must not be empty"));
        }
    }
    if let Some(bonus) = challenge.bonus_value {
        if !bonus.is_finite() || bonus < 0.0 {
            return Err(EngineError::validation(
                "bonus_value must be a non-negative number",
            ));
        }
    }
    if let (Some(starts_at), Some(ends_at)) = (challenge.starts_at, challenge.ends_at) {
        if ends_at <= starts_at {
            return Err(EngineError::validation("ends_at must be after starts_at"));
        }
    }
    Ok(())
}
