//! Authenticated caller identity
//!
//! Session handling lives upstream; the engine only ever sees an already
//! authenticated user id and role.

use challenge_market_core::UserId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{EngineError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Client,
    Entrepreneur,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Entrepreneur => "entrepreneur",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "client" => Ok(Role::Client),
            "entrepreneur" => Ok(Role::Entrepreneur),
            other => Err(EngineError::validation(format!("unknown role: {}", other))),
        }
    }
}

/// The caller of an engine operation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub role: Role,
}

impl Principal {
    pub fn client(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Client,
        }
    }

    pub fn entrepreneur(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Entrepreneur,
        }
    }

    pub fn require_client(&self) -> Result<()> {
        match self.role {
            Role::Client => Ok(()),
            Role::Entrepreneur => Err(EngineError::forbidden("client role required")),
        }
    }

    pub fn require_entrepreneur(&self) -> Result<()> {
        match self.role {
            Role::Entrepreneur => Ok(()),
            Role::Client => Err(EngineError::forbidden("entrepreneur role required")),
        }
    }
}
