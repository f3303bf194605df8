//! API route handlers.
//!
//! Each submodule handles a specific group of endpoints:
//! - `public`: Health and the challenge catalog (caller optional)
//! - `entrepreneur`: Challenge management and participant review
//! - `client`: Joining, proof submission and own participations

pub mod client;
pub mod entrepreneur;
pub mod public;

use serde::{Deserialize, Serialize};

use crate::views::ParticipationView;

/// Single participation returned by any state-changing participation endpoint
#[derive(Debug, Serialize)]
pub struct ParticipationResponse {
    pub success: bool,
    pub participation: ParticipationView,
}

impl ParticipationResponse {
    pub fn new(participation: ParticipationView) -> Self {
        Self {
            success: true,
            participation,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ParticipationsResponse {
    pub success: bool,
    pub participations: Vec<ParticipationView>,
}

impl ParticipationsResponse {
    pub fn new(participations: Vec<ParticipationView>) -> Self {
        Self {
            success: true,
            participations,
        }
    }
}

/// Optional free-text note carried by owner decisions
#[derive(Debug, Default, Deserialize)]
pub struct NoteRequest {
    #[serde(default)]
    pub response: Option<String>,
}
