//! API state shared by all endpoints.

use std::sync::Arc;

use crate::lifecycle::ChallengeService;

pub struct ApiState {
    pub service: Arc<ChallengeService>,
}

impl ApiState {
    pub fn new(service: Arc<ChallengeService>) -> Self {
        Self { service }
    }
}
