//! Public endpoints: health and the challenge catalog.
//!
//! No authentication required. When identity headers are present the
//! caller's own participation is attached to the challenge detail.

use axum::{extract::State, Json};
use challenge_market_core::{Challenge, ChallengeId, ChallengeType};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::{ApiError, ApiPath, ApiQuery, ApiState, MaybeCaller};
use crate::challenges::ChallengeQuery;
use crate::views::ChallengeView;

// ============================================================================
// HEALTH
// ============================================================================

/// GET /health
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "challenge-market",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ============================================================================
// CATALOG
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ListChallengesQuery {
    #[serde(rename = "type")]
    pub challenge_type: Option<ChallengeType>,
    pub search: Option<String>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

#[derive(Debug, Serialize)]
pub struct ChallengeListResponse {
    pub success: bool,
    pub challenges: Vec<Challenge>,
}

/// GET /api/v1/challenges
///
/// Active challenges inside their validity window, newest first.
/// Query: `type`, `search`, `limit`, `offset`.
pub async fn list_challenges(
    State(state): State<Arc<ApiState>>,
    ApiQuery(query): ApiQuery<ListChallengesQuery>,
) -> Result<Json<ChallengeListResponse>, ApiError> {
    let challenges = state
        .service
        .catalog()
        .list_active(ChallengeQuery {
            challenge_type: query.challenge_type,
            search: query.search,
            limit: query.limit,
            offset: query.offset,
            ..Default::default()
        })
        .await?;

    Ok(Json(ChallengeListResponse {
        success: true,
        challenges,
    }))
}

#[derive(Debug, Serialize)]
pub struct ChallengeDetailResponse {
    pub success: bool,
    pub challenge: ChallengeView,
}

/// GET /api/v1/challenges/{id}
///
/// Drafts and closed challenges are only visible to their owner.
pub async fn get_challenge(
    State(state): State<Arc<ApiState>>,
    MaybeCaller(caller): MaybeCaller,
    ApiPath(id): ApiPath<ChallengeId>,
) -> Result<Json<ChallengeDetailResponse>, ApiError> {
    let challenge = state.service.catalog().get(id, caller.as_ref()).await?;
    Ok(Json(ChallengeDetailResponse {
        success: true,
        challenge,
    }))
}
