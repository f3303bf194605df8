//! Client endpoints: joining challenges and working on participations.

use axum::{extract::State, http::StatusCode, Json};
use challenge_market_core::{ChallengeId, ParticipationId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{ParticipationResponse, ParticipationsResponse};
use crate::api::{ApiError, ApiJson, ApiPath, ApiState, Caller, OptionalJson};
use crate::views::ProgressView;

#[derive(Debug, Default, Deserialize)]
pub struct JoinRequest {
    #[serde(default)]
    pub message: Option<String>,
}

/// POST /api/v1/challenges/{id}/join
///
/// Creates a Pending participation, or reopens a rejected or withdrawn one.
pub async fn join_challenge(
    State(state): State<Arc<ApiState>>,
    Caller(caller): Caller,
    ApiPath(id): ApiPath<ChallengeId>,
    OptionalJson(body): OptionalJson<JoinRequest>,
) -> Result<(StatusCode, Json<ParticipationResponse>), ApiError> {
    let req = body.unwrap_or_default();
    let participation = state.service.join(&caller, id, req.message).await?;
    Ok((
        StatusCode::CREATED,
        Json(ParticipationResponse::new(participation)),
    ))
}

/// GET /api/v1/me/participations
pub async fn list_my_participations(
    State(state): State<Arc<ApiState>>,
    Caller(caller): Caller,
) -> Result<Json<ParticipationsResponse>, ApiError> {
    let participations = state.service.list_my_participations(&caller).await?;
    Ok(Json(ParticipationsResponse::new(participations)))
}

/// POST /api/v1/participations/{id}/withdraw
pub async fn withdraw(
    State(state): State<Arc<ApiState>>,
    Caller(caller): Caller,
    ApiPath(id): ApiPath<ParticipationId>,
) -> Result<Json<ParticipationResponse>, ApiError> {
    let participation = state.service.withdraw(&caller, id).await?;
    Ok(Json(ParticipationResponse::new(participation)))
}

#[derive(Debug, Deserialize)]
pub struct ProofRequest {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub image_ref: Option<String>,
}

/// POST /api/v1/participations/{id}/proof
pub async fn submit_proof(
    State(state): State<Arc<ApiState>>,
    Caller(caller): Caller,
    ApiPath(id): ApiPath<ParticipationId>,
    ApiJson(req): ApiJson<ProofRequest>,
) -> Result<Json<ParticipationResponse>, ApiError> {
    let participation = state
        .service
        .submit_proof(&caller, id, req.text, req.image_ref)
        .await?;
    Ok(Json(ParticipationResponse::new(participation)))
}

#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub success: bool,
    pub progress: ProgressView,
}

/// GET /api/v1/participations/{id}/progress
///
/// Visible to the participant and to the challenge owner.
pub async fn get_progress(
    State(state): State<Arc<ApiState>>,
    Caller(caller): Caller,
    ApiPath(id): ApiPath<ParticipationId>,
) -> Result<Json<ProgressResponse>, ApiError> {
    let progress = state.service.progress_view(&caller, id).await?;
    Ok(Json(ProgressResponse {
        success: true,
        progress,
    }))
}
