//! Entrepreneur endpoints.
//!
//! Challenge management for the caller's own challenges and the review side
//! of participations: accepting, progress reporting, completion and proof
//! verification. All routes require the entrepreneur role.

use axum::{extract::State, http::StatusCode, Json};
use challenge_market_core::{Challenge, ChallengeDraft, ChallengeId, ChallengePatch, ParticipationId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{NoteRequest, ParticipationResponse, ParticipationsResponse};
use crate::api::{ApiError, ApiJson, ApiPath, ApiQuery, ApiState, Caller, OptionalJson};
use crate::views::OwnerChallengeSummary;

// ============================================================================
// CHALLENGE MANAGEMENT
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ChallengeResponse {
    pub success: bool,
    pub challenge: Challenge,
}

impl ChallengeResponse {
    fn ok(challenge: Challenge) -> Json<Self> {
        Json(Self {
            success: true,
            challenge,
        })
    }
}

/// POST /api/v1/challenges
///
/// Creates a Draft challenge owned by the caller.
pub async fn create_challenge(
    State(state): State<Arc<ApiState>>,
    Caller(caller): Caller,
    ApiJson(draft): ApiJson<ChallengeDraft>,
) -> Result<(StatusCode, Json<ChallengeResponse>), ApiError> {
    let challenge = state.service.catalog().create(&caller, draft).await?;
    Ok((StatusCode::CREATED, ChallengeResponse::ok(challenge)))
}

/// PATCH /api/v1/challenges/{id}
pub async fn update_challenge(
    State(state): State<Arc<ApiState>>,
    Caller(caller): Caller,
    ApiPath(id): ApiPath<ChallengeId>,
    ApiJson(patch): ApiJson<ChallengePatch>,
) -> Result<Json<ChallengeResponse>, ApiError> {
    let challenge = state.service.catalog().update(&caller, id, patch).await?;
    Ok(ChallengeResponse::ok(challenge))
}

/// DELETE /api/v1/challenges/{id}
///
/// Refused while the challenge has occupying participants.
pub async fn delete_challenge(
    State(state): State<Arc<ApiState>>,
    Caller(caller): Caller,
    ApiPath(id): ApiPath<ChallengeId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.service.catalog().delete(&caller, id).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "deleted": id,
    })))
}

/// POST /api/v1/challenges/{id}/activate
pub async fn activate_challenge(
    State(state): State<Arc<ApiState>>,
    Caller(caller): Caller,
    ApiPath(id): ApiPath<ChallengeId>,
) -> Result<Json<ChallengeResponse>, ApiError> {
    let challenge = state.service.catalog().activate(&caller, id).await?;
    Ok(ChallengeResponse::ok(challenge))
}

/// POST /api/v1/challenges/{id}/cancel
pub async fn cancel_challenge(
    State(state): State<Arc<ApiState>>,
    Caller(caller): Caller,
    ApiPath(id): ApiPath<ChallengeId>,
) -> Result<Json<ChallengeResponse>, ApiError> {
    let challenge = state.service.catalog().cancel(&caller, id).await?;
    Ok(ChallengeResponse::ok(challenge))
}

/// POST /api/v1/challenges/{id}/close
pub async fn close_challenge(
    State(state): State<Arc<ApiState>>,
    Caller(caller): Caller,
    ApiPath(id): ApiPath<ChallengeId>,
) -> Result<Json<ChallengeResponse>, ApiError> {
    let challenge = state.service.catalog().close(&caller, id).await?;
    Ok(ChallengeResponse::ok(challenge))
}

#[derive(Debug, Serialize)]
pub struct OwnChallengesResponse {
    pub success: bool,
    pub challenges: Vec<OwnerChallengeSummary>,
}

/// GET /api/v1/entrepreneur/challenges
///
/// Every challenge the caller owns, with participant and review counts.
pub async fn list_own_challenges(
    State(state): State<Arc<ApiState>>,
    Caller(caller): Caller,
) -> Result<Json<OwnChallengesResponse>, ApiError> {
    let challenges = state.service.catalog().list_own(&caller).await?;
    Ok(Json(OwnChallengesResponse {
        success: true,
        challenges,
    }))
}

// ============================================================================
// PARTICIPANT REVIEW
// ============================================================================

/// GET /api/v1/challenges/{id}/participants
pub async fn list_participants(
    State(state): State<Arc<ApiState>>,
    Caller(caller): Caller,
    ApiPath(id): ApiPath<ChallengeId>,
) -> Result<Json<ParticipationsResponse>, ApiError> {
    let participations = state.service.list_participants(&caller, id).await?;
    Ok(Json(ParticipationsResponse::new(participations)))
}

#[derive(Debug, Deserialize)]
pub struct PendingProofsQuery {
    pub challenge_id: Option<ChallengeId>,
}

/// GET /api/v1/entrepreneur/proofs
///
/// Proof awaiting verification, oldest submission first.
pub async fn list_pending_proofs(
    State(state): State<Arc<ApiState>>,
    Caller(caller): Caller,
    ApiQuery(query): ApiQuery<PendingProofsQuery>,
) -> Result<Json<ParticipationsResponse>, ApiError> {
    let participations = state
        .service
        .list_pending_proofs(&caller, query.challenge_id)
        .await?;
    Ok(Json(ParticipationsResponse::new(participations)))
}

#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    pub accept: bool,
    #[serde(default)]
    pub response: Option<String>,
}

/// POST /api/v1/participations/{id}/respond
///
/// Accept (starting the deadline clock) or reject a pending participation.
pub async fn respond(
    State(state): State<Arc<ApiState>>,
    Caller(caller): Caller,
    ApiPath(id): ApiPath<ParticipationId>,
    ApiJson(req): ApiJson<RespondRequest>,
) -> Result<Json<ParticipationResponse>, ApiError> {
    let participation = state
        .service
        .respond(&caller, id, req.accept, req.response)
        .await?;
    Ok(Json(ParticipationResponse::new(participation)))
}

#[derive(Debug, Deserialize)]
pub struct ProgressRequest {
    pub progress: u32,
}

/// POST /api/v1/participations/{id}/progress
pub async fn update_progress(
    State(state): State<Arc<ApiState>>,
    Caller(caller): Caller,
    ApiPath(id): ApiPath<ParticipationId>,
    ApiJson(req): ApiJson<ProgressRequest>,
) -> Result<Json<ParticipationResponse>, ApiError> {
    let participation = state
        .service
        .update_progress(&caller, id, req.progress)
        .await?;
    Ok(Json(ParticipationResponse::new(participation)))
}

/// POST /api/v1/participations/{id}/complete
///
/// Completes the participation and grants the challenge reward once.
pub async fn mark_completed(
    State(state): State<Arc<ApiState>>,
    Caller(caller): Caller,
    ApiPath(id): ApiPath<ParticipationId>,
    OptionalJson(body): OptionalJson<NoteRequest>,
) -> Result<Json<ParticipationResponse>, ApiError> {
    let note = body.unwrap_or_default();
    let participation = state
        .service
        .mark_completed(&caller, id, note.response)
        .await?;
    Ok(Json(ParticipationResponse::new(participation)))
}

/// POST /api/v1/participations/{id}/fail
pub async fn mark_failed(
    State(state): State<Arc<ApiState>>,
    Caller(caller): Caller,
    ApiPath(id): ApiPath<ParticipationId>,
    OptionalJson(body): OptionalJson<NoteRequest>,
) -> Result<Json<ParticipationResponse>, ApiError> {
    let note = body.unwrap_or_default();
    let participation = state
        .service
        .mark_failed(&caller, id, note.response)
        .await?;
    Ok(Json(ParticipationResponse::new(participation)))
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub approve: bool,
    #[serde(default)]
    pub response: Option<String>,
}

/// POST /api/v1/participations/{id}/verify
///
/// Approving completes and rewards; rejecting sends the proof back.
pub async fn verify_proof(
    State(state): State<Arc<ApiState>>,
    Caller(caller): Caller,
    ApiPath(id): ApiPath<ParticipationId>,
    ApiJson(req): ApiJson<VerifyRequest>,
) -> Result<Json<ParticipationResponse>, ApiError> {
    let participation = state
        .service
        .verify_proof(&caller, id, req.approve, req.response)
        .await?;
    Ok(Json(ParticipationResponse::new(participation)))
}
