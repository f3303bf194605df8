//! REST API implementation.

pub mod errors;
pub mod extract;
pub mod routes;
pub mod state;

pub use errors::ApiError;
pub use extract::{ApiJson, ApiPath, ApiQuery, Caller, MaybeCaller, OptionalJson};
pub use state::ApiState;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use routes::{client, entrepreneur, public};

/// Build the full router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        // Public
        .route("/health", get(public::health))
        .route(
            "/api/v1/challenges",
            get(public::list_challenges).post(entrepreneur::create_challenge),
        )
        .route(
            "/api/v1/challenges/:id",
            get(public::get_challenge)
                .patch(entrepreneur::update_challenge)
                .delete(entrepreneur::delete_challenge),
        )
        // Entrepreneur
        .route(
            "/api/v1/challenges/:id/activate",
            post(entrepreneur::activate_challenge),
        )
        .route(
            "/api/v1/challenges/:id/cancel",
            post(entrepreneur::cancel_challenge),
        )
        .route(
            "/api/v1/challenges/:id/close",
            post(entrepreneur::close_challenge),
        )
        .route(
            "/api/v1/challenges/:id/participants",
            get(entrepreneur::list_participants),
        )
        .route(
            "/api/v1/entrepreneur/challenges",
            get(entrepreneur::list_own_challenges),
        )
        .route(
            "/api/v1/entrepreneur/proofs",
            get(entrepreneur::list_pending_proofs),
        )
        .route(
            "/api/v1/participations/:id/respond",
            post(entrepreneur::respond),
        )
        .route(
            "/api/v1/participations/:id/progress",
            get(client::get_progress).post(entrepreneur::update_progress),
        )
        .route(
            "/api/v1/participations/:id/complete",
            post(entrepreneur::mark_completed),
        )
        .route(
            "/api/v1/participations/:id/fail",
            post(entrepreneur::mark_failed),
        )
        .route(
            "/api/v1/participations/:id/verify",
            post(entrepreneur::verify_proof),
        )
        // Client
        .route("/api/v1/challenges/:id/join", post(client::join_challenge))
        .route(
            "/api/v1/me/participations",
            get(client::list_my_participations),
        )
        .route(
            "/api/v1/participations/:id/withdraw",
            post(client::withdraw),
        )
        .route(
            "/api/v1/participations/:id/proof",
            post(client::submit_proof),
        )
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Bind and serve the API until the process stops
pub async fn serve(host: &str, port: u16, state: Arc<ApiState>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Challenge market API listening on {}", addr);

    axum::serve(listener, router(state)).await?;

    Ok(())
}
