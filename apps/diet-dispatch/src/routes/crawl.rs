use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use broker_bus::PublishOutcome;
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct RunResponse {
    /// False when no queue was bound and the broker dropped the signal.
    pub routed: bool,
}

pub async fn run_crawl(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<RunResponse>), ApiError> {
    let Some(publisher) = state.trigger() else {
        return Ok((StatusCode::NOT_FOUND, Json(RunResponse { routed: false })));
    };
    let outcome = publisher.broadcast_run().await?;
    Ok((
        StatusCode::OK,
        Json(RunResponse {
            routed: outcome == PublishOutcome::Routed,
        }),
    ))
}

pub fn crawl_routes() -> Router<AppState> {
    Router::new().route("/api/crawl/run", post(run_crawl))
}
