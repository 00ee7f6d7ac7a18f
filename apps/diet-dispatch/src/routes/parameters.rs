use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use diet_proto::ParameterRequest;
use tracing::info;

use crate::error::ApiError;
use crate::metrics;
use crate::state::AppState;

/// Validates the body and hands it to the parameter publisher. Nothing is
/// published unless every field constraint holds.
pub async fn submit_parameters(
    State(state): State<AppState>,
    body: Result<Json<ParameterRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(request) = body.map_err(|rejection| {
        metrics::REJECTED_REQUESTS.inc();
        ApiError::Malformed(rejection.body_text())
    })?;
    let message = request.validate().map_err(|err| {
        metrics::REJECTED_REQUESTS.inc();
        info!(error = %err, "rejected parameter request");
        ApiError::from(err)
    })?;
    let Some(publisher) = state.parameters() else {
        return Ok(StatusCode::NOT_FOUND);
    };
    publisher.publish(&message).await?;
    Ok(StatusCode::OK)
}

async fn probe() -> &'static str {
    "test"
}

pub fn parameter_routes() -> Router<AppState> {
    Router::new()
        .route("/api/user", post(submit_parameters))
        .route("/api/user/test", get(probe))
}
