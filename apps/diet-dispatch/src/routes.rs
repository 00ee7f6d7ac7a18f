use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde::Serialize;

use crate::metrics;
use crate::routes::crawl::crawl_routes;
use crate::routes::parameters::parameter_routes;
use crate::state::AppState;

pub mod crawl;
pub mod parameters;

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    role: &'static str,
    uptime_secs: u64,
    instance_id: String,
    parameter_queue: Option<String>,
    trigger_exchange: Option<String>,
    trigger_queue: Option<String>,
}

async fn health() -> &'static str {
    "ok"
}

/// Serving at all means provisioning succeeded, so readiness just reports
/// what was declared.
async fn ready(State(state): State<AppState>) -> Json<ReadyResponse> {
    let topology = state.topology();
    Json(ReadyResponse {
        status: "ok",
        role: state.role().as_str(),
        uptime_secs: state.uptime_secs(),
        instance_id: state.instance_id().to_string(),
        parameter_queue: topology.parameter_queue().map(str::to_string),
        trigger_exchange: topology.trigger_exchange().map(str::to_string),
        trigger_queue: topology.trigger_queue().map(str::to_string),
    })
}

async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather(),
    )
}

/// Routes for a publisher the role does not run are left unmounted.
pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/readyz", get(ready))
        .route("/metrics", get(metrics_handler));
    if state.parameters().is_some() {
        router = router.merge(parameter_routes());
    }
    if state.trigger().is_some() {
        router = router.merge(crawl_routes());
    }
    router.with_state(state)
}
