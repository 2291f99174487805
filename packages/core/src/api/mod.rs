//! HTTP surface.
//!
//! [`build_router`] assembles every route over one shared [`AppState`]; the
//! binary and the integration tests use the same assembly.

pub mod cron;
pub mod trial;

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, Method},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::AppError;
use crate::metrics::{track_http, AppMetrics};
use crate::trial::{TrialManager, TrialResolver};

/// Everything the handlers need. Clients are built once in `main` and
/// injected here; nothing is global.
pub struct AppState {
    pub resolver: Arc<TrialResolver>,
    pub manager: Arc<TrialManager>,
    pub metrics: Arc<AppMetrics>,
    pub cron_token: Option<String>,
}

/// Shared state type for all routes.
pub type ApiState = Arc<AppState>;

pub fn build_router(state: AppState) -> Router {
    let state: ApiState = Arc::new(state);
    let metrics = state.metrics.clone();

    let cron_routes = Router::new()
        .route("/cron/expire-trials", post(cron::expire_trials))
        .route("/cron/process-expiring", post(cron::process_expiring))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            cron::require_cron_token,
        ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .route("/trial", post(trial::start_trial))
        .route("/trial/status", get(trial::trial_status))
        .route("/trial/access", get(trial::trial_access))
        .route("/trial/stats", get(trial::trial_stats))
        .route("/trial/:user_id/cancel", post(trial::cancel_trial))
        .route("/trial/:user_id/convert", post(trial::convert_trial))
        .merge(cron_routes)
        .layer(middleware::from_fn_with_state(metrics, track_http))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// `GET /health`: liveness probe.
pub async fn health() -> impl IntoResponse {
    ([(header::CACHE_CONTROL, "no-store")], "ok")
}

/// `GET /metrics`: Prometheus text exposition.
async fn render_metrics(State(state): State<ApiState>) -> Result<Response, AppError> {
    let body = state.metrics.render()?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response())
}
