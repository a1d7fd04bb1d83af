pub mod routes;

use crate::state::AppState;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(routes::get_health))
        .route("/api/investments/timeseries", get(routes::get_timeseries))
        .route("/api/kpis", get(routes::get_kpis))
        .route("/api/daily", get(routes::get_daily))
        .route("/api/daily-changes", get(routes::get_daily_changes))
        .route("/api/earnings", get(routes::get_earnings))
        .route("/api/history", get(routes::get_history))
        .route("/api/timezones", get(routes::get_timezones))
        .route("/api/samples", post(routes::post_sample))
        .route("/api/deploys/{deploy_id}", get(routes::get_deploy))
        .route("/api/deploys/{deploy_id}/rows", post(routes::post_deploy_row))
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .with_state(state)
}
