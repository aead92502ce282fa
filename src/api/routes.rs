//! API route definitions

use crate::auth::{AccessScope, ApiKeyProvider, AuthManager, AuthService};
use crate::config::SwitchboardConfig;
use crate::orchestrator::JobOrchestrator;
use axum::{
    Router, middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::handlers;
use super::middleware::{RateLimiter, rate_limit, request_id};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<JobOrchestrator>,
    pub config: Arc<SwitchboardConfig>,
    pub prometheus_handle: metrics_exporter_prometheus::PrometheusHandle,
}

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    let provider = Arc::new(ApiKeyProvider::from_config(&state.config));
    let auth = AuthService::new(Arc::new(AuthManager::new(vec![provider])));
    let limiter = Arc::new(RateLimiter::new(&state.config.security.rate_limit));

    let api = Router::new()
        .route("/v1/models", get(handlers::list_models))
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/jobs", post(handlers::create_job))
        .route("/jobs/{id}", get(handlers::get_job))
        .route("/jobs/{id}/result", get(handlers::get_job_result))
        .route("/jobs/{id}/cancel", post(handlers::cancel_job))
        .route_layer(middleware::from_fn(auth.middleware(AccessScope::Api)));

    let admin = Router::new()
        .route("/status", get(handlers::status))
        .route("/queue", get(handlers::queue_info))
        .route("/admin/switch", post(handlers::admin_switch))
        .route("/admin/drain", post(handlers::admin_drain))
        .route("/admin/stop", post(handlers::admin_stop))
        .route_layer(middleware::from_fn(auth.middleware(AccessScope::Admin)));

    let mut health = Router::new().route("/health", get(handlers::health));
    if !state.config.security.health_without_api_key {
        health = health.route_layer(middleware::from_fn(auth.middleware(AccessScope::Admin)));
    }

    Router::new()
        .merge(api)
        .merge(admin)
        .merge(health)
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(request_id))
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn_with_state(limiter, rate_limit)),
        )
}
