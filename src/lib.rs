pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, patch, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::database::store::Store;
use crate::services::{
    assessment_service::AssessmentService, attempt_service::AttemptService,
    security_service::SecurityService,
};
use crate::utils::time::Clock;

#[derive(Clone)]
pub struct AppState {
    pub jwt_secret: Arc<str>,
    pub attempt_service: AttemptService,
    pub assessment_service: AssessmentService,
    pub security_service: SecurityService,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, jwt_secret: &str) -> Self {
        Self {
            attempt_service: AttemptService::new(store.clone(), clock.clone()),
            assessment_service: AssessmentService::new(store.clone(), clock.clone()),
            security_service: SecurityService::new(store, clock),
            jwt_secret: Arc::from(jwt_secret),
        }
    }
}

/// Full HTTP surface. Everything under `/api` requires a bearer token.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/assessments", post(routes::assessments::create_assessment))
        .route(
            "/api/assessments/:id/statistics",
            get(routes::assessments::get_statistics),
        )
        .route(
            "/api/assessments/:id/attempts",
            post(routes::attempts::start_attempt),
        )
        .route(
            "/api/assessments/:id/attempts/current",
            get(routes::attempts::get_current_attempt),
        )
        .route(
            "/api/assessments/:id/results",
            get(routes::attempts::get_results),
        )
        .route(
            "/api/assessments/:id/results/release",
            post(routes::assessments::release_results),
        )
        .route(
            "/api/attempts/:id/answers",
            patch(routes::attempts::save_answer),
        )
        .route(
            "/api/attempts/:id/submit",
            post(routes::attempts::submit_attempt),
        )
        .route(
            "/api/attempts/:id/pause",
            post(routes::attempts::pause_attempt),
        )
        .route(
            "/api/attempts/:id/resume",
            post(routes::attempts::resume_attempt),
        )
        .route(
            "/api/attempts/:id/events",
            post(routes::attempts::record_event),
        )
        .route(
            "/api/attempts/:id/grades",
            post(routes::attempts::grade_response),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_bearer_auth,
        ));

    Router::new()
        .route("/health", get(routes::health::health))
        .merge(api)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024))
}
