use axum::{
    http::{header, Method},
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::{EngineError, EngineResult};
pub use services::AppState;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::HeaderName::from_static(middlewares::trace::TRACE_ID_HEADER),
        ])
        .allow_origin(tower_http::cors::Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(handlers::metrics_handler).layer(middleware::from_fn_with_state(
                app_state.clone(),
                handlers::metrics_auth_middleware,
            )),
        )
        .nest("/api/v1/attempts", attempt_routes().layer(cors))
        .with_state(app_state)
        .layer(CompressionLayer::new())
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

fn attempt_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(handlers::attempts::start_section))
        .route("/{id}/responses", post(handlers::attempts::submit_response))
        .route("/{id}/complete", post(handlers::attempts::complete_attempt))
        .route("/{id}/abandon", post(handlers::attempts::abandon_attempt))
        .route("/in-progress", get(handlers::attempts::find_in_progress))
        .route(
            "/{id}/sections/{section}/next",
            get(handlers::attempts::next_question),
        )
        .route(
            "/{id}/sections/{section}/signals",
            put(handlers::attempts::update_signals),
        )
        .route(
            "/{id}/sections/{section}/close",
            post(handlers::attempts::close_section),
        )
        .route(
            "/{id}/sections/{section}/report",
            get(handlers::attempts::section_report),
        )
}
