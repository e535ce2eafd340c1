pub mod cache;
pub mod clock;
pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod middleware;
pub mod models;
pub mod redis_client;
pub mod services;
pub mod store;

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use cache::AvailabilityCache;
use services::{Engine, RetryPolicy, SweepService};

// Shared state для всего приложения
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub cache: AvailabilityCache,
    pub sweeper: Arc<SweepService>,
}

impl AppState {
    pub fn new(engine: Engine, cache: AvailabilityCache, retry: RetryPolicy) -> Arc<Self> {
        let sweeper = Arc::new(SweepService::new(engine.clone(), retry));
        Arc::new(Self { engine, cache, sweeper })
    }
}

/// Full HTTP surface: `/`, `/health` and the engine API under `/api`.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Ticket Engine API v1.0" }))
        .route("/health", get(|| async { "OK" }))
        .nest("/api", controllers::routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
