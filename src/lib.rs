pub mod config;
pub mod db;
pub mod logging;
pub mod response;
pub mod routes;
pub mod services;
pub mod state;
pub mod state_machine;
pub mod types;

use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;

/// Router with the HTTP tracing and CORS layers applied.
pub fn create_app(state: AppState) -> axum::Router {
    routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
