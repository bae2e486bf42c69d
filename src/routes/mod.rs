mod coach;
mod documents;
mod exercises;
mod health;
mod simulations;
mod topics;

use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use crate::response::AppError;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let subject_routes = Router::new()
        .merge(documents::router())
        .merge(topics::router())
        .merge(exercises::router())
        .merge(simulations::router())
        .merge(coach::router())
        .route("/overview", get(topics::overview));

    Router::new()
        .route("/health", get(health::health))
        .nest("/api/subjects/:subject", subject_routes)
        .fallback(fallback_handler)
        .with_state(state)
}

async fn fallback_handler() -> Response {
    AppError::not_found("route not found").into_response()
}
