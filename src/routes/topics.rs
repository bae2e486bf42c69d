use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{delete, get, put};
use axum::{Json, Router};

use crate::response::{ok, AppError};
use crate::services::{progress, selector};
use crate::state::AppState;
use crate::types::Topic;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/topics", put(upsert_topics))
        .route("/topics/ranked", get(ranked))
        .route("/topics/:id", delete(delete_topic))
}

async fn upsert_topics(
    State(state): State<AppState>,
    Path(subject): Path<String>,
    Json(payload): Json<Vec<Topic>>,
) -> Result<impl IntoResponse, AppError> {
    let topics = progress::upsert_topics(state.store(), &subject, payload).await?;
    Ok(ok(topics))
}

async fn ranked(State(state): State<AppState>, Path(subject): Path<String>) -> Result<impl IntoResponse, AppError> {
    let topics = selector::ranked_topics(state.store(), &subject).await?;
    Ok(ok(topics))
}

async fn delete_topic(
    State(state): State<AppState>,
    Path((subject, id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    progress::delete_topic(state.store(), &subject, &id).await?;
    Ok(ok(serde_json::json!({ "deleted": id })))
}

pub(super) async fn overview(
    State(state): State<AppState>,
    Path(subject): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let summary = progress::topic_stats_summary(state.store(), &subject).await?;
    Ok(ok(summary))
}
