use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Deserialize;

use crate::response::{ok, AppError};
use crate::services::{progress, selector};
use crate::state::AppState;
use crate::types::Document;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StudiedPagesRequest {
    #[serde(alias = "studiedPages")]
    range: String,
}

#[derive(Debug, Deserialize)]
struct FocusQuery {
    limit: Option<usize>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/documents", put(upsert_document))
        .route("/documents/focus", get(study_focus))
        .route("/documents/:id", get(get_document).delete(delete_document))
        .route("/documents/:id/studied-pages", put(mark_studied))
}

async fn upsert_document(
    State(state): State<AppState>,
    Path(subject): Path<String>,
    Json(payload): Json<Document>,
) -> Result<impl IntoResponse, AppError> {
    if payload.id.trim().is_empty() {
        return Err(AppError::validation("document id must not be empty"));
    }
    let doc = progress::upsert_document(state.store(), &subject, payload).await?;
    Ok(ok(doc))
}

async fn get_document(
    State(state): State<AppState>,
    Path((subject, id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let doc = progress::get_document(state.store(), &subject, &id).await?;
    Ok(ok(doc))
}

async fn delete_document(
    State(state): State<AppState>,
    Path((subject, id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    progress::delete_document(state.store(), &subject, &id).await?;
    Ok(ok(serde_json::json!({ "deleted": id })))
}

async fn mark_studied(
    State(state): State<AppState>,
    Path((subject, id)): Path<(String, String)>,
    Json(payload): Json<StudiedPagesRequest>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = progress::mark_studied(state.store(), &subject, &id, &payload.range).await?;
    Ok(ok(outcome))
}

async fn study_focus(
    State(state): State<AppState>,
    Path(subject): Path<String>,
    Query(query): Query<FocusQuery>,
) -> Result<impl IntoResponse, AppError> {
    let limit = query.limit.unwrap_or(state.engine().study_focus_limit);
    let docs = selector::study_focus_for_subject(state.store(), &subject, limit).await?;
    Ok(ok(docs))
}
