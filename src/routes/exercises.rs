use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;

use crate::response::{ok, AppError};
use crate::services::progress::{self, NewExercise};
use crate::state::AppState;
use crate::types::Correctness;

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    answer: String,
}

#[derive(Debug, Deserialize)]
struct CorrectRequest {
    correctness: Correctness,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/exercises", post(create_exercise))
        .route("/exercises/:id/submit", post(submit))
        .route("/exercises/:id/correct", post(correct))
        .route("/exercises/:id/evaluate", post(evaluate))
}

async fn create_exercise(
    State(state): State<AppState>,
    Path(subject): Path<String>,
    Json(payload): Json<NewExercise>,
) -> Result<impl IntoResponse, AppError> {
    let instance = progress::create_exercise(state.store(), &subject, payload).await?;
    Ok(ok(instance))
}

async fn submit(
    State(state): State<AppState>,
    Path((subject, id)): Path<(String, String)>,
    Json(payload): Json<SubmitRequest>,
) -> Result<impl IntoResponse, AppError> {
    let instance = progress::submit_exercise(state.store(), &subject, &id, payload.answer).await?;
    Ok(ok(instance))
}

async fn correct(
    State(state): State<AppState>,
    Path((subject, id)): Path<(String, String)>,
    Json(payload): Json<CorrectRequest>,
) -> Result<impl IntoResponse, AppError> {
    let instance = progress::correct_exercise(state.store(), &subject, &id, payload.correctness).await?;
    Ok(ok(instance))
}

async fn evaluate(
    State(state): State<AppState>,
    Path((subject, id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let cancel = state.request_token();
    let instance = progress::evaluate_exercise(state.store(), state.oracle(), &subject, &id, &cancel).await?;
    Ok(ok(instance))
}
