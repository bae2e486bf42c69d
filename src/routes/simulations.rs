use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::response::{ok, AppError};
use crate::services::assessment::{self, GenerateRequest};
use crate::state::AppState;
use crate::types::SubmittedAnswer;

#[derive(Debug, Deserialize)]
struct GradeRequest {
    #[serde(default)]
    answers: Vec<SubmittedAnswer>,
}

/// Either a transcript for the oracle to grade, or a grade set by the examiner.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OralRequest {
    transcript: Option<String>,
    oral_grade: Option<f64>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/simulations", get(list).post(create))
        .route("/simulations/:id", get(get_one))
        .route("/simulations/:id/grade", post(grade))
        .route("/simulations/:id/oral", post(oral))
}

async fn list(State(state): State<AppState>, Path(subject): Path<String>) -> Result<impl IntoResponse, AppError> {
    let sims = assessment::list_simulations(state.store(), &subject).await?;
    Ok(ok(sims))
}

async fn get_one(
    State(state): State<AppState>,
    Path((subject, id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let sim = assessment::get_simulation(state.store(), &subject, &id).await?;
    Ok(ok(sim))
}

async fn create(
    State(state): State<AppState>,
    Path(subject): Path<String>,
    Json(payload): Json<GenerateRequest>,
) -> Result<impl IntoResponse, AppError> {
    let cancel = state.request_token();
    let sim = assessment::generate(state.store(), state.oracle(), state.engine(), &subject, payload, &cancel).await?;
    Ok(ok(sim))
}

async fn grade(
    State(state): State<AppState>,
    Path((subject, id)): Path<(String, String)>,
    Json(payload): Json<GradeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let cancel = state.request_token();
    let sim = assessment::grade(state.store(), state.oracle(), &subject, &id, payload.answers, &cancel).await?;
    Ok(ok(sim))
}

async fn oral(
    State(state): State<AppState>,
    Path((subject, id)): Path<(String, String)>,
    Json(payload): Json<OralRequest>,
) -> Result<impl IntoResponse, AppError> {
    let sim = match (payload.oral_grade, payload.transcript) {
        (Some(grade), _) => assessment::complete_oral(state.store(), state.engine(), &subject, &id, grade).await?,
        (None, Some(transcript)) => {
            let cancel = state.request_token();
            assessment::evaluate_oral(
                state.store(),
                state.oracle(),
                state.engine(),
                &subject,
                &id,
                transcript,
                &cancel,
            )
            .await?
        }
        (None, None) => return Err(AppError::validation("either oralGrade or transcript is required")),
    };
    Ok(ok(sim))
}
