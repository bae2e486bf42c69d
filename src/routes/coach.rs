use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;

use crate::response::{ok, AppError};
use crate::services::coach;
use crate::state::AppState;
use crate::state_machine::CoachSyncState;
use crate::types::CoachSyncRecord;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CoachView {
    state: &'static str,
    active_task_id: Option<String>,
    record: Option<CoachSyncRecord>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/coach", get(get_state).delete(reset))
        .route("/coach/sync", post(sync))
        .route("/coach/tasks/:task_id/complete", post(complete_task))
}

async fn get_state(State(state): State<AppState>, Path(subject): Path<String>) -> Result<impl IntoResponse, AppError> {
    let record = coach::get(state.store(), &subject).await?;
    Ok(ok(CoachView {
        state: CoachSyncState::of(record.as_ref()).as_str(),
        active_task_id: record.as_ref().and_then(coach::active_task).map(|t| t.id.clone()),
        record,
    }))
}

async fn sync(State(state): State<AppState>, Path(subject): Path<String>) -> Result<impl IntoResponse, AppError> {
    let cancel = state.request_token();
    let outcome = coach::sync(state.store(), state.oracle(), &subject, &cancel).await?;
    Ok(ok(outcome))
}

async fn complete_task(
    State(state): State<AppState>,
    Path((subject, task_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let record = coach::complete_task(state.store(), &subject, &task_id).await?;
    Ok(ok(record))
}

async fn reset(State(state): State<AppState>, Path(subject): Path<String>) -> Result<impl IntoResponse, AppError> {
    let removed = coach::reset(state.store(), &subject).await?;
    Ok(ok(serde_json::json!({ "reset": removed })))
}
