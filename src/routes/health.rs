use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    database: &'static str,
    oracle_backends: Vec<String>,
    uptime: u64,
}

pub async fn health(State(state): State<AppState>) -> Response {
    let connected = match sqlx::query("SELECT 1").execute(state.store().pool()).await {
        Ok(_) => true,
        Err(err) => {
            tracing::warn!(error = %err, "health check query failed");
            false
        }
    };

    let body = HealthResponse {
        status: if connected { "ok" } else { "degraded" },
        database: if connected { "connected" } else { "disconnected" },
        oracle_backends: state.oracle().backend_names(),
        uptime: state.uptime_seconds(),
    };
    let status = if connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}
