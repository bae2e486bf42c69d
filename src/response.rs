use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::services::assessment::AssessmentError;
use crate::services::coach::CoachError;
use crate::services::oracle::OracleError;
use crate::services::progress::ProgressError;
use crate::services::Stage;

#[derive(Serialize)]
pub struct SuccessResponse<T> {
    pub success: bool,
    pub data: T,
}

pub fn ok<T: Serialize>(data: T) -> Json<SuccessResponse<T>> {
    Json(SuccessResponse { success: true, data })
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
}

#[derive(Debug, Clone)]
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    stage: Option<Stage>,
    is_operational: bool,
}

impl AppError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::operational(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::operational(StatusCode::CONFLICT, "CONFLICT", message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::operational(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
    }

    pub fn unprocessable(code: &str, message: impl Into<String>) -> Self {
        Self::operational(StatusCode::UNPROCESSABLE_ENTITY, code, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "INTERNAL_ERROR".to_string(),
            message: message.into(),
            stage: None,
            is_operational: false,
        }
    }

    pub fn oracle(stage: Stage, err: &OracleError) -> Self {
        let (status, code) = match err {
            OracleError::Cancelled => (StatusCode::REQUEST_TIMEOUT, "CANCELLED"),
            OracleError::NotConfigured(_) => (StatusCode::SERVICE_UNAVAILABLE, "ORACLE_NOT_CONFIGURED"),
            OracleError::Exhausted { .. } => (StatusCode::BAD_GATEWAY, "ORACLE_UNAVAILABLE"),
            OracleError::InvalidPayload(_) => (StatusCode::BAD_GATEWAY, "ORACLE_INVALID_RESPONSE"),
        };
        Self {
            status,
            code: code.to_string(),
            message: format!("{stage} failed: {err}"),
            stage: Some(stage),
            is_operational: true,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    fn operational(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            stage: None,
            is_operational: true,
        }
    }

    fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = if self.is_operational {
            self.message
        } else {
            tracing::error!(code = %self.code, error = %self.message, "request failed");
            "internal server error".to_string()
        };

        let body = ErrorResponse {
            success: false,
            error: message,
            code: self.code,
            stage: self.stage,
        };

        (self.status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<ProgressError> for AppError {
    fn from(err: ProgressError) -> Self {
        match err {
            ProgressError::NotFound(_) => AppError::not_found(err.to_string()),
            ProgressError::Transition(_) => {
                AppError::operational(StatusCode::CONFLICT, "INVALID_TRANSITION", err.to_string())
            }
            ProgressError::Validation(_) => AppError::validation(err.to_string()),
            ProgressError::Oracle { stage, ref source } => AppError::oracle(stage, source),
            ProgressError::Sql(e) => e.into(),
        }
    }
}

impl From<AssessmentError> for AppError {
    fn from(err: AssessmentError) -> Self {
        match err {
            AssessmentError::StructureMismatch { .. } => {
                AppError::unprocessable("STRUCTURE_MISMATCH", err.to_string()).with_stage(Stage::Generation)
            }
            AssessmentError::InvalidQuestion { .. } => {
                AppError::unprocessable("INVALID_QUESTION", err.to_string()).with_stage(Stage::Generation)
            }
            AssessmentError::EmptyStructure | AssessmentError::Validation(_) => AppError::validation(err.to_string()),
            AssessmentError::NoTopics => AppError::unprocessable("NO_TOPICS", err.to_string()),
            AssessmentError::NotFound(_) => AppError::not_found(err.to_string()),
            AssessmentError::Transition(_) => {
                AppError::operational(StatusCode::CONFLICT, "INVALID_TRANSITION", err.to_string())
            }
            AssessmentError::Oracle { stage, ref source } => AppError::oracle(stage, source),
            AssessmentError::Sql(e) => e.into(),
        }
    }
}

impl From<CoachError> for AppError {
    fn from(err: CoachError) -> Self {
        match err {
            CoachError::Oracle { stage, ref source } => AppError::oracle(stage, source),
            CoachError::InvalidResponse(_) => {
                AppError::operational(StatusCode::BAD_GATEWAY, "ORACLE_INVALID_RESPONSE", err.to_string())
                    .with_stage(Stage::Sync)
            }
            CoachError::TaskLocked { .. } => {
                AppError::operational(StatusCode::CONFLICT, "TASK_LOCKED", err.to_string())
            }
            CoachError::TaskNotFound(_) | CoachError::NotFound(_) => AppError::not_found(err.to_string()),
            CoachError::Sql(e) => e.into(),
        }
    }
}
