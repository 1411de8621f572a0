use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde::Serialize;
use thiserror::Error;

use crate::models::ValidationIssue;

/// Failures of the attempt engine. All of them are local to one operation and
/// leave the attempt unchanged.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("invalid submission: {0}")]
    Validation(String),
    #[error("attempt already completed")]
    AlreadyCompleted,
    #[error("attempt is not completed yet")]
    NotCompleted,
    #[error("question {0} not found")]
    QuestionNotFound(String),
    #[error("question set has no questions")]
    EmptyQuestionSet,
    #[error("queue position {cursor} is out of range for {len} items")]
    OutOfRange { cursor: usize, len: usize },
    #[error("all questions have already been presented")]
    QueueFinished,
    #[error("practice queue is stuck: {mastered} of {total} questions mastered and nothing left to present")]
    QueueStuck { mastered: usize, total: usize },
    #[error("practice attempt still has {remaining} unmastered questions")]
    PracticeIncomplete { remaining: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub field: String,
    pub issue: String,
}

impl From<ValidationIssue> for ErrorDetail {
    fn from(issue: ValidationIssue) -> Self {
        Self {
            field: issue.field,
            issue: issue.issue,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: ErrorPayload,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<ErrorDetail>,
    pub request_id: String,
}

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Vec<ErrorDetail>,
    pub request_id: String,
}

impl AppError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: Vec::new(),
            request_id: request_id.into(),
        }
    }

    pub fn with_details(mut self, details: Vec<ErrorDetail>) -> Self {
        self.details = details;
        self
    }

    pub fn not_found(what: &str, request_id: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", format!("{what} not found"), request_id)
    }

    pub fn internal(message: impl Into<String>, request_id: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!("internal error: {}", message);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message, request_id)
    }

    pub fn from_engine(err: EngineError, request_id: impl Into<String>) -> Self {
        let request_id = request_id.into();
        match err {
            EngineError::Validation(_) => {
                Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", err.to_string(), request_id)
            }
            EngineError::QuestionNotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string(), request_id)
            }
            EngineError::EmptyQuestionSet => {
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", err.to_string(), request_id)
            }
            EngineError::AlreadyCompleted
            | EngineError::NotCompleted
            | EngineError::OutOfRange { .. }
            | EngineError::QueueFinished
            | EngineError::PracticeIncomplete { .. } => {
                Self::new(StatusCode::CONFLICT, "CONFLICT", err.to_string(), request_id)
            }
            EngineError::QueueStuck { .. } => Self::internal(err.to_string(), request_id),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let payload = ErrorBody {
            error: ErrorPayload {
                code: self.code,
                message: self.message,
                details: self.details,
                request_id: self.request_id,
            },
        };
        (self.status, Json(payload)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_map_to_statuses() {
        let cases = [
            (EngineError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (EngineError::QuestionNotFound("q9".into()), StatusCode::NOT_FOUND),
            (EngineError::AlreadyCompleted, StatusCode::CONFLICT),
            (EngineError::PracticeIncomplete { remaining: 2 }, StatusCode::CONFLICT),
            (EngineError::QueueStuck { mastered: 1, total: 2 }, StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from_engine(err, "req").status, status);
        }
    }
}
