//! Error handling for the application

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use uuid::Uuid;

use crate::engine::{EngineError, EngineErrorResponse};

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Session {0} not found")]
    SessionNotFound(Uuid),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Engine(EngineError::NotFound { .. }) | AppError::SessionNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            AppError::Engine(EngineError::DuplicateModel { .. }) => StatusCode::CONFLICT,
            AppError::Engine(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn body(&self) -> EngineErrorResponse {
        match self {
            AppError::Engine(e) => e.to_response(),
            AppError::SessionNotFound(id) => EngineErrorResponse {
                error_type: "session_not_found".to_string(),
                message: self.to_string(),
                details: Some(serde_json::json!({ "session_id": id })),
            },
            AppError::BadRequest(_) => EngineErrorResponse {
                error_type: "bad_request".to_string(),
                message: self.to_string(),
                details: None,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::debug!(status = status.as_u16(), "Request rejected: {}", self);
        (status, Json(self.body())).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let not_found = AppError::Engine(EngineError::NotFound {
            kind: "Model",
            id: "x".to_string(),
        });
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::SessionNotFound(Uuid::nil()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Engine(EngineError::Overdetermined).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AppError::BadRequest("no model selected".to_string()).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_session_not_found_body() {
        let body = AppError::SessionNotFound(Uuid::nil()).body();
        assert_eq!(body.error_type, "session_not_found");
        assert_eq!(
            body.details.unwrap()["session_id"],
            "00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_engine_error_body_passes_through() {
        let body = AppError::from(EngineError::MissingInput {
            missing: vec!["hours".to_string()],
        })
        .body();
        assert_eq!(body.error_type, "missing_input");
    }
}
