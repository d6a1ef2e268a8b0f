use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use visitlens_core::error::CoreError;

/// Application-level errors that map directly to HTTP responses.
///
/// Every variant implements [`IntoResponse`] so Axum handlers can use
/// `Result<impl IntoResponse, AppError>` as their return type. Core and
/// store errors convert with `?`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {message}")]
    BadRequest {
        message: String,
        field: Option<&'static str>,
    },

    /// Well-formed request whose report config or formula cannot be used.
    #[error("unprocessable: {message}")]
    Unprocessable {
        code: &'static str,
        message: String,
        field: Option<&'static str>,
    },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("internal error: {0}")]
    Internal(anyhow::Error),
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        AppError::BadRequest {
            message: message.into(),
            field: None,
        }
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidRange { .. } => AppError::BadRequest {
                message: err.to_string(),
                field: Some("end"),
            },
            CoreError::UnsupportedGranularity(_) => AppError::BadRequest {
                message: err.to_string(),
                field: Some("granularity"),
            },
            CoreError::Validation(message) => AppError::bad_request(message),
            CoreError::NotFound { .. } => AppError::NotFound(err.to_string()),
            CoreError::InvalidReportConfig(message) => AppError::Unprocessable {
                code: "invalid_report_config",
                message,
                field: Some("data"),
            },
            CoreError::UnknownField(field) => AppError::Unprocessable {
                code: "unknown_field",
                message: format!("unknown field: {field}"),
                field: Some("formula"),
            },
            CoreError::FormulaSyntax(message) => AppError::Unprocessable {
                code: "formula_syntax",
                message,
                field: Some("formula"),
            },
            CoreError::ConcurrencyConflict { .. } => AppError::Conflict(err.to_string()),
            CoreError::Serialization(e) => AppError::Internal(e.into()),
            CoreError::Storage(e) => AppError::Internal(e),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::from(CoreError::from(err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, field) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            AppError::BadRequest { message, field } => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                message.clone(),
                *field,
            ),
            AppError::Unprocessable {
                code,
                message,
                field,
            } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                *code,
                message.clone(),
                *field,
            ),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone(), None),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Unauthorized".to_string(),
                None,
            ),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error".to_string(),
                    None,
                )
            }
        };

        (
            status,
            Json(json!({
                "error": {
                    "code": code,
                    "message": message,
                    "field": field
                }
            })),
        )
            .into_response()
    }
}
