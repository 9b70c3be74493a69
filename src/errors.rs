use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::auth::token::AuthError;
use crate::models::vm::PowerAction;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("invalid login form: {0}")]
    InvalidForm(String),

    #[error("token rejected: {0}")]
    Token(#[from] AuthError),

    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    #[error("VM {0} not found")]
    VmNotFound(String),

    /// 500 whose message is shown to the caller.
    #[error("{0}")]
    Unexpected(String),

    /// 500 for a failed power action; the cause stays in the logs.
    #[error("{action} failed")]
    ActionFailed { action: PowerAction },

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self {
            AppError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "Invalid username or password".to_string(),
            ),
            AppError::InvalidForm(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::Token(e) => {
                tracing::debug!(reason = %e, "bearer token rejected");
                (
                    StatusCode::UNAUTHORIZED,
                    "Could not validate credentials".to_string(),
                )
            }
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.to_string()),
            AppError::VmNotFound(vmid) => (StatusCode::NOT_FOUND, format!("VM {} not found", vmid)),
            AppError::Unexpected(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            AppError::ActionFailed { action } => {
                (StatusCode::INTERNAL_SERVER_ERROR, action.failure_message())
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        let mut response = (status, Json(json!({ "detail": detail }))).into_response();

        if matches!(self, AppError::Token(_)) {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }

        response
    }
}
