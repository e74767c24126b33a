use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::engine::state_machine::InvalidTransition;
use crate::geo::InvalidGeometry;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("cannot perform this action: {0}")]
    InvalidTransition(#[from] InvalidTransition),

    #[error("order {order_id} was claimed by another partner")]
    ClaimConflict { order_id: Uuid },

    #[error("cannot perform this action: {0}")]
    Rejected(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    InvalidGeometry(#[from] InvalidGeometry),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::ClaimConflict { .. } | AppError::Transport(_))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Transport(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidTransition(_) => StatusCode::CONFLICT,
            AppError::ClaimConflict { .. } => StatusCode::CONFLICT,
            AppError::Rejected(_) => StatusCode::CONFLICT,
            AppError::Transport(_) => StatusCode::BAD_GATEWAY,
            AppError::InvalidGeometry(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string(),
            "retryable": self.is_retryable(),
        }));

        (status, body).into_response()
    }
}
