use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use uuid::Uuid;

use crate::engine::session::TrackingView;
use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tracking/:id", get(get_view))
        .route("/tracking/:id/refresh", post(refresh))
}

/// Latest view of a running session; sessions are opened over the websocket.
async fn get_view(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TrackingView>, AppError> {
    state
        .tracking
        .view(&id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("no tracking session for {id}")))
}

async fn refresh(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.tracking.refresh(id).await?;
    Ok(StatusCode::ACCEPTED)
}
