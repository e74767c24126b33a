use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, put};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::location::GeoPoint;
use crate::models::order::Order;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/partners/:id/available", get(list_available))
        .route("/partners/:id/orders", get(list_current))
        .route("/partners/:id/position", put(report_position))
}

#[derive(Deserialize)]
pub struct AvailableQuery {
    pub branch_id: Uuid,
}

#[derive(Deserialize)]
pub struct PositionRequest {
    pub location: GeoPoint,
}

#[derive(Serialize)]
pub struct PositionAccepted {
    pub partner_id: Uuid,
    pub location: GeoPoint,
}

async fn list_available(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<AvailableQuery>,
) -> Result<Json<Vec<Order>>, AppError> {
    let listing = state.backend.available_orders(query.branch_id).await?;

    state.boards.replace_available(id, query.branch_id, listing);
    Ok(Json(state.boards.available(&id)))
}

async fn list_current(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Json<Vec<Order>> {
    Json(state.boards.current(&id))
}

async fn report_position(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<PositionRequest>,
) -> Result<Json<PositionAccepted>, AppError> {
    state.positions.report(id, payload.location)?;
    Ok(Json(PositionAccepted {
        partner_id: id,
        location: payload.location,
    }))
}
