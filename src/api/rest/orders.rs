use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::geo;
use crate::models::location::GeoPoint;
use crate::models::order::Order;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/claim", post(claim_order))
        .route("/orders/:id/pickup", post(pickup_order))
        .route("/orders/:id/deliver", post(mark_delivered))
        .route("/orders/:id/confirm", post(confirm_receipt))
        .route("/orders/:id/cancel", post(cancel_order))
}

#[derive(Deserialize)]
pub struct ClaimRequest {
    pub partner_id: Uuid,
}

#[derive(Deserialize)]
pub struct PartnerActionRequest {
    pub partner_id: Uuid,
    pub location: GeoPoint,
}

#[derive(Deserialize)]
pub struct ConfirmRequest {
    pub customer_id: Uuid,
}

#[derive(Deserialize)]
pub struct CancelRequest {
    pub customer_id: Uuid,
    #[serde(default)]
    pub reason: Option<String>,
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let order = state.lifecycle.order(id).await?;
    Ok(Json(order))
}

async fn claim_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ClaimRequest>,
) -> Result<Json<Order>, AppError> {
    let order = state.claims.claim(id, payload.partner_id).await?;
    Ok(Json(order))
}

async fn pickup_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<PartnerActionRequest>,
) -> Result<Json<Order>, AppError> {
    geo::validate(&payload.location)?;
    let order = state
        .lifecycle
        .pickup(id, payload.partner_id, payload.location)
        .await?;
    Ok(Json(order))
}

async fn mark_delivered(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<PartnerActionRequest>,
) -> Result<Json<Order>, AppError> {
    geo::validate(&payload.location)?;
    let order = state
        .lifecycle
        .mark_delivered(id, payload.partner_id, payload.location)
        .await?;
    Ok(Json(order))
}

async fn confirm_receipt(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ConfirmRequest>,
) -> Result<Json<Order>, AppError> {
    let order = state
        .lifecycle
        .confirm_receipt(id, payload.customer_id)
        .await?;
    Ok(Json(order))
}

async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CancelRequest>,
) -> Result<Json<Order>, AppError> {
    let order = state
        .lifecycle
        .cancel(id, payload.customer_id, payload.reason)
        .await?;
    Ok(Json(order))
}
