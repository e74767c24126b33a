use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::Json;
use axum::Router;
use serde::Serialize;
use uuid::Uuid;

use crate::engine::events::{self, EventDisposition};
use crate::models::event::InboundEvent;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/events", post(receive_event))
}

#[derive(Serialize)]
pub struct EventReceipt {
    pub kind: &'static str,
    pub order_id: Uuid,
    pub disposition: EventDisposition,
}

async fn receive_event(
    State(state): State<Arc<AppState>>,
    Json(event): Json<InboundEvent>,
) -> Json<EventReceipt> {
    let kind = event.kind();
    let order_id = event.order_id();
    let disposition = events::ingest(&state.store, &state.hub, event).await;
    Json(EventReceipt {
        kind,
        order_id,
        disposition,
    })
}
