use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use futures::SinkExt;
use futures::StreamExt;
use tokio_stream::wrappers::WatchStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
) -> Result<Response, AppError> {
    // Warm the cache so the session has an order to start from.
    state.lifecycle.order(order_id).await?;
    Ok(ws
        .on_upgrade(move |socket| handle_socket(socket, state, order_id))
        .into_response())
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, order_id: Uuid) {
    let views = match state.tracking.subscribe(order_id) {
        Ok(views) => views,
        Err(err) => {
            warn!(%order_id, error = %err, "tracking subscription refused");
            return;
        }
    };
    let (mut sender, mut receiver) = socket.split();

    info!(%order_id, "tracking client connected");

    let mut send_task = tokio::spawn(async move {
        let mut views = WatchStream::new(views);
        while let Some(view) = views.next().await {
            let json = match serde_json::to_string(&view) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize tracking view for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.tracking.unsubscribe(order_id).await;
    info!(%order_id, "tracking client disconnected");
}
