use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::engine::boards::PartnerBoards;
use crate::engine::location::LocationSynchronizer;
use crate::engine::store::OrderStore;
use crate::models::order::Order;

/// Follows confirmed order updates: keeps partner boards in step and runs a
/// location sampler exactly while an order is Accepted or InProgress.
pub async fn run_supervisor(
    store: Arc<OrderStore>,
    boards: Arc<PartnerBoards>,
    synchronizer: Arc<LocationSynchronizer>,
) {
    let mut updates = store.subscribe();
    info!("order supervisor started");

    for order in store.snapshot() {
        follow(&order, &boards, &synchronizer).await;
    }

    loop {
        match updates.recv().await {
            Ok(order) => follow(&order, &boards, &synchronizer).await,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "order updates lagged; resynchronising from cache");
                for order in store.snapshot() {
                    follow(&order, &boards, &synchronizer).await;
                }
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }

    warn!("order supervisor stopped: update channel closed");
}

async fn follow(order: &Order, boards: &PartnerBoards, synchronizer: &LocationSynchronizer) {
    boards.reconcile(order);

    match order.assigned_partner_id {
        Some(partner_id) if order.status.is_trackable() => {
            synchronizer.start(partner_id, order.id);
        }
        _ => {
            synchronizer.stop(order.id).await;
        }
    }
}
