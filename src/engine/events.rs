use serde::Serialize;
use tracing::{debug, warn};

use crate::engine::location::LocationHub;
use crate::engine::store::OrderStore;
use crate::geo;
use crate::models::event::InboundEvent;
use crate::models::location::GeoPoint;
use crate::models::order::Order;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventDisposition {
    Applied,
    Broadcast { receivers: usize },
    Ignored,
}

/// Routes one normalized inbound event into the engine.
///
/// Order events are applied under the order's lock and only when they move
/// the cached copy forward; late, duplicate or mislabelled payloads are
/// ignored.
pub async fn ingest(store: &OrderStore, hub: &LocationHub, event: InboundEvent) -> EventDisposition {
    let kind = event.kind();
    let order_id = event.order_id();
    let expected = event.expected_status();

    match event {
        InboundEvent::OrderPlaced(order)
        | InboundEvent::OrderConfirmed(order)
        | InboundEvent::OrderInProgress(order)
        | InboundEvent::AwaitingConfirmation(order)
        | InboundEvent::DeliveryConfirmed(order)
        | InboundEvent::OrderCancelled(order) => {
            if expected != Some(order.status) {
                warn!(%order_id, kind, status = %order.status, "order event kind does not match its payload");
                return EventDisposition::Ignored;
            }
            if !order.assignment_is_consistent() {
                warn!(%order_id, kind, status = %order.status, "order event with inconsistent assignment ignored");
                return EventDisposition::Ignored;
            }

            let _serialized = store.lock(order_id).await;
            if let Some(cached) = store.get(&order_id) {
                if let Some(reason) = stale_reason(&cached, &order) {
                    debug!(
                        %order_id,
                        kind,
                        cached = %cached.status,
                        incoming = %order.status,
                        reason,
                        "order event ignored"
                    );
                    return EventDisposition::Ignored;
                }
            }

            debug!(%order_id, kind, "order event applied");
            store.apply_confirmed(order);
            EventDisposition::Applied
        }
        InboundEvent::AgentLocationUpdated(sample) => {
            if let Err(err) = geo::validate(&GeoPoint::new(sample.latitude, sample.longitude)) {
                warn!(%order_id, error = %err, "location event with invalid coordinates dropped");
                return EventDisposition::Ignored;
            }
            match hub.publish(sample) {
                0 => EventDisposition::Ignored,
                receivers => EventDisposition::Broadcast { receivers },
            }
        }
    }
}

fn stale_reason(cached: &Order, incoming: &Order) -> Option<&'static str> {
    if cached.status.is_terminal() {
        return Some("order already terminal");
    }
    if !cached.status.can_advance_to(incoming.status) {
        return Some("status would move backwards");
    }
    if incoming.status_history.len() < cached.status_history.len() {
        return Some("payload older than cached copy");
    }
    None
}
