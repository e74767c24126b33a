use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::location::LocationSample;
use crate::models::order::{Order, OrderStatus};

/// Normalized inbound event, independent of the push channel that carried it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum InboundEvent {
    OrderPlaced(Order),
    OrderConfirmed(Order),
    OrderInProgress(Order),
    AwaitingConfirmation(Order),
    DeliveryConfirmed(Order),
    OrderCancelled(Order),
    AgentLocationUpdated(LocationSample),
}

impl InboundEvent {
    pub fn order_id(&self) -> Uuid {
        match self {
            InboundEvent::OrderPlaced(order)
            | InboundEvent::OrderConfirmed(order)
            | InboundEvent::OrderInProgress(order)
            | InboundEvent::AwaitingConfirmation(order)
            | InboundEvent::DeliveryConfirmed(order)
            | InboundEvent::OrderCancelled(order) => order.id,
            InboundEvent::AgentLocationUpdated(sample) => sample.order_id,
        }
    }

    /// The status an order event's payload must carry.
    pub fn expected_status(&self) -> Option<OrderStatus> {
        match self {
            InboundEvent::OrderPlaced(_) => Some(OrderStatus::Pending),
            InboundEvent::OrderConfirmed(_) => Some(OrderStatus::Accepted),
            InboundEvent::OrderInProgress(_) => Some(OrderStatus::InProgress),
            InboundEvent::AwaitingConfirmation(_) => Some(OrderStatus::AwaitConfirmation),
            InboundEvent::DeliveryConfirmed(_) => Some(OrderStatus::Delivered),
            InboundEvent::OrderCancelled(_) => Some(OrderStatus::Cancelled),
            InboundEvent::AgentLocationUpdated(_) => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::OrderPlaced(_) => "order_placed",
            InboundEvent::OrderConfirmed(_) => "order_confirmed",
            InboundEvent::OrderInProgress(_) => "order_in_progress",
            InboundEvent::AwaitingConfirmation(_) => "awaiting_confirmation",
            InboundEvent::DeliveryConfirmed(_) => "delivery_confirmed",
            InboundEvent::OrderCancelled(_) => "order_cancelled",
            InboundEvent::AgentLocationUpdated(_) => "agent_location_updated",
        }
    }
}
