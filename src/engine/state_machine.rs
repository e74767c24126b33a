use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::order::{Order, OrderStatus, StatusChange};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    ClaimConfirmed,
    Pickup,
    MarkDelivered,
    ConfirmReceipt,
    Cancel { reason: Option<String> },
}

impl Trigger {
    pub fn name(&self) -> &'static str {
        match self {
            Trigger::ClaimConfirmed => "claim-confirmed",
            Trigger::Pickup => "pickup",
            Trigger::MarkDelivered => "mark-delivered",
            Trigger::ConfirmReceipt => "confirm-receipt",
            Trigger::Cancel { .. } => "cancel",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Violation {
    WrongState,
    WrongActor,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::WrongState => f.write_str("not allowed in current status"),
            Violation::WrongActor => f.write_str("actor is not permitted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{trigger} on order {order_id} ({from}) by {actor}: {violation}")]
pub struct InvalidTransition {
    pub order_id: Uuid,
    pub from: OrderStatus,
    pub trigger: &'static str,
    pub actor: Uuid,
    pub violation: Violation,
}

enum Step {
    To(OrderStatus),
    Repeat,
}

/// Applies `trigger` by `actor` to `order`, returning the next version of it.
///
/// Pure: the input order is never touched and a rejected trigger yields no
/// new order at all. Repeating the trigger that produced the current
/// status (a second mark-delivered, confirm-receipt, cancel or claim by the
/// same, permitted actor) returns the order unchanged.
pub fn apply(
    order: &Order,
    trigger: &Trigger,
    actor: Uuid,
    at: DateTime<Utc>,
) -> Result<Order, InvalidTransition> {
    let reject = |violation| InvalidTransition {
        order_id: order.id,
        from: order.status,
        trigger: trigger.name(),
        actor,
        violation,
    };

    let is_partner = order.is_assigned_to(actor);
    let is_customer = order.customer_id == actor;

    let step = match (order.status, trigger) {
        (OrderStatus::Pending, Trigger::ClaimConfirmed) => {
            if order.assigned_partner_id.is_some() {
                return Err(reject(Violation::WrongState));
            }
            Step::To(OrderStatus::Accepted)
        }
        (OrderStatus::Accepted, Trigger::ClaimConfirmed) if is_partner => Step::Repeat,

        (OrderStatus::Accepted, Trigger::Pickup) if is_partner => Step::To(OrderStatus::InProgress),
        (OrderStatus::InProgress, Trigger::MarkDelivered) if is_partner => {
            Step::To(OrderStatus::AwaitConfirmation)
        }
        (OrderStatus::AwaitConfirmation | OrderStatus::Delivered, Trigger::MarkDelivered)
            if is_partner =>
        {
            Step::Repeat
        }

        (OrderStatus::AwaitConfirmation, Trigger::ConfirmReceipt) if is_customer => {
            Step::To(OrderStatus::Delivered)
        }
        (OrderStatus::Delivered, Trigger::ConfirmReceipt) if is_customer => Step::Repeat,

        (
            OrderStatus::Pending | OrderStatus::Accepted | OrderStatus::InProgress,
            Trigger::Cancel { .. },
        ) if is_customer => Step::To(OrderStatus::Cancelled),
        (OrderStatus::Cancelled, Trigger::Cancel { .. }) if is_customer => Step::Repeat,

        (status, trigger) if state_accepts(status, trigger) => {
            return Err(reject(Violation::WrongActor));
        }
        _ => return Err(reject(Violation::WrongState)),
    };

    let next_status = match step {
        Step::Repeat => return Ok(order.clone()),
        Step::To(status) => status,
    };

    let mut next = order.clone();
    next.status = next_status;
    match (next_status, trigger) {
        (OrderStatus::Accepted, _) => next.assigned_partner_id = Some(actor),
        (OrderStatus::Cancelled, Trigger::Cancel { reason }) => {
            next.assigned_partner_id = None;
            next.cancel_reason = reason.clone();
        }
        _ => {}
    }
    next.status_history.push(StatusChange {
        status: next_status,
        at,
        actor,
    });

    Ok(next)
}

/// Whether some actor could fire `trigger` from `status`.
fn state_accepts(status: OrderStatus, trigger: &Trigger) -> bool {
    matches!(
        (status, trigger),
        (OrderStatus::Pending, Trigger::ClaimConfirmed)
            | (OrderStatus::Accepted, Trigger::ClaimConfirmed)
            | (OrderStatus::Accepted, Trigger::Pickup)
            | (OrderStatus::InProgress, Trigger::MarkDelivered)
            | (OrderStatus::AwaitConfirmation, Trigger::MarkDelivered)
            | (OrderStatus::Delivered, Trigger::MarkDelivered)
            | (OrderStatus::AwaitConfirmation, Trigger::ConfirmReceipt)
            | (OrderStatus::Delivered, Trigger::ConfirmReceipt)
            | (OrderStatus::Pending, Trigger::Cancel { .. })
            | (OrderStatus::Accepted, Trigger::Cancel { .. })
            | (OrderStatus::InProgress, Trigger::Cancel { .. })
            | (OrderStatus::Cancelled, Trigger::Cancel { .. })
    )
}
