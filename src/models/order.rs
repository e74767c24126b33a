use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::location::Place;

/// Lifecycle of a grocery delivery order.
///
/// ```text
/// Pending ──► Accepted ──► InProgress ──► AwaitConfirmation ──► Delivered
///    │           │             │
///    └───────────┴─────────────┴──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Accepted,
    InProgress,
    AwaitConfirmation,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Statuses in which an order must carry an assigned partner.
    pub fn requires_partner(&self) -> bool {
        matches!(
            self,
            OrderStatus::Accepted
                | OrderStatus::InProgress
                | OrderStatus::AwaitConfirmation
                | OrderStatus::Delivered
        )
    }

    /// Statuses during which the agent's position is sampled and broadcast.
    pub fn is_trackable(&self) -> bool {
        matches!(self, OrderStatus::Accepted | OrderStatus::InProgress)
    }

    /// Whether a confirmed order may move from `self` to `next`, possibly
    /// skipping intermediate statuses it was never told about.
    pub fn can_advance_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        match (self, next) {
            (Pending, _) => true,
            (Accepted, Accepted | InProgress | AwaitConfirmation | Delivered | Cancelled) => true,
            (InProgress, InProgress | AwaitConfirmation | Delivered | Cancelled) => true,
            (AwaitConfirmation, AwaitConfirmation | Delivered) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Accepted => "Accepted",
            OrderStatus::InProgress => "InProgress",
            OrderStatus::AwaitConfirmation => "AwaitConfirmation",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: OrderStatus,
    pub at: DateTime<Utc>,
    pub actor: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub status: OrderStatus,
    pub customer_id: Uuid,
    pub branch_id: Uuid,
    pub assigned_partner_id: Option<Uuid>,
    pub branch_location: Place,
    pub delivery_location: Place,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub status_history: Vec<StatusChange>,
    #[serde(default)]
    pub cancel_reason: Option<String>,
}

impl Order {
    pub fn is_assigned_to(&self, partner_id: Uuid) -> bool {
        self.assigned_partner_id == Some(partner_id)
    }

    /// `assigned_partner_id` is set exactly when the status requires a partner.
    pub fn assignment_is_consistent(&self) -> bool {
        self.assigned_partner_id.is_some() == self.status.requires_partner()
    }
}
