use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimOutcome {
    Pending,
    Confirmed,
    Rejected,
}

/// One partner's in-flight request to take a pending order.
///
/// Moves `Pending -> Confirmed` or `Pending -> Rejected` exactly once; a
/// resolved attempt ignores further resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimAttempt {
    pub order_id: Uuid,
    pub partner_id: Uuid,
    pub outcome: ClaimOutcome,
    pub started_at: DateTime<Utc>,
}

impl ClaimAttempt {
    pub fn new(order_id: Uuid, partner_id: Uuid) -> Self {
        Self {
            order_id,
            partner_id,
            outcome: ClaimOutcome::Pending,
            started_at: Utc::now(),
        }
    }

    pub fn confirm(mut self) -> Self {
        if self.outcome == ClaimOutcome::Pending {
            self.outcome = ClaimOutcome::Confirmed;
        }
        self
    }

    pub fn reject(mut self) -> Self {
        if self.outcome == ClaimOutcome::Pending {
            self.outcome = ClaimOutcome::Rejected;
        }
        self
    }

    pub fn is_resolved(&self) -> bool {
        self.outcome != ClaimOutcome::Pending
    }
}
