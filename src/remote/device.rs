use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::geo;
use crate::models::location::GeoPoint;

/// Reads the current device position of a delivery partner.
#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn current_position(&self, partner_id: Uuid) -> Result<GeoPoint, AppError>;
}

/// Latest raw fixes pushed by partner devices. A missing or stale fix reads
/// as "GPS unavailable".
pub struct ReportedPositions {
    fixes: DashMap<Uuid, (GeoPoint, DateTime<Utc>)>,
    max_age: Duration,
}

impl ReportedPositions {
    pub fn new(max_age: Duration) -> Self {
        Self {
            fixes: DashMap::new(),
            max_age,
        }
    }

    pub fn report(&self, partner_id: Uuid, point: GeoPoint) -> Result<(), AppError> {
        geo::validate(&point)?;
        self.fixes.insert(partner_id, (point, Utc::now()));
        Ok(())
    }
}

#[async_trait]
impl PositionSource for ReportedPositions {
    async fn current_position(&self, partner_id: Uuid) -> Result<GeoPoint, AppError> {
        let (point, reported_at) = self
            .fixes
            .get(&partner_id)
            .map(|entry| *entry.value())
            .ok_or_else(|| AppError::Transport(format!("no position fix for {partner_id}")))?;

        let age = (Utc::now() - reported_at).to_std().unwrap_or_default();
        if age > self.max_age {
            return Err(AppError::Transport(format!(
                "position fix for {partner_id} is {}s old",
                age.as_secs()
            )));
        }

        Ok(point)
    }
}
