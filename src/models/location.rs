use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// A geographic point with the free-text address shown to people.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub point: GeoPoint,
    #[serde(default)]
    pub address: String,
}

/// One position fix of a delivery agent, scoped to the order being delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub partner_id: Uuid,
    pub order_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub sampled_at: DateTime<Utc>,
}

impl LocationSample {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}
