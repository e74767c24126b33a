use serde::{Deserialize, Serialize};

use crate::models::location::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteSource {
    Remote,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteEstimate {
    pub origin: GeoPoint,
    pub destination: GeoPoint,
    /// Display path only; fallback paths are straight lines.
    pub points: Vec<GeoPoint>,
    pub distance_km: f64,
    pub duration_text: String,
    pub duration_minutes: Option<u32>,
    pub source: RouteSource,
}

/// What a routing provider answers for one origin/destination pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Directions {
    pub distance_km: f64,
    pub duration_text: String,
    #[serde(default)]
    pub duration_secs: Option<u64>,
    pub points: Vec<GeoPoint>,
}

/// Bounding viewport for a set of points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub center: GeoPoint,
    pub lat_delta: f64,
    pub lng_delta: f64,
}
