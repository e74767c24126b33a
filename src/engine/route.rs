use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::geo;
use crate::models::location::GeoPoint;
use crate::models::route::{Directions, RouteEstimate, RouteSource};
use crate::observability::metrics::Metrics;
use crate::remote::directions::DirectionsProvider;

pub const UNABLE_TO_CALCULATE: &str = "Unable to calculate";

const DEFAULT_SPEED_KMH: f64 = 25.0;

#[derive(Debug, Clone)]
pub struct FallbackSettings {
    pub route_points: usize,
    pub assumed_speed_kmh: f64,
    pub min_eta_minutes: u32,
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            route_points: 30,
            assumed_speed_kmh: DEFAULT_SPEED_KMH,
            min_eta_minutes: 5,
        }
    }
}

/// `max(floor, ceil(distance / speed * 60))` minutes.
pub fn fallback_eta_minutes(distance_km: f64, settings: &FallbackSettings) -> u32 {
    let speed = if settings.assumed_speed_kmh.is_finite() && settings.assumed_speed_kmh > 0.0 {
        settings.assumed_speed_kmh
    } else {
        DEFAULT_SPEED_KMH
    };
    let distance = if distance_km.is_finite() {
        distance_km.max(0.0)
    } else {
        0.0
    };

    let minutes = (distance * 60.0 / speed).ceil() as u32;
    minutes.max(settings.min_eta_minutes)
}

pub fn format_minutes(minutes: u32) -> String {
    format!("{minutes} min")
}

/// Produces a route for two points. Never fails: any problem with the
/// routing provider degrades to a straight-line estimate.
pub struct RouteEstimator {
    provider: Arc<dyn DirectionsProvider>,
    timeout: Duration,
    fallback: FallbackSettings,
    metrics: Metrics,
}

impl RouteEstimator {
    pub fn new(
        provider: Arc<dyn DirectionsProvider>,
        timeout: Duration,
        fallback: FallbackSettings,
        metrics: Metrics,
    ) -> Self {
        Self {
            provider,
            timeout,
            fallback,
            metrics,
        }
    }

    pub async fn estimate(&self, origin: &GeoPoint, destination: &GeoPoint) -> RouteEstimate {
        if !is_routable(origin) || !is_routable(destination) {
            warn!(?origin, ?destination, "invalid route endpoints; skipping routing");
            self.record(RouteSource::Fallback);
            return degenerate(origin, destination);
        }

        let outcome = tokio::time::timeout(
            self.timeout,
            self.provider.directions(origin, destination),
        )
        .await;

        match outcome {
            Ok(Ok(directions)) if is_usable(&directions) => {
                self.record(RouteSource::Remote);
                remote_estimate(origin, destination, directions)
            }
            Ok(Ok(_)) => {
                warn!("routing provider returned an empty route; using fallback");
                self.record(RouteSource::Fallback);
                self.fallback_estimate(origin, destination)
            }
            Ok(Err(err)) => {
                warn!(error = %err, "routing provider failed; using fallback");
                self.record(RouteSource::Fallback);
                self.fallback_estimate(origin, destination)
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "routing provider timed out; using fallback");
                self.record(RouteSource::Fallback);
                self.fallback_estimate(origin, destination)
            }
        }
    }

    pub fn fallback_estimate(&self, origin: &GeoPoint, destination: &GeoPoint) -> RouteEstimate {
        let distance = geo::haversine_km(origin, destination);
        if !distance.valid {
            return degenerate(origin, destination);
        }

        let minutes = fallback_eta_minutes(distance.km, &self.fallback);
        RouteEstimate {
            origin: *origin,
            destination: *destination,
            points: geo::interpolate(origin, destination, self.fallback.route_points),
            distance_km: distance.km,
            duration_text: format_minutes(minutes),
            duration_minutes: Some(minutes),
            source: RouteSource::Fallback,
        }
    }

    fn record(&self, source: RouteSource) {
        let label = match source {
            RouteSource::Remote => "remote",
            RouteSource::Fallback => "fallback",
        };
        self.metrics
            .route_estimates_total
            .with_label_values(&[label])
            .inc();
    }
}

fn is_routable(point: &GeoPoint) -> bool {
    geo::validate(point).is_ok() && !geo::is_placeholder(point)
}

fn is_usable(directions: &Directions) -> bool {
    !directions.points.is_empty()
        && directions.distance_km.is_finite()
        && directions.distance_km >= 0.0
        && !directions.duration_text.trim().is_empty()
}

fn remote_estimate(origin: &GeoPoint, destination: &GeoPoint, directions: Directions) -> RouteEstimate {
    RouteEstimate {
        origin: *origin,
        destination: *destination,
        points: directions.points,
        distance_km: directions.distance_km,
        duration_text: directions.duration_text,
        duration_minutes: directions
            .duration_secs
            .and_then(|secs| u32::try_from(secs.div_ceil(60)).ok()),
        source: RouteSource::Remote,
    }
}

fn degenerate(origin: &GeoPoint, destination: &GeoPoint) -> RouteEstimate {
    RouteEstimate {
        origin: *origin,
        destination: *destination,
        points: Vec::new(),
        distance_km: 0.0,
        duration_text: UNABLE_TO_CALCULATE.to_string(),
        duration_minutes: None,
        source: RouteSource::Fallback,
    }
}
