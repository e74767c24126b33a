use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::AppError;
use crate::models::location::GeoPoint;
use crate::models::route::Directions;
use crate::remote::cache::ResponseCache;

#[async_trait]
pub trait DirectionsProvider: Send + Sync {
    async fn directions(
        &self,
        origin: &GeoPoint,
        destination: &GeoPoint,
    ) -> Result<Directions, AppError>;
}

#[derive(Debug, Deserialize)]
struct DirectionsPayload {
    distance: f64,
    duration: String,
    #[serde(default)]
    duration_secs: Option<u64>,
    #[serde(default)]
    points: Vec<GeoPoint>,
}

impl From<DirectionsPayload> for Directions {
    fn from(payload: DirectionsPayload) -> Self {
        Directions {
            distance_km: payload.distance,
            duration_text: payload.duration,
            duration_secs: payload.duration_secs,
            points: payload.points,
        }
    }
}

pub struct HttpDirectionsClient {
    client: reqwest::Client,
    base_url: String,
    cache: Arc<dyn ResponseCache>,
}

impl HttpDirectionsClient {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        cache: Arc<dyn ResponseCache>,
    ) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AppError::Internal(format!("failed to build http client: {err}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cache,
        })
    }

    fn request_url(&self, origin: &GeoPoint, destination: &GeoPoint) -> String {
        format!(
            "{}/directions?origin={},{}&destination={},{}",
            self.base_url, origin.lat, origin.lng, destination.lat, destination.lng
        )
    }
}

#[async_trait]
impl DirectionsProvider for HttpDirectionsClient {
    async fn directions(
        &self,
        origin: &GeoPoint,
        destination: &GeoPoint,
    ) -> Result<Directions, AppError> {
        let url = self.request_url(origin, destination);

        if let Some(cached) = self.cache.get(&url) {
            if let Ok(payload) = serde_json::from_value::<DirectionsPayload>(cached) {
                debug!(url = %url, "directions served from cache");
                return Ok(payload.into());
            }
        }

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(AppError::Transport(format!(
                "directions provider returned {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response.json().await?;
        let payload: DirectionsPayload = serde_json::from_value(body.clone())
            .map_err(|err| AppError::Transport(format!("malformed directions: {err}")))?;
        self.cache.put(url, body);

        Ok(payload.into())
    }
}

/// Provider used when no routing service is configured.
pub struct NoDirections;

#[async_trait]
impl DirectionsProvider for NoDirections {
    async fn directions(
        &self,
        _origin: &GeoPoint,
        _destination: &GeoPoint,
    ) -> Result<Directions, AppError> {
        Err(AppError::Transport(
            "no directions provider configured".to_string(),
        ))
    }
}
