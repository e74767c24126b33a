use std::env;
use std::time::Duration;

use crate::engine::location::SamplerSettings;
use crate::engine::route::FallbackSettings;
use crate::engine::session::SessionSettings;
use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_json: bool,
    pub backend_url: String,
    pub directions_url: Option<String>,
    pub remote_timeout_ms: u64,
    pub position_timeout_ms: u64,
    pub sample_interval_secs: u64,
    pub assumed_speed_kmh: f64,
    pub fallback_route_points: usize,
    pub min_eta_minutes: u32,
    pub recompute_distance_km: f64,
    pub position_max_age_secs: u64,
    pub directions_cache_ttl_secs: u64,
    pub event_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            log_json: false,
            backend_url: "http://localhost:8080".to_string(),
            directions_url: None,
            remote_timeout_ms: 5_000,
            position_timeout_ms: 5_000,
            sample_interval_secs: 15,
            assumed_speed_kmh: 25.0,
            fallback_route_points: 30,
            min_eta_minutes: 5,
            recompute_distance_km: 0.025,
            position_max_age_secs: 60,
            directions_cache_ttl_secs: 60,
            event_buffer_size: 1024,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let config = Self {
            http_port: parse_or_default("HTTP_PORT", defaults.http_port)?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_json: env::var("LOG_FORMAT")
                .map(|format| format.eq_ignore_ascii_case("json"))
                .unwrap_or(defaults.log_json),
            backend_url: env::var("BACKEND_URL").unwrap_or(defaults.backend_url),
            directions_url: env::var("DIRECTIONS_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            remote_timeout_ms: parse_or_default("REMOTE_TIMEOUT_MS", defaults.remote_timeout_ms)?,
            position_timeout_ms: parse_or_default(
                "POSITION_TIMEOUT_MS",
                defaults.position_timeout_ms,
            )?,
            sample_interval_secs: parse_or_default(
                "SAMPLE_INTERVAL_SECS",
                defaults.sample_interval_secs,
            )?,
            assumed_speed_kmh: parse_or_default("ASSUMED_SPEED_KMH", defaults.assumed_speed_kmh)?,
            fallback_route_points: parse_or_default(
                "FALLBACK_ROUTE_POINTS",
                defaults.fallback_route_points,
            )?,
            min_eta_minutes: parse_or_default("MIN_ETA_MINUTES", defaults.min_eta_minutes)?,
            recompute_distance_km: parse_or_default(
                "RECOMPUTE_DISTANCE_KM",
                defaults.recompute_distance_km,
            )?,
            position_max_age_secs: parse_or_default(
                "POSITION_MAX_AGE_SECS",
                defaults.position_max_age_secs,
            )?,
            directions_cache_ttl_secs: parse_or_default(
                "DIRECTIONS_CACHE_TTL_SECS",
                defaults.directions_cache_ttl_secs,
            )?,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", defaults.event_buffer_size)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.sample_interval_secs == 0 {
            return Err(AppError::Internal(
                "SAMPLE_INTERVAL_SECS must be > 0".to_string(),
            ));
        }
        if !(self.assumed_speed_kmh.is_finite() && self.assumed_speed_kmh > 0.0) {
            return Err(AppError::Internal(
                "ASSUMED_SPEED_KMH must be a positive number".to_string(),
            ));
        }
        if self.event_buffer_size == 0 {
            return Err(AppError::Internal(
                "EVENT_BUFFER_SIZE must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    pub fn sampler_settings(&self) -> SamplerSettings {
        SamplerSettings {
            interval: Duration::from_secs(self.sample_interval_secs),
            position_timeout: Duration::from_millis(self.position_timeout_ms),
        }
    }

    pub fn fallback_settings(&self) -> FallbackSettings {
        FallbackSettings {
            route_points: self.fallback_route_points,
            assumed_speed_kmh: self.assumed_speed_kmh,
            min_eta_minutes: self.min_eta_minutes,
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            recompute_distance_km: self.recompute_distance_km,
        }
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
