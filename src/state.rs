use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::engine::boards::PartnerBoards;
use crate::engine::claim::ClaimCoordinator;
use crate::engine::lifecycle::OrderLifecycle;
use crate::engine::location::{LocationHub, LocationSynchronizer};
use crate::engine::route::RouteEstimator;
use crate::engine::session::TrackingRegistry;
use crate::engine::store::OrderStore;
use crate::error::AppError;
use crate::observability::metrics::Metrics;
use crate::remote::backend::{HttpOrderBackend, OrderBackend};
use crate::remote::cache::TtlCache;
use crate::remote::device::ReportedPositions;
use crate::remote::directions::{DirectionsProvider, HttpDirectionsClient, NoDirections};

pub struct AppState {
    pub store: Arc<OrderStore>,
    pub boards: Arc<PartnerBoards>,
    pub hub: Arc<LocationHub>,
    pub positions: Arc<ReportedPositions>,
    pub synchronizer: Arc<LocationSynchronizer>,
    pub backend: Arc<dyn OrderBackend>,
    pub claims: ClaimCoordinator,
    pub lifecycle: OrderLifecycle,
    pub tracking: TrackingRegistry,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(
        config: &Config,
        backend: Arc<dyn OrderBackend>,
        directions: Arc<dyn DirectionsProvider>,
    ) -> Self {
        let metrics = Metrics::new();
        let store = Arc::new(OrderStore::new(config.event_buffer_size));
        let boards = Arc::new(PartnerBoards::new());
        let hub = Arc::new(LocationHub::new(config.event_buffer_size));
        let positions = Arc::new(ReportedPositions::new(Duration::from_secs(
            config.position_max_age_secs,
        )));

        let synchronizer = Arc::new(LocationSynchronizer::new(
            positions.clone(),
            hub.clone(),
            config.sampler_settings(),
            metrics.clone(),
        ));
        let estimator = Arc::new(RouteEstimator::new(
            directions,
            config.remote_timeout(),
            config.fallback_settings(),
            metrics.clone(),
        ));

        let claims = ClaimCoordinator::new(
            backend.clone(),
            store.clone(),
            boards.clone(),
            config.remote_timeout(),
            metrics.clone(),
        );
        let lifecycle = OrderLifecycle::new(
            backend.clone(),
            store.clone(),
            config.remote_timeout(),
            metrics.clone(),
        );
        let tracking = TrackingRegistry::new(
            store.clone(),
            hub.clone(),
            estimator,
            config.session_settings(),
            metrics.clone(),
        );

        Self {
            store,
            boards,
            hub,
            positions,
            synchronizer,
            backend,
            claims,
            lifecycle,
            tracking,
            metrics,
        }
    }

    /// Wires the HTTP adapters named in `config`.
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let backend = Arc::new(HttpOrderBackend::new(
            config.backend_url.clone(),
            config.remote_timeout(),
        )?);

        let directions: Arc<dyn DirectionsProvider> = match &config.directions_url {
            Some(url) => Arc::new(HttpDirectionsClient::new(
                url.clone(),
                config.remote_timeout(),
                Arc::new(TtlCache::new(Duration::from_secs(
                    config.directions_cache_ttl_secs,
                ))),
            )?),
            None => Arc::new(NoDirections),
        };

        Ok(Self::new(config, backend, directions))
    }

    pub async fn shutdown(&self) {
        self.tracking.stop_all().await;
        self.synchronizer.stop_all().await;
    }
}
