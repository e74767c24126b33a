use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub claims_total: IntCounterVec,
    pub claim_latency_seconds: HistogramVec,
    pub transitions_total: IntCounterVec,
    pub route_estimates_total: IntCounterVec,
    pub location_samples_total: IntCounterVec,
    pub active_samplers: IntGauge,
    pub active_tracking_sessions: IntGauge,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let claims_total = IntCounterVec::new(
            Opts::new("claims_total", "Claim attempts by outcome"),
            &["outcome"],
        )
        .expect("valid claims_total metric");

        let claim_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "claim_latency_seconds",
                "Latency from optimistic removal to claim resolution in seconds",
            ),
            &["outcome"],
        )
        .expect("valid claim_latency_seconds metric");

        let transitions_total = IntCounterVec::new(
            Opts::new("transitions_total", "Lifecycle actions by outcome"),
            &["outcome"],
        )
        .expect("valid transitions_total metric");

        let route_estimates_total = IntCounterVec::new(
            Opts::new("route_estimates_total", "Route estimates by source"),
            &["source"],
        )
        .expect("valid route_estimates_total metric");

        let location_samples_total = IntCounterVec::new(
            Opts::new("location_samples_total", "Location sampler ticks by outcome"),
            &["outcome"],
        )
        .expect("valid location_samples_total metric");

        let active_samplers = IntGauge::new("active_samplers", "Running location sampling loops")
            .expect("valid active_samplers metric");

        let active_tracking_sessions =
            IntGauge::new("active_tracking_sessions", "Running tracking sessions")
                .expect("valid active_tracking_sessions metric");

        registry
            .register(Box::new(claims_total.clone()))
            .expect("register claims_total");
        registry
            .register(Box::new(claim_latency_seconds.clone()))
            .expect("register claim_latency_seconds");
        registry
            .register(Box::new(transitions_total.clone()))
            .expect("register transitions_total");
        registry
            .register(Box::new(route_estimates_total.clone()))
            .expect("register route_estimates_total");
        registry
            .register(Box::new(location_samples_total.clone()))
            .expect("register location_samples_total");
        registry
            .register(Box::new(active_samplers.clone()))
            .expect("register active_samplers");
        registry
            .register(Box::new(active_tracking_sessions.clone()))
            .expect("register active_tracking_sessions");

        Self {
            registry,
            claims_total,
            claim_latency_seconds,
            transitions_total,
            route_estimates_total,
            location_samples_total,
            active_samplers,
            active_tracking_sessions,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}
