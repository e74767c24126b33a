use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::location::LocationSample;
use crate::observability::metrics::Metrics;
use crate::remote::device::PositionSource;

#[derive(Debug, Clone)]
pub struct SamplerSettings {
    pub interval: Duration,
    pub position_timeout: Duration,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            position_timeout: Duration::from_secs(5),
        }
    }
}

/// Fan-out of location samples, one broadcast channel per order. Dropping a
/// receiver unsubscribes it.
pub struct LocationHub {
    channels: DashMap<Uuid, broadcast::Sender<LocationSample>>,
    capacity: usize,
}

impl LocationHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self, order_id: Uuid) -> broadcast::Receiver<LocationSample> {
        self.channels
            .entry(order_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Returns how many subscribers received the sample. Samples for orders
    /// nobody is watching are dropped.
    pub fn publish(&self, sample: LocationSample) -> usize {
        let order_id = sample.order_id;
        let delivered = match self.channels.get(&order_id) {
            Some(tx) => tx.send(sample).unwrap_or(0),
            None => return 0,
        };

        if delivered == 0 {
            self.channels
                .remove_if(&order_id, |_, tx| tx.receiver_count() == 0);
        }
        delivered
    }

    /// Drops the order's channel once nobody listens on it any more.
    pub fn release(&self, order_id: &Uuid) -> bool {
        self.channels
            .remove_if(order_id, |_, tx| tx.receiver_count() == 0)
            .is_some()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn subscriber_count(&self, order_id: &Uuid) -> usize {
        self.channels
            .get(order_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

/// Last-write-wins holder for one subscriber's view of an agent position.
#[derive(Debug, Clone, Default)]
pub struct LatestPosition {
    current: Option<LocationSample>,
}

impl LatestPosition {
    /// Applies `sample` unless it is not strictly newer than the one held.
    pub fn apply(&mut self, sample: LocationSample) -> bool {
        if let Some(current) = &self.current {
            if sample.sampled_at <= current.sampled_at {
                debug!(
                    order_id = %sample.order_id,
                    sampled_at = %sample.sampled_at,
                    latest = %current.sampled_at,
                    "discarding stale location sample"
                );
                return false;
            }
        }
        self.current = Some(sample);
        true
    }

    pub fn current(&self) -> Option<&LocationSample> {
        self.current.as_ref()
    }
}

struct SamplerHandle {
    partner_id: Uuid,
    task: JoinHandle<()>,
}

/// Periodic position sampling for delivery partners, at most one loop per
/// order.
pub struct LocationSynchronizer {
    source: Arc<dyn PositionSource>,
    hub: Arc<LocationHub>,
    settings: SamplerSettings,
    loops: DashMap<Uuid, SamplerHandle>,
    metrics: Metrics,
}

impl LocationSynchronizer {
    pub fn new(
        source: Arc<dyn PositionSource>,
        hub: Arc<LocationHub>,
        settings: SamplerSettings,
        metrics: Metrics,
    ) -> Self {
        Self {
            source,
            hub,
            settings,
            loops: DashMap::new(),
            metrics,
        }
    }

    /// Starts sampling `partner_id`'s position for `order_id`. Returns false
    /// when that loop is already running.
    pub fn start(&self, partner_id: Uuid, order_id: Uuid) -> bool {
        let started = match self.loops.entry(order_id) {
            Entry::Occupied(entry)
                if entry.get().partner_id == partner_id && !entry.get().task.is_finished() =>
            {
                false
            }
            Entry::Occupied(mut entry) => {
                entry.get().task.abort();
                entry.insert(self.spawn(partner_id, order_id));
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(self.spawn(partner_id, order_id));
                true
            }
        };

        if started {
            info!(%partner_id, %order_id, "location sampler started");
            self.metrics.active_samplers.set(self.loops.len() as i64);
        }
        started
    }

    /// Cancels the loop for `order_id` and waits until it can no longer
    /// publish. Returns false when nothing was running.
    pub async fn stop(&self, order_id: Uuid) -> bool {
        let Some((_, handle)) = self.loops.remove(&order_id) else {
            return false;
        };

        handle.task.abort();
        let _ = handle.task.await;
        self.metrics.active_samplers.set(self.loops.len() as i64);
        info!(partner_id = %handle.partner_id, %order_id, "location sampler stopped");
        true
    }

    pub async fn stop_all(&self) {
        let order_ids: Vec<Uuid> = self.loops.iter().map(|entry| *entry.key()).collect();
        for order_id in order_ids {
            self.stop(order_id).await;
        }
    }

    pub fn is_active(&self, order_id: &Uuid) -> bool {
        self.loops.contains_key(order_id)
    }

    pub fn active_count(&self) -> usize {
        self.loops.len()
    }

    fn spawn(&self, partner_id: Uuid, order_id: Uuid) -> SamplerHandle {
        let task = tokio::spawn(run_sampler(
            partner_id,
            order_id,
            self.source.clone(),
            self.hub.clone(),
            self.settings.clone(),
            self.metrics.clone(),
        ));
        SamplerHandle { partner_id, task }
    }
}

impl Drop for LocationSynchronizer {
    fn drop(&mut self) {
        for entry in self.loops.iter() {
            entry.value().task.abort();
        }
    }
}

async fn run_sampler(
    partner_id: Uuid,
    order_id: Uuid,
    source: Arc<dyn PositionSource>,
    hub: Arc<LocationHub>,
    settings: SamplerSettings,
    metrics: Metrics,
) {
    let mut ticker = tokio::time::interval(settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_sampled: Option<DateTime<Utc>> = None;

    loop {
        ticker.tick().await;

        let read = tokio::time::timeout(
            settings.position_timeout,
            source.current_position(partner_id),
        )
        .await;

        let point = match read {
            Ok(Ok(point)) => point,
            Ok(Err(err)) => {
                warn!(%partner_id, %order_id, error = %err, "position unavailable; skipping tick");
                metrics
                    .location_samples_total
                    .with_label_values(&["skipped"])
                    .inc();
                continue;
            }
            Err(_) => {
                warn!(%partner_id, %order_id, "position read timed out; skipping tick");
                metrics
                    .location_samples_total
                    .with_label_values(&["timeout"])
                    .inc();
                continue;
            }
        };

        // Wall clocks can step backwards; keep this loop's samples increasing.
        let mut sampled_at = Utc::now();
        if let Some(previous) = last_sampled {
            if sampled_at <= previous {
                sampled_at = previous + chrono::Duration::milliseconds(1);
            }
        }
        last_sampled = Some(sampled_at);

        let receivers = hub.publish(LocationSample {
            partner_id,
            order_id,
            latitude: point.lat,
            longitude: point.lng,
            sampled_at,
        });
        metrics
            .location_samples_total
            .with_label_values(&["published"])
            .inc();
        debug!(%partner_id, %order_id, receivers, "location sample published");
    }
}
