//! Per-order tracking sessions.
//!
//! A session folds order updates, agent location samples and route results
//! into one [`TrackingView`]. The folding itself is the pure
//! [`TrackingState::reduce`]; the spawned task only feeds it inputs and
//! carries out the effects it returns.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::location::{LatestPosition, LocationHub};
use crate::engine::route::RouteEstimator;
use crate::engine::store::OrderStore;
use crate::error::AppError;
use crate::geo;
use crate::models::location::{GeoPoint, LocationSample};
use crate::models::order::{Order, OrderStatus};
use crate::models::route::{Region, RouteEstimate};
use crate::observability::metrics::Metrics;

#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// How far an endpoint must move before the route is recomputed.
    pub recompute_distance_km: f64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            recompute_distance_km: 0.025,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackingView {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub agent_position: Option<LocationSample>,
    pub route: Option<RouteEstimate>,
    pub region: Option<Region>,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub enum TrackingInput {
    Status(Order),
    Sample(LocationSample),
    RouteComputed { seq: u64, estimate: RouteEstimate },
    Refresh,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackingEffect {
    ComputeRoute {
        seq: u64,
        origin: GeoPoint,
        destination: GeoPoint,
    },
    Teardown,
}

#[derive(Debug, Clone)]
pub struct TrackingState {
    order: Order,
    position: LatestPosition,
    route: Option<RouteEstimate>,
    issued_seq: u64,
    applied_seq: u64,
    last_leg: Option<(GeoPoint, GeoPoint)>,
    recompute_distance_km: f64,
    closed: bool,
}

impl TrackingState {
    pub fn new(order: Order, settings: &SessionSettings) -> Self {
        Self {
            order,
            position: LatestPosition::default(),
            route: None,
            issued_seq: 0,
            applied_seq: 0,
            last_leg: None,
            recompute_distance_km: settings.recompute_distance_km,
            closed: false,
        }
    }

    pub fn start(&mut self) -> Vec<TrackingEffect> {
        if self.order.status.is_terminal() {
            self.closed = true;
            return vec![TrackingEffect::Teardown];
        }
        self.request_route().into_iter().collect()
    }

    pub fn reduce(&mut self, input: TrackingInput) -> Vec<TrackingEffect> {
        if self.closed {
            return Vec::new();
        }

        match input {
            TrackingInput::Status(order) => {
                if order.id != self.order.id {
                    return Vec::new();
                }
                let status_changed = order.status != self.order.status;
                self.order = order;

                if self.order.status.is_terminal() {
                    self.closed = true;
                    return vec![TrackingEffect::Teardown];
                }
                if status_changed {
                    return self.request_route().into_iter().collect();
                }
                self.request_route_if_moved().into_iter().collect()
            }
            TrackingInput::Sample(sample) => {
                if sample.order_id != self.order.id {
                    return Vec::new();
                }
                if let Some(assigned) = self.order.assigned_partner_id {
                    if sample.partner_id != assigned {
                        debug!(order_id = %sample.order_id, partner_id = %sample.partner_id, "sample from unassigned partner ignored");
                        return Vec::new();
                    }
                }
                if !self.position.apply(sample) {
                    return Vec::new();
                }
                self.request_route_if_moved().into_iter().collect()
            }
            TrackingInput::RouteComputed { seq, estimate } => {
                if seq <= self.applied_seq {
                    debug!(order_id = %self.order.id, seq, applied = self.applied_seq, "stale route result dropped");
                    return Vec::new();
                }
                self.applied_seq = seq;
                self.route = Some(estimate);
                Vec::new()
            }
            TrackingInput::Refresh => self.request_route().into_iter().collect(),
        }
    }

    pub fn view(&self) -> TrackingView {
        let mut points = vec![
            self.order.branch_location.point,
            self.order.delivery_location.point,
        ];
        if let Some(sample) = self.position.current() {
            points.push(sample.point());
        }
        if let Some(route) = &self.route {
            points.extend(route.points.iter().copied());
        }

        TrackingView {
            order_id: self.order.id,
            status: self.order.status,
            agent_position: self.position.current().cloned(),
            route: self.route.clone(),
            region: geo::fit_region(&points),
            active: !self.closed,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Branch to agent while the agent heads for pickup, agent to customer
    /// once the goods are on board.
    fn leg(&self) -> Option<(GeoPoint, GeoPoint)> {
        let agent = self.position.current()?.point();
        match self.order.status {
            OrderStatus::Accepted => Some((self.order.branch_location.point, agent)),
            OrderStatus::InProgress => Some((agent, self.order.delivery_location.point)),
            _ => None,
        }
    }

    fn request_route(&mut self) -> Option<TrackingEffect> {
        let (origin, destination) = self.leg()?;
        self.issued_seq += 1;
        self.last_leg = Some((origin, destination));
        Some(TrackingEffect::ComputeRoute {
            seq: self.issued_seq,
            origin,
            destination,
        })
    }

    fn request_route_if_moved(&mut self) -> Option<TrackingEffect> {
        let (origin, destination) = self.leg()?;
        let moved = match self.last_leg {
            None => true,
            Some((last_origin, last_destination)) => {
                geo::haversine_km(&origin, &last_origin).km > self.recompute_distance_km
                    || geo::haversine_km(&destination, &last_destination).km
                        > self.recompute_distance_km
            }
        };
        if moved { self.request_route() } else { None }
    }
}

struct SessionHandle {
    view_rx: watch::Receiver<TrackingView>,
    refresh_tx: mpsc::Sender<()>,
    subscribers: usize,
    task: JoinHandle<()>,
}

/// Subscribe/unsubscribe API over tracking sessions; one session per order,
/// shared by all of its subscribers.
pub struct TrackingRegistry {
    sessions: DashMap<Uuid, SessionHandle>,
    store: Arc<OrderStore>,
    hub: Arc<LocationHub>,
    estimator: Arc<RouteEstimator>,
    settings: SessionSettings,
    metrics: Metrics,
}

impl TrackingRegistry {
    pub fn new(
        store: Arc<OrderStore>,
        hub: Arc<LocationHub>,
        estimator: Arc<RouteEstimator>,
        settings: SessionSettings,
        metrics: Metrics,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            store,
            hub,
            estimator,
            settings,
            metrics,
        }
    }

    /// Joins (or starts) the session for a cached order.
    pub fn subscribe(&self, order_id: Uuid) -> Result<watch::Receiver<TrackingView>, AppError> {
        let receiver = match self.sessions.entry(order_id) {
            Entry::Occupied(mut entry) if !entry.get().task.is_finished() => {
                let handle = entry.get_mut();
                handle.subscribers += 1;
                handle.view_rx.clone()
            }
            Entry::Occupied(mut entry) => {
                // The finished session's subscribers still unsubscribe later.
                let mut handle = self.spawn(order_id)?;
                handle.subscribers += entry.get().subscribers;
                let receiver = handle.view_rx.clone();
                entry.insert(handle);
                receiver
            }
            Entry::Vacant(entry) => {
                let handle = self.spawn(order_id)?;
                let receiver = handle.view_rx.clone();
                entry.insert(handle);
                receiver
            }
        };
        self.metrics
            .active_tracking_sessions
            .set(self.sessions.len() as i64);
        Ok(receiver)
    }

    /// Drops one subscription; the last one out stops the session. The count
    /// and the removal happen under one entry lock, so a concurrent
    /// `subscribe` either joins before the removal or starts a new session.
    pub async fn unsubscribe(&self, order_id: Uuid) {
        let removed = match self.sessions.entry(order_id) {
            Entry::Occupied(mut entry) => {
                let handle = entry.get_mut();
                handle.subscribers = handle.subscribers.saturating_sub(1);
                if handle.subscribers == 0 {
                    Some(entry.remove())
                } else {
                    None
                }
            }
            Entry::Vacant(_) => None,
        };
        if let Some(handle) = removed {
            self.shutdown(order_id, handle).await;
        }
    }

    /// Tears the session down regardless of subscribers. Once this returns
    /// no further input reaches the session's view.
    pub async fn stop(&self, order_id: Uuid) -> bool {
        let Some((_, handle)) = self.sessions.remove(&order_id) else {
            return false;
        };
        self.shutdown(order_id, handle).await;
        true
    }

    pub fn subscriber_count(&self, order_id: &Uuid) -> usize {
        self.sessions
            .get(order_id)
            .map(|handle| handle.subscribers)
            .unwrap_or(0)
    }

    pub async fn stop_all(&self) {
        let order_ids: Vec<Uuid> = self.sessions.iter().map(|entry| *entry.key()).collect();
        for order_id in order_ids {
            self.stop(order_id).await;
        }
    }

    pub fn view(&self, order_id: &Uuid) -> Option<TrackingView> {
        self.sessions
            .get(order_id)
            .map(|handle| handle.view_rx.borrow().clone())
    }

    pub async fn refresh(&self, order_id: Uuid) -> Result<(), AppError> {
        let refresh_tx = self
            .sessions
            .get(&order_id)
            .filter(|handle| !handle.task.is_finished())
            .map(|handle| handle.refresh_tx.clone())
            .ok_or_else(|| AppError::NotFound(format!("no tracking session for {order_id}")))?;

        refresh_tx
            .send(())
            .await
            .map_err(|_| AppError::NotFound(format!("tracking session for {order_id} ended")))
    }

    pub fn active_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|entry| !entry.value().task.is_finished())
            .count()
    }

    async fn shutdown(&self, order_id: Uuid, handle: SessionHandle) {
        handle.task.abort();
        let _ = handle.task.await;
        self.hub.release(&order_id);
        self.metrics
            .active_tracking_sessions
            .set(self.sessions.len() as i64);
        info!(%order_id, "tracking session stopped");
    }

    fn spawn(&self, order_id: Uuid) -> Result<SessionHandle, AppError> {
        // Subscribe before reading so no update slips between the two.
        let updates = self.store.subscribe();
        let samples = self.hub.subscribe(order_id);
        let Some(order) = self.store.get(&order_id) else {
            drop(samples);
            self.hub.release(&order_id);
            return Err(AppError::NotFound(format!("order {order_id} not found")));
        };

        let state = TrackingState::new(order, &self.settings);
        let (view_tx, view_rx) = watch::channel(state.view());
        let (refresh_tx, refresh_rx) = mpsc::channel(8);

        let task = tokio::spawn(run_session(
            state,
            SessionInputs {
                store: self.store.clone(),
                hub: self.hub.clone(),
                updates,
                samples,
                refresh_rx,
            },
            view_tx,
            self.estimator.clone(),
        ));
        info!(%order_id, "tracking session started");

        Ok(SessionHandle {
            view_rx,
            refresh_tx,
            subscribers: 1,
            task,
        })
    }
}

impl Drop for TrackingRegistry {
    fn drop(&mut self) {
        for entry in self.sessions.iter() {
            entry.value().task.abort();
        }
    }
}

struct SessionInputs {
    store: Arc<OrderStore>,
    hub: Arc<LocationHub>,
    updates: broadcast::Receiver<Order>,
    samples: broadcast::Receiver<LocationSample>,
    refresh_rx: mpsc::Receiver<()>,
}

async fn run_session(
    mut state: TrackingState,
    mut inputs: SessionInputs,
    view_tx: watch::Sender<TrackingView>,
    estimator: Arc<RouteEstimator>,
) {
    let order_id = state.view().order_id;
    let mut routes: JoinSet<(u64, RouteEstimate)> = JoinSet::new();

    let effects = state.start();
    if execute(effects, &mut routes, &estimator) {
        view_tx.send_replace(state.view());
        inputs.close(order_id);
        return;
    }

    loop {
        let input = tokio::select! {
            update = inputs.updates.recv() => match update {
                Ok(order) if order.id == order_id => TrackingInput::Status(order),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    debug!(%order_id, missed, "order updates lagged; re-reading cache");
                    match inputs.store.get(&order_id) {
                        Some(order) => TrackingInput::Status(order),
                        None => continue,
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            sample = inputs.samples.recv() => match sample {
                Ok(sample) => TrackingInput::Sample(sample),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    debug!(%order_id, missed, "location samples lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            refresh = inputs.refresh_rx.recv() => match refresh {
                Some(()) => TrackingInput::Refresh,
                None => break,
            },
            Some(joined) = routes.join_next(), if !routes.is_empty() => match joined {
                Ok((seq, estimate)) => TrackingInput::RouteComputed { seq, estimate },
                Err(_) => continue,
            },
        };

        let effects = state.reduce(input);
        let teardown = execute(effects, &mut routes, &estimator);
        view_tx.send_if_modified(|view| {
            let next = state.view();
            if *view == next {
                false
            } else {
                *view = next;
                true
            }
        });

        if teardown {
            info!(%order_id, status = %state.view().status, "order reached a terminal status; session ends");
            break;
        }
    }

    inputs.close(order_id);
}

impl SessionInputs {
    fn close(self, order_id: Uuid) {
        let SessionInputs { hub, samples, .. } = self;
        drop(samples);
        hub.release(&order_id);
    }
}

/// Starts route computations; returns true on teardown.
fn execute(
    effects: Vec<TrackingEffect>,
    routes: &mut JoinSet<(u64, RouteEstimate)>,
    estimator: &Arc<RouteEstimator>,
) -> bool {
    let mut teardown = false;
    for effect in effects {
        match effect {
            TrackingEffect::ComputeRoute {
                seq,
                origin,
                destination,
            } => {
                let estimator = estimator.clone();
                routes.spawn(async move { (seq, estimator.estimate(&origin, &destination).await) });
            }
            TrackingEffect::Teardown => teardown = true,
        }
    }
    teardown
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use std::time::Duration;

    use super::*;
    use crate::engine::route::FallbackSettings;
    use crate::models::location::Place;
    use crate::models::route::RouteSource;
    use crate::remote::directions::NoDirections;

    fn order(status: OrderStatus, partner: Option<Uuid>) -> Order {
        Order {
            id: Uuid::from_u128(42),
            status,
            customer_id: Uuid::from_u128(1),
            branch_id: Uuid::from_u128(2),
            assigned_partner_id: partner,
            branch_location: Place {
                point: GeoPoint::new(52.50, 13.40),
                address: "Branch".to_string(),
            },
            delivery_location: Place {
                point: GeoPoint::new(52.55, 13.45),
                address: "Home".to_string(),
            },
            created_at: Utc::now(),
            status_history: Vec::new(),
            cancel_reason: None,
        }
    }

    fn partner() -> Uuid {
        Uuid::from_u128(7)
    }

    fn sample(secs: i64, lat: f64, lng: f64) -> LocationSample {
        LocationSample {
            partner_id: partner(),
            order_id: Uuid::from_u128(42),
            latitude: lat,
            longitude: lng,
            sampled_at: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    fn estimate(distance_km: f64) -> RouteEstimate {
        RouteEstimate {
            origin: GeoPoint::new(52.5, 13.4),
            destination: GeoPoint::new(52.6, 13.5),
            points: Vec::new(),
            distance_km,
            duration_text: "10 min".to_string(),
            duration_minutes: Some(10),
            source: RouteSource::Fallback,
        }
    }

    fn accepted_state() -> TrackingState {
        let mut state = TrackingState::new(
            order(OrderStatus::Accepted, Some(partner())),
            &SessionSettings::default(),
        );
        assert!(state.start().is_empty());
        state
    }

    #[test]
    fn displayed_position_follows_newest_sample() {
        let mut state = accepted_state();
        state.reduce(TrackingInput::Sample(sample(10, 52.51, 13.41)));
        state.reduce(TrackingInput::Sample(sample(30, 52.53, 13.43)));
        let effects = state.reduce(TrackingInput::Sample(sample(20, 52.52, 13.42)));

        assert!(effects.is_empty());
        let view = state.view();
        assert_eq!(view.agent_position.unwrap().sampled_at.timestamp(), 30);
    }

    #[test]
    fn first_sample_requests_branch_to_agent_route() {
        let mut state = accepted_state();
        let effects = state.reduce(TrackingInput::Sample(sample(10, 52.51, 13.41)));

        assert_eq!(
            effects,
            vec![TrackingEffect::ComputeRoute {
                seq: 1,
                origin: GeoPoint::new(52.50, 13.40),
                destination: GeoPoint::new(52.51, 13.41),
            }]
        );
    }

    #[test]
    fn tiny_moves_do_not_recompute() {
        let mut state = accepted_state();
        state.reduce(TrackingInput::Sample(sample(10, 52.51, 13.41)));
        let effects = state.reduce(TrackingInput::Sample(sample(20, 52.51001, 13.41001)));
        assert!(effects.is_empty());
    }

    #[test]
    fn pickup_switches_leg_to_agent_to_customer() {
        let mut state = accepted_state();
        state.reduce(TrackingInput::Sample(sample(10, 52.51, 13.41)));

        let effects = state.reduce(TrackingInput::Status(order(
            OrderStatus::InProgress,
            Some(partner()),
        )));

        assert_eq!(
            effects,
            vec![TrackingEffect::ComputeRoute {
                seq: 2,
                origin: GeoPoint::new(52.51, 13.41),
                destination: GeoPoint::new(52.55, 13.45),
            }]
        );
    }

    #[test]
    fn older_route_result_never_overwrites_newer() {
        let mut state = accepted_state();
        state.reduce(TrackingInput::Sample(sample(10, 52.51, 13.41)));
        state.reduce(TrackingInput::Refresh);

        state.reduce(TrackingInput::RouteComputed {
            seq: 2,
            estimate: estimate(2.0),
        });
        state.reduce(TrackingInput::RouteComputed {
            seq: 1,
            estimate: estimate(1.0),
        });

        assert_eq!(state.view().route.unwrap().distance_km, 2.0);
    }

    #[test]
    fn samples_from_other_partners_are_ignored() {
        let mut state = accepted_state();
        let mut foreign = sample(10, 52.51, 13.41);
        foreign.partner_id = Uuid::from_u128(99);

        assert!(state.reduce(TrackingInput::Sample(foreign)).is_empty());
        assert!(state.view().agent_position.is_none());
    }

    #[test]
    fn terminal_status_tears_down_and_freezes_view() {
        let mut state = accepted_state();
        let effects = state.reduce(TrackingInput::Status(order(OrderStatus::Cancelled, None)));
        assert_eq!(effects, vec![TrackingEffect::Teardown]);

        state.reduce(TrackingInput::Sample(sample(10, 52.51, 13.41)));
        let view = state.view();
        assert!(!view.active);
        assert_eq!(view.status, OrderStatus::Cancelled);
        assert!(view.agent_position.is_none());
    }

    #[test]
    fn view_region_covers_branch_and_customer() {
        let state = accepted_state();
        let region = state.view().region.unwrap();
        assert!((region.center.lat - 52.525).abs() < 1e-9);
        assert!(region.lat_delta >= 0.05);
    }

    #[test]
    fn placeholder_delivery_location_is_left_out_of_region() {
        let mut placed = order(OrderStatus::Accepted, Some(partner()));
        placed.delivery_location.point = GeoPoint::new(0.0, 0.0);
        let state = TrackingState::new(placed, &SessionSettings::default());

        let region = state.view().region.unwrap();
        assert_eq!(region.center, GeoPoint::new(52.50, 13.40));
        assert_eq!(region.lat_delta, geo::REGION_MIN_DELTA);
    }

    fn registry() -> (Arc<OrderStore>, Arc<LocationHub>, TrackingRegistry) {
        let store = Arc::new(OrderStore::new(16));
        let hub = Arc::new(LocationHub::new(16));
        let estimator = Arc::new(RouteEstimator::new(
            Arc::new(NoDirections),
            Duration::from_millis(50),
            FallbackSettings::default(),
            Metrics::new(),
        ));
        let registry = TrackingRegistry::new(
            store.clone(),
            hub.clone(),
            estimator,
            SessionSettings::default(),
            Metrics::new(),
        );
        (store, hub, registry)
    }

    #[tokio::test]
    async fn subscribing_an_unknown_order_fails() {
        let (_store, hub, registry) = registry();
        let result = registry.subscribe(Uuid::from_u128(42));

        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert_eq!(registry.active_count(), 0);
        assert_eq!(hub.channel_count(), 0);
    }

    #[tokio::test]
    async fn session_outlives_all_but_the_last_subscriber() {
        let (store, _hub, registry) = registry();
        let order_id = Uuid::from_u128(42);
        store.apply_confirmed(order(OrderStatus::Accepted, Some(partner())));

        let _first = registry.subscribe(order_id).unwrap();
        let mut second = registry.subscribe(order_id).unwrap();
        assert_eq!(registry.subscriber_count(&order_id), 2);
        assert_eq!(registry.active_count(), 1);

        registry.unsubscribe(order_id).await;
        assert_eq!(registry.subscriber_count(&order_id), 1);
        assert_eq!(registry.active_count(), 1);

        store.apply_confirmed(order(OrderStatus::InProgress, Some(partner())));
        tokio::time::timeout(Duration::from_secs(1), second.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.borrow().status, OrderStatus::InProgress);
    }

    #[tokio::test]
    async fn last_unsubscribe_stops_the_session_and_frees_its_channel() {
        let (store, hub, registry) = registry();
        let order_id = Uuid::from_u128(42);
        store.apply_confirmed(order(OrderStatus::Accepted, Some(partner())));

        let mut views = registry.subscribe(order_id).unwrap();
        assert_eq!(hub.subscriber_count(&order_id), 1);

        registry.unsubscribe(order_id).await;

        assert_eq!(registry.active_count(), 0);
        assert_eq!(registry.subscriber_count(&order_id), 0);
        assert!(registry.view(&order_id).is_none());
        assert_eq!(hub.channel_count(), 0);
        assert!(views.changed().await.is_err());

        registry.unsubscribe(order_id).await;
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn resubscribing_after_the_last_unsubscribe_starts_afresh() {
        let (store, _hub, registry) = registry();
        let order_id = Uuid::from_u128(42);
        store.apply_confirmed(order(OrderStatus::Accepted, Some(partner())));

        let _first = registry.subscribe(order_id).unwrap();
        registry.unsubscribe(order_id).await;
        let mut again = registry.subscribe(order_id).unwrap();

        assert_eq!(registry.subscriber_count(&order_id), 1);
        assert_eq!(registry.active_count(), 1);

        store.apply_confirmed(order(OrderStatus::InProgress, Some(partner())));
        tokio::time::timeout(Duration::from_secs(1), again.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.borrow().status, OrderStatus::InProgress);
    }

    #[tokio::test]
    async fn terminal_update_ends_the_session_and_frees_its_channel() {
        let (store, hub, registry) = registry();
        let order_id = Uuid::from_u128(42);
        store.apply_confirmed(order(OrderStatus::Accepted, Some(partner())));
        let views = registry.subscribe(order_id).unwrap();

        store.apply_confirmed(order(OrderStatus::Cancelled, None));

        tokio::time::timeout(Duration::from_secs(1), async {
            while registry.active_count() != 0 || hub.channel_count() != 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(!views.borrow().active);
        assert_eq!(views.borrow().status, OrderStatus::Cancelled);
    }
}
