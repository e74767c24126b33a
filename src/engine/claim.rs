use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::boards::PartnerBoards;
use crate::engine::state_machine::{self, Trigger};
use crate::engine::store::OrderStore;
use crate::error::AppError;
use crate::models::claim::ClaimAttempt;
use crate::models::order::Order;
use crate::observability::metrics::Metrics;
use crate::remote::backend::{AcceptResponse, OrderBackend};

/// Optimistic "accept pending order" workflow. The backend arbitrates races;
/// this side hides the order while the claim is in flight and restores it
/// when the claim is lost.
pub struct ClaimCoordinator {
    backend: Arc<dyn OrderBackend>,
    store: Arc<OrderStore>,
    boards: Arc<PartnerBoards>,
    attempts: DashMap<(Uuid, Uuid), ClaimAttempt>,
    timeout: Duration,
    metrics: Metrics,
}

impl ClaimCoordinator {
    pub fn new(
        backend: Arc<dyn OrderBackend>,
        store: Arc<OrderStore>,
        boards: Arc<PartnerBoards>,
        timeout: Duration,
        metrics: Metrics,
    ) -> Self {
        Self {
            backend,
            store,
            boards,
            attempts: DashMap::new(),
            timeout,
            metrics,
        }
    }

    /// In-flight attempts, oldest first.
    pub fn attempts(&self) -> Vec<ClaimAttempt> {
        let mut attempts: Vec<ClaimAttempt> = self
            .attempts
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        attempts.sort_by_key(|attempt| attempt.started_at);
        attempts
    }

    pub async fn claim(&self, order_id: Uuid, partner_id: Uuid) -> Result<Order, AppError> {
        let started = Instant::now();

        if let Some(owned) = self
            .store
            .get(&order_id)
            .filter(|order| order.is_assigned_to(partner_id) && order.status.requires_partner())
        {
            debug!(%order_id, %partner_id, "claim retried for an owned order");
            self.record("already_owned", started);
            return Ok(owned);
        }

        let hidden = self.boards.take_for_claim(partner_id, order_id);
        let attempt = ClaimAttempt::new(order_id, partner_id);
        self.attempts.insert((order_id, partner_id), attempt.clone());

        let response = tokio::time::timeout(
            self.timeout,
            self.backend.accept_order(order_id, partner_id),
        )
        .await;

        let resolution = match response {
            Ok(Ok(response)) => self.interpret(order_id, partner_id, response, hidden.as_ref()),
            Ok(Err(AppError::Rejected(reason))) => {
                debug!(%order_id, %partner_id, %reason, "backend refused claim");
                Err(AppError::ClaimConflict { order_id })
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(AppError::Transport(format!(
                "claim for order {order_id} timed out"
            ))),
        };

        self.attempts.remove(&(order_id, partner_id));

        match resolution {
            Ok(order) => {
                let attempt = attempt.confirm();
                {
                    let _serialized = self.store.lock(order_id).await;
                    self.store.apply_confirmed(order.clone());
                }
                self.boards.settle(partner_id, order_id);
                self.boards.mark_current(partner_id, &order);
                self.record("confirmed", started);
                info!(%order_id, %partner_id, outcome = ?attempt.outcome, "claim confirmed");
                Ok(order)
            }
            Err(err) => {
                let attempt = attempt.reject();
                self.boards.restore(partner_id, order_id, hidden);
                let outcome = match &err {
                    AppError::ClaimConflict { .. } => "conflict",
                    _ => "error",
                };
                self.record(outcome, started);
                warn!(
                    %order_id,
                    %partner_id,
                    outcome = ?attempt.outcome,
                    error = %err,
                    "claim rolled back"
                );
                Err(err)
            }
        }
    }

    fn interpret(
        &self,
        order_id: Uuid,
        partner_id: Uuid,
        response: AcceptResponse,
        hidden: Option<&Order>,
    ) -> Result<Order, AppError> {
        match response.order {
            Some(order) if order.is_assigned_to(partner_id) && order.status.requires_partner() => {
                self.mirror_check(&order, partner_id, hidden);
                Ok(order)
            }
            Some(_) => Err(AppError::ClaimConflict { order_id }),
            None if response.success => {
                let base = self
                    .store
                    .get(&order_id)
                    .or_else(|| hidden.cloned())
                    .ok_or_else(|| {
                        AppError::Transport(format!(
                            "claim for {order_id} confirmed without an order payload"
                        ))
                    })?;
                Ok(state_machine::apply(
                    &base,
                    &Trigger::ClaimConfirmed,
                    partner_id,
                    Utc::now(),
                )?)
            }
            None => Err(AppError::ClaimConflict { order_id }),
        }
    }

    /// Runs the local machine over the cached copy; a disagreement means the
    /// cache was stale and the confirmed payload replaces it.
    fn mirror_check(&self, confirmed: &Order, partner_id: Uuid, hidden: Option<&Order>) {
        let Some(base) = self.store.get(&confirmed.id).or_else(|| hidden.cloned()) else {
            return;
        };
        if let Err(err) = state_machine::apply(&base, &Trigger::ClaimConfirmed, partner_id, Utc::now())
        {
            warn!(order_id = %confirmed.id, error = %err, "local order copy was stale");
        }
    }

    fn record(&self, outcome: &str, started: Instant) {
        self.metrics
            .claims_total
            .with_label_values(&[outcome])
            .inc();
        self.metrics
            .claim_latency_seconds
            .with_label_values(&[outcome])
            .observe(started.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::models::location::{GeoPoint, Place};
    use crate::models::order::OrderStatus;
    use crate::remote::memory::InMemoryOrderBackend;

    struct Fixture {
        backend: Arc<InMemoryOrderBackend>,
        boards: Arc<PartnerBoards>,
        store: Arc<OrderStore>,
        coordinator: ClaimCoordinator,
        order: Order,
    }

    fn fixture(partners: &[Uuid]) -> Fixture {
        let place = Place {
            point: GeoPoint::new(52.5, 13.4),
            address: String::new(),
        };
        let order = Order {
            id: Uuid::new_v4(),
            status: OrderStatus::Pending,
            customer_id: Uuid::new_v4(),
            branch_id: Uuid::new_v4(),
            assigned_partner_id: None,
            branch_location: place.clone(),
            delivery_location: place,
            created_at: Utc::now(),
            status_history: Vec::new(),
            cancel_reason: None,
        };

        let backend = Arc::new(InMemoryOrderBackend::new());
        backend.insert(order.clone());
        let boards = Arc::new(PartnerBoards::new());
        for partner in partners {
            boards.replace_available(*partner, order.branch_id, vec![order.clone()]);
        }
        let store = Arc::new(OrderStore::new(64));
        store.apply_confirmed(order.clone());

        let coordinator = ClaimCoordinator::new(
            backend.clone(),
            store.clone(),
            boards.clone(),
            Duration::from_millis(200),
            Metrics::new(),
        );

        Fixture {
            backend,
            boards,
            store,
            coordinator,
            order,
        }
    }

    #[tokio::test]
    async fn confirmed_claim_moves_order_to_current() {
        let partner = Uuid::new_v4();
        let fx = fixture(&[partner]);

        let order = fx.coordinator.claim(fx.order.id, partner).await.unwrap();

        assert_eq!(order.status, OrderStatus::Accepted);
        assert_eq!(order.assigned_partner_id, Some(partner));
        assert_eq!(fx.store.get(&fx.order.id), Some(order.clone()));
        assert!(fx.boards.available(&partner).is_empty());
        assert_eq!(fx.boards.current(&partner), vec![order]);
        assert!(fx.coordinator.attempts().is_empty());
    }

    #[tokio::test]
    async fn retried_claim_for_owned_order_is_a_no_op_success() {
        let partner = Uuid::new_v4();
        let fx = fixture(&[partner]);

        let first = fx.coordinator.claim(fx.order.id, partner).await.unwrap();
        let second = fx.coordinator.claim(fx.order.id, partner).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(fx.backend.accept_calls(), 1);
    }

    #[tokio::test]
    async fn transport_failure_rolls_back_the_projection() {
        let partner = Uuid::new_v4();
        let fx = fixture(&[partner]);
        fx.backend.set_fail_requests(true);

        let err = fx.coordinator.claim(fx.order.id, partner).await.unwrap_err();

        assert!(matches!(err, AppError::Transport(_)));
        assert!(err.is_retryable());
        assert_eq!(fx.boards.available(&partner), vec![fx.order.clone()]);
        assert_eq!(fx.store.get(&fx.order.id), Some(fx.order.clone()));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_treated_like_a_transport_failure() {
        let partner = Uuid::new_v4();
        let fx = fixture(&[partner]);
        fx.backend.set_latency(Duration::from_secs(10));

        let err = fx.coordinator.claim(fx.order.id, partner).await.unwrap_err();

        assert!(matches!(err, AppError::Transport(_)));
        assert_eq!(fx.boards.available(&partner), vec![fx.order.clone()]);
    }

    #[tokio::test]
    async fn optimistic_removal_is_visible_while_in_flight() {
        let partner = Uuid::new_v4();
        let fx = fixture(&[partner]);
        fx.backend.set_latency(Duration::from_millis(50));
        let fx = Arc::new(fx);

        let claiming = {
            let fx = fx.clone();
            tokio::spawn(async move { fx.coordinator.claim(fx.order.id, partner).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(fx.boards.available(&partner).is_empty());
        assert_eq!(fx.coordinator.attempts().len(), 1);

        claiming.await.unwrap().unwrap();
        assert!(fx.coordinator.attempts().is_empty());
    }
}
