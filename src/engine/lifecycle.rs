use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::state_machine::{self, Trigger};
use crate::engine::store::OrderStore;
use crate::error::AppError;
use crate::models::location::GeoPoint;
use crate::models::order::Order;
use crate::observability::metrics::Metrics;
use crate::remote::backend::OrderBackend;

/// Explicit lifecycle actions after a claim. Each one is checked locally
/// against the state machine, confirmed by the backend, and only then
/// applied to the cache.
pub struct OrderLifecycle {
    backend: Arc<dyn OrderBackend>,
    store: Arc<OrderStore>,
    timeout: Duration,
    metrics: Metrics,
}

impl OrderLifecycle {
    pub fn new(
        backend: Arc<dyn OrderBackend>,
        store: Arc<OrderStore>,
        timeout: Duration,
        metrics: Metrics,
    ) -> Self {
        Self {
            backend,
            store,
            timeout,
            metrics,
        }
    }

    /// Cached order, fetched from the backend on a miss.
    pub async fn order(&self, order_id: Uuid) -> Result<Order, AppError> {
        if let Some(order) = self.store.get(&order_id) {
            return Ok(order);
        }
        let order = self.remote(self.backend.fetch_order(order_id)).await?;
        self.store.apply_confirmed(order.clone());
        Ok(order)
    }

    pub async fn pickup(
        &self,
        order_id: Uuid,
        partner_id: Uuid,
        location: GeoPoint,
    ) -> Result<Order, AppError> {
        self.run(order_id, Trigger::Pickup, partner_id, || {
            self.backend.pickup_order(order_id, partner_id, location)
        })
        .await
    }

    pub async fn mark_delivered(
        &self,
        order_id: Uuid,
        partner_id: Uuid,
        location: GeoPoint,
    ) -> Result<Order, AppError> {
        self.run(order_id, Trigger::MarkDelivered, partner_id, || {
            self.backend.mark_delivered(order_id, partner_id, location)
        })
        .await
    }

    pub async fn confirm_receipt(
        &self,
        order_id: Uuid,
        customer_id: Uuid,
    ) -> Result<Order, AppError> {
        self.run(order_id, Trigger::ConfirmReceipt, customer_id, || {
            self.backend.confirm_receipt(order_id)
        })
        .await
    }

    pub async fn cancel(
        &self,
        order_id: Uuid,
        customer_id: Uuid,
        reason: Option<String>,
    ) -> Result<Order, AppError> {
        let trigger = Trigger::Cancel {
            reason: reason.clone(),
        };
        self.run(order_id, trigger, customer_id, || {
            self.backend.cancel_order(order_id, reason)
        })
        .await
    }

    async fn run<F, Fut>(
        &self,
        order_id: Uuid,
        trigger: Trigger,
        actor: Uuid,
        call: F,
    ) -> Result<Order, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Order, AppError>>,
    {
        let _serialized = self.store.lock(order_id).await;
        let current = self.order(order_id).await?;

        let expected = match state_machine::apply(&current, &trigger, actor, Utc::now()) {
            Ok(next) => next,
            Err(err) => {
                self.record("invalid");
                warn!(%order_id, %actor, error = %err, "lifecycle action refused locally");
                return Err(err.into());
            }
        };
        if expected == current {
            self.record("no_op");
            return Ok(current);
        }

        match self.remote(call()).await {
            Ok(confirmed) => {
                self.store.apply_confirmed(confirmed.clone());
                self.record("applied");
                info!(
                    %order_id,
                    %actor,
                    trigger = trigger.name(),
                    status = %confirmed.status,
                    "lifecycle action confirmed"
                );
                Ok(confirmed)
            }
            Err(AppError::Rejected(reason)) => {
                self.record("rejected");
                warn!(%order_id, %actor, %reason, "backend refused lifecycle action; refreshing");
                if let Ok(authoritative) = self.remote(self.backend.fetch_order(order_id)).await {
                    self.store.apply_confirmed(authoritative);
                }
                Err(AppError::Rejected(reason))
            }
            Err(err) => {
                self.record("error");
                warn!(%order_id, %actor, error = %err, "lifecycle action failed");
                Err(err)
            }
        }
    }

    async fn remote<T>(
        &self,
        call: impl Future<Output = Result<T, AppError>>,
    ) -> Result<T, AppError> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| AppError::Transport("backend call timed out".to_string()))?
    }

    fn record(&self, outcome: &str) {
        self.metrics
            .transitions_total
            .with_label_values(&[outcome])
            .inc();
    }
}
