use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::engine::state_machine::{self, Trigger};
use crate::error::AppError;
use crate::models::location::GeoPoint;
use crate::models::order::{Order, OrderStatus};
use crate::remote::backend::{AcceptResponse, OrderBackend};

/// In-process system of record. Claims are compare-and-set under the
/// map's entry lock, so the first writer wins.
#[derive(Default)]
pub struct InMemoryOrderBackend {
    orders: DashMap<Uuid, Order>,
    fail_requests: AtomicBool,
    latency_ms: AtomicU64,
    accept_calls: AtomicUsize,
}

impl InMemoryOrderBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, order: Order) {
        self.orders.insert(order.id, order);
    }

    pub fn order(&self, order_id: &Uuid) -> Option<Order> {
        self.orders.get(order_id).map(|entry| entry.value().clone())
    }

    /// Makes every subsequent call fail as a transport error.
    pub fn set_fail_requests(&self, fail: bool) {
        self.fail_requests.store(fail, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn accept_calls(&self) -> usize {
        self.accept_calls.load(Ordering::SeqCst)
    }

    async fn simulate_network(&self) -> Result<(), AppError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.fail_requests.load(Ordering::SeqCst) {
            return Err(AppError::Transport("backend unreachable".to_string()));
        }
        Ok(())
    }

    fn transition(
        &self,
        order_id: Uuid,
        trigger: Trigger,
        actor: impl FnOnce(&Order) -> Uuid,
    ) -> Result<Order, AppError> {
        let mut entry = self
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

        let actor = actor(entry.value());
        let next = state_machine::apply(entry.value(), &trigger, actor, Utc::now())
            .map_err(|err| AppError::Rejected(err.to_string()))?;
        *entry = next.clone();
        Ok(next)
    }
}

#[async_trait]
impl OrderBackend for InMemoryOrderBackend {
    async fn accept_order(
        &self,
        order_id: Uuid,
        partner_id: Uuid,
    ) -> Result<AcceptResponse, AppError> {
        self.accept_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_network().await?;

        let mut entry = self
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

        let current = entry.value().clone();
        if current.status != OrderStatus::Pending {
            return Ok(AcceptResponse {
                success: current.is_assigned_to(partner_id),
                order: Some(current),
            });
        }

        let accepted =
            state_machine::apply(&current, &Trigger::ClaimConfirmed, partner_id, Utc::now())
                .map_err(|err| AppError::Rejected(err.to_string()))?;
        *entry = accepted.clone();

        Ok(AcceptResponse {
            success: true,
            order: Some(accepted),
        })
    }

    async fn pickup_order(
        &self,
        order_id: Uuid,
        partner_id: Uuid,
        _location: GeoPoint,
    ) -> Result<Order, AppError> {
        self.simulate_network().await?;
        self.transition(order_id, Trigger::Pickup, |_| partner_id)
    }

    async fn mark_delivered(
        &self,
        order_id: Uuid,
        partner_id: Uuid,
        _location: GeoPoint,
    ) -> Result<Order, AppError> {
        self.simulate_network().await?;
        self.transition(order_id, Trigger::MarkDelivered, |_| partner_id)
    }

    async fn confirm_receipt(&self, order_id: Uuid) -> Result<Order, AppError> {
        self.simulate_network().await?;
        self.transition(order_id, Trigger::ConfirmReceipt, |order| {
            order.customer_id
        })
    }

    async fn cancel_order(
        &self,
        order_id: Uuid,
        reason: Option<String>,
    ) -> Result<Order, AppError> {
        self.simulate_network().await?;
        self.transition(order_id, Trigger::Cancel { reason }, |order| {
            order.customer_id
        })
    }

    async fn fetch_order(&self, order_id: Uuid) -> Result<Order, AppError> {
        self.simulate_network().await?;
        self.order(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))
    }

    async fn available_orders(&self, branch_id: Uuid) -> Result<Vec<Order>, AppError> {
        self.simulate_network().await?;
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .filter(|entry| {
                entry.branch_id == branch_id && entry.status == OrderStatus::Pending
            })
            .map(|entry| entry.value().clone())
            .collect();
        orders.sort_by_key(|order| order.created_at);
        Ok(orders)
    }
}
