use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

use crate::models::order::Order;

/// Reconciling cache of orders. The remote system of record owns the truth;
/// every write here is a confirmed payload from it.
type LockTable = DashMap<Uuid, Arc<Mutex<()>>>;

pub struct OrderStore {
    orders: DashMap<Uuid, Order>,
    locks: Arc<LockTable>,
    updates_tx: broadcast::Sender<Order>,
}

impl OrderStore {
    pub fn new(event_buffer_size: usize) -> Self {
        let (updates_tx, _unused_rx) = broadcast::channel(event_buffer_size);
        Self {
            orders: DashMap::new(),
            locks: Arc::new(DashMap::new()),
            updates_tx,
        }
    }

    pub fn get(&self, order_id: &Uuid) -> Option<Order> {
        self.orders.get(order_id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn snapshot(&self) -> Vec<Order> {
        self.orders.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Overwrites the cached copy and notifies subscribers. Re-applying an
    /// identical payload is silent.
    pub fn apply_confirmed(&self, order: Order) {
        let changed = match self.orders.insert(order.id, order.clone()) {
            Some(previous) => previous != order,
            None => true,
        };

        if changed {
            debug!(order_id = %order.id, status = %order.status, "order cache updated");
            let _ = self.updates_tx.send(order);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Order> {
        self.updates_tx.subscribe()
    }

    /// Per-order guard serialising transition application. The lock entry
    /// lives only while someone holds or waits for it.
    pub async fn lock(&self, order_id: Uuid) -> OrderGuard {
        let lock = self
            .locks
            .entry(order_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        OrderGuard {
            order_id,
            locks: self.locks.clone(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Orders with a held or contended lock.
    pub fn locked_count(&self) -> usize {
        self.locks.len()
    }
}

pub struct OrderGuard {
    order_id: Uuid,
    locks: Arc<LockTable>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for OrderGuard {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        // One reference is the table's, one is this guard's; any more are
        // waiters, which keep the entry alive.
        self.locks
            .remove_if(&self.order_id, |_, lock| Arc::strong_count(lock) == 2);
        drop(guard);
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::models::location::{GeoPoint, Place};
    use crate::models::order::OrderStatus;

    fn order() -> Order {
        let place = Place {
            point: GeoPoint::new(1.0, 1.0),
            address: String::new(),
        };
        Order {
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
        }
    }

    #[tokio::test]
    async fn identical_payload_is_not_rebroadcast() {
        let store = OrderStore::new(16);
        let mut rx = store.subscribe();
        let order = order();

        store.apply_confirmed(order.clone());
        store.apply_confirmed(order.clone());

        assert_eq!(rx.recv().await.unwrap(), order);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn lock_is_exclusive_per_order() {
        let store = OrderStore::new(16);
        let id = Uuid::new_v4();

        let guard = store.lock(id).await;
        let other = store.lock(Uuid::new_v4()).await;
        drop(other);

        let pending = tokio::time::timeout(std::time::Duration::from_millis(20), store.lock(id));
        assert!(pending.await.is_err());

        drop(guard);
        let _again = store.lock(id).await;
    }

    #[tokio::test]
    async fn released_locks_leave_no_entries() {
        let store = OrderStore::new(16);

        for _ in 0..1000 {
            let _guard = store.lock(Uuid::new_v4()).await;
        }

        assert_eq!(store.locked_count(), 0);
    }

    #[tokio::test]
    async fn contended_lock_survives_first_release() {
        let store = Arc::new(OrderStore::new(16));
        let id = Uuid::new_v4();

        let guard = store.lock(id).await;
        let waiter = {
            let store = store.clone();
            tokio::spawn(async move {
                let _guard = store.lock(id).await;
            })
        };
        while store.locks.get(&id).map(|lock| Arc::strong_count(&lock)) != Some(3) {
            tokio::task::yield_now().await;
        }

        drop(guard);
        assert_eq!(store.locked_count(), 1);

        waiter.await.unwrap();
        assert_eq!(store.locked_count(), 0);
    }
}
