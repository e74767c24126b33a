use std::collections::{BTreeMap, HashSet};

use dashmap::DashMap;
use uuid::Uuid;

use crate::models::order::{Order, OrderStatus};

#[derive(Debug, Default)]
struct Board {
    branch_id: Option<Uuid>,
    available: BTreeMap<Uuid, Order>,
    current: BTreeMap<Uuid, Order>,
    claiming: HashSet<Uuid>,
}

/// Per-partner local projections: orders the partner may claim and orders
/// the partner is working on. These are views, never the order of record.
#[derive(Default)]
pub struct PartnerBoards {
    boards: DashMap<Uuid, Board>,
}

impl PartnerBoards {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the partner's available list with a fresh listing for
    /// `branch_id`, leaving out orders the partner is currently claiming.
    pub fn replace_available(&self, partner_id: Uuid, branch_id: Uuid, orders: Vec<Order>) {
        let mut board = self.boards.entry(partner_id).or_default();
        let available: BTreeMap<Uuid, Order> = orders
            .into_iter()
            .filter(|order| order.status == OrderStatus::Pending)
            .filter(|order| !board.claiming.contains(&order.id))
            .map(|order| (order.id, order))
            .collect();
        board.branch_id = Some(branch_id);
        board.available = available;
    }

    pub fn available(&self, partner_id: &Uuid) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .boards
            .get(partner_id)
            .map(|board| board.available.values().cloned().collect())
            .unwrap_or_default();
        orders.sort_by_key(|order| order.created_at);
        orders
    }

    pub fn current(&self, partner_id: &Uuid) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .boards
            .get(partner_id)
            .map(|board| board.current.values().cloned().collect())
            .unwrap_or_default();
        orders.sort_by_key(|order| order.created_at);
        orders
    }

    pub fn is_available_to(&self, partner_id: &Uuid, order_id: &Uuid) -> bool {
        self.boards
            .get(partner_id)
            .is_some_and(|board| board.available.contains_key(order_id))
    }

    /// Optimistically hides `order_id` from the partner while a claim is in
    /// flight. Returns the hidden copy for rollback.
    pub fn take_for_claim(&self, partner_id: Uuid, order_id: Uuid) -> Option<Order> {
        let mut board = self.boards.entry(partner_id).or_default();
        board.claiming.insert(order_id);
        board.available.remove(&order_id)
    }

    /// Rolls back `take_for_claim`.
    pub fn restore(&self, partner_id: Uuid, order_id: Uuid, hidden: Option<Order>) {
        let mut board = self.boards.entry(partner_id).or_default();
        board.claiming.remove(&order_id);
        if let Some(order) = hidden {
            board.available.insert(order.id, order);
        }
    }

    pub fn settle(&self, partner_id: Uuid, order_id: Uuid) {
        if let Some(mut board) = self.boards.get_mut(&partner_id) {
            board.claiming.remove(&order_id);
        }
    }

    /// Moves a freshly claimed order onto the claimant's current list.
    pub fn mark_current(&self, partner_id: Uuid, order: &Order) {
        let mut board = self.boards.entry(partner_id).or_default();
        board.available.remove(&order.id);
        board.current.insert(order.id, order.clone());
    }

    /// Folds a confirmed order into every board.
    pub fn reconcile(&self, order: &Order) {
        for mut board in self.boards.iter_mut() {
            let partner_id = *board.key();

            if order.status == OrderStatus::Pending {
                if board.branch_id == Some(order.branch_id) && !board.claiming.contains(&order.id)
                {
                    board.available.insert(order.id, order.clone());
                }
            } else {
                board.available.remove(&order.id);
            }

            let mine = order.is_assigned_to(partner_id) && !order.status.is_terminal();
            if mine {
                board.current.insert(order.id, order.clone());
            } else {
                board.current.remove(&order.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::models::location::{GeoPoint, Place};

    fn pending(branch_id: Uuid) -> Order {
        let place = Place {
            point: GeoPoint::new(52.5, 13.4),
            address: String::new(),
        };
        Order {
            id: Uuid::new_v4(),
            status: OrderStatus::Pending,
            customer_id: Uuid::new_v4(),
            branch_id,
            assigned_partner_id: None,
            branch_location: place.clone(),
            delivery_location: place,
            created_at: Utc::now(),
            status_history: Vec::new(),
            cancel_reason: None,
        }
    }

    #[test]
    fn claim_hides_and_rollback_restores() {
        let boards = PartnerBoards::new();
        let partner = Uuid::new_v4();
        let branch = Uuid::new_v4();
        let order = pending(branch);
        boards.replace_available(partner, branch, vec![order.clone()]);

        let hidden = boards.take_for_claim(partner, order.id);
        assert!(boards.available(&partner).is_empty());

        boards.replace_available(partner, branch, vec![order.clone()]);
        assert!(boards.available(&partner).is_empty());

        boards.restore(partner, order.id, hidden);
        assert_eq!(boards.available(&partner), vec![order]);
    }

    #[test]
    fn reconcile_moves_accepted_order_to_assignee() {
        let boards = PartnerBoards::new();
        let winner = Uuid::new_v4();
        let other = Uuid::new_v4();
        let branch = Uuid::new_v4();
        let order = pending(branch);
        boards.replace_available(winner, branch, vec![order.clone()]);
        boards.replace_available(other, branch, vec![order.clone()]);

        let mut accepted = order.clone();
        accepted.status = OrderStatus::Accepted;
        accepted.assigned_partner_id = Some(winner);
        boards.reconcile(&accepted);

        assert!(boards.available(&winner).is_empty());
        assert!(boards.available(&other).is_empty());
        assert_eq!(boards.current(&winner), vec![accepted.clone()]);
        assert!(boards.current(&other).is_empty());

        let mut delivered = accepted;
        delivered.status = OrderStatus::Delivered;
        boards.reconcile(&delivered);
        assert!(boards.current(&winner).is_empty());
    }

    #[test]
    fn new_pending_orders_reach_partners_of_that_branch() {
        let boards = PartnerBoards::new();
        let partner = Uuid::new_v4();
        let branch = Uuid::new_v4();
        boards.replace_available(partner, branch, Vec::new());

        let elsewhere = pending(Uuid::new_v4());
        let here = pending(branch);
        boards.reconcile(&elsewhere);
        boards.reconcile(&here);

        assert_eq!(boards.available(&partner), vec![here]);
    }
}
