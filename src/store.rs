//! Collaborator seams for durable state.
//!
//! The core never talks to a database directly: order persistence and the
//! id-sequence table sit behind these traits. The in-memory implementations
//! back tests, demos, and single-process deployments; production wires the
//! real stores in.
//!
//! Status transitions are compare-and-set so that the unpaid-timeout timer
//! and an explicit cancellation can race without double-releasing a seat:
//! whichever transition lands first wins, the loser observes `None`.

use crate::error::StoreError;
use crate::types::{Order, OrderId, OrderStatus, PassengerId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

/// Durable order records plus the per-user daily cancellation counter.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists a new order.
    async fn insert(&self, order: Order) -> Result<(), StoreError>;

    /// Fetches an order by id.
    async fn get(&self, id: OrderId) -> Result<Option<Order>, StoreError>;

    /// Atomically moves an order from one of `expected` to `to`.
    ///
    /// Returns the updated order, or `None` when the current status was not
    /// among `expected` (the caller lost a race or the transition is
    /// invalid).
    async fn transition(
        &self,
        id: OrderId,
        expected: &[OrderStatus],
        to: OrderStatus,
    ) -> Result<Option<Order>, StoreError>;

    /// Atomically records payment details while moving `expected → to`.
    async fn mark_paid(
        &self,
        id: OrderId,
        expected: OrderStatus,
        to: OrderStatus,
        pay_type: u32,
        pay_account: &str,
        pay_time: DateTime<Utc>,
    ) -> Result<Option<Order>, StoreError>;

    /// Records the rebooking link on both ends of a chain.
    async fn link_change(&self, source: OrderId, change: OrderId) -> Result<(), StoreError>;

    /// How many orders of `user` sit in `Unpaid` right now.
    async fn unpaid_count(&self, user: UserId) -> Result<usize, StoreError>;

    /// Whether `passenger` holds a live reservation overlapping
    /// `[dep, arr]`, ignoring `exclude` (the rebooking source).
    async fn has_time_conflict(
        &self,
        passenger: PassengerId,
        dep: DateTime<Utc>,
        arr: DateTime<Utc>,
        exclude: Option<OrderId>,
    ) -> Result<bool, StoreError>;

    /// Cancellations recorded for `user` on `date`.
    async fn cancel_count(&self, user: UserId, date: NaiveDate) -> Result<u32, StoreError>;

    /// Bumps the cancellation counter for `user` on `date`.
    async fn record_cancellation(&self, user: UserId, date: NaiveDate) -> Result<(), StoreError>;

    /// Every order currently in one of `statuses`.
    async fn list_by_status(&self, statuses: &[OrderStatus]) -> Result<Vec<Order>, StoreError>;
}

/// The `config_id` sequence table behind id-pool refills.
///
/// A refill is `load current, then compare-and-advance`; the conditional
/// update is what keeps concurrent refillers from handing out the same
/// block twice.
#[async_trait]
pub trait SequenceStore: Send + Sync {
    /// Current value of sequence `key` (created at zero when missing).
    async fn current(&self, key: &str) -> Result<u64, StoreError>;

    /// Advances `key` by `by` iff it still equals `expected`. Returns
    /// whether exactly one row changed.
    async fn compare_and_advance(
        &self,
        key: &str,
        expected: u64,
        by: u64,
    ) -> Result<bool, StoreError>;
}

// ============================================================================
// In-memory implementations
// ============================================================================

#[derive(Default)]
struct OrderStoreInner {
    orders: HashMap<OrderId, Order>,
    cancels: HashMap<(UserId, NaiveDate), u32>,
}

/// In-memory [`OrderStore`].
#[derive(Default)]
pub struct InMemoryOrderStore {
    inner: RwLock<OrderStoreInner>,
}

impl InMemoryOrderStore {
    /// Creates an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, OrderStoreInner> {
        self.inner
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, OrderStoreInner> {
        self.inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: Order) -> Result<(), StoreError> {
        let mut inner = self.write();
        if inner.orders.contains_key(&order.id) {
            return Err(StoreError(format!("duplicate order id {}", order.id)));
        }
        inner.orders.insert(order.id, order);
        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.read().orders.get(&id).cloned())
    }

    async fn transition(
        &self,
        id: OrderId,
        expected: &[OrderStatus],
        to: OrderStatus,
    ) -> Result<Option<Order>, StoreError> {
        let mut inner = self.write();
        let Some(order) = inner.orders.get_mut(&id) else {
            return Ok(None);
        };
        if !expected.contains(&order.status) {
            return Ok(None);
        }
        order.status = to;
        Ok(Some(order.clone()))
    }

    async fn mark_paid(
        &self,
        id: OrderId,
        expected: OrderStatus,
        to: OrderStatus,
        pay_type: u32,
        pay_account: &str,
        pay_time: DateTime<Utc>,
    ) -> Result<Option<Order>, StoreError> {
        let mut inner = self.write();
        let Some(order) = inner.orders.get_mut(&id) else {
            return Ok(None);
        };
        if order.status != expected {
            return Ok(None);
        }
        order.status = to;
        order.pay_type = Some(pay_type);
        order.pay_account = Some(pay_account.to_string());
        order.pay_time = Some(pay_time);
        Ok(Some(order.clone()))
    }

    async fn link_change(&self, source: OrderId, change: OrderId) -> Result<(), StoreError> {
        let mut inner = self.write();
        if let Some(order) = inner.orders.get_mut(&source) {
            order.change_order_id = Some(change);
        }
        if let Some(order) = inner.orders.get_mut(&change) {
            order.source_order_id = Some(source);
        }
        Ok(())
    }

    async fn unpaid_count(&self, user: UserId) -> Result<usize, StoreError> {
        Ok(self
            .read()
            .orders
            .values()
            .filter(|o| o.user_id == user && o.status == OrderStatus::Unpaid)
            .count())
    }

    async fn has_time_conflict(
        &self,
        passenger: PassengerId,
        dep: DateTime<Utc>,
        arr: DateTime<Utc>,
        exclude: Option<OrderId>,
    ) -> Result<bool, StoreError> {
        Ok(self.read().orders.values().any(|o| {
            o.passenger_id == passenger
                && o.status.holds_reservation()
                && Some(o.id) != exclude
                && o.overlaps(dep, arr)
        }))
    }

    async fn cancel_count(&self, user: UserId, date: NaiveDate) -> Result<u32, StoreError> {
        Ok(self
            .read()
            .cancels
            .get(&(user, date))
            .copied()
            .unwrap_or(0))
    }

    async fn record_cancellation(&self, user: UserId, date: NaiveDate) -> Result<(), StoreError> {
        *self.write().cancels.entry((user, date)).or_insert(0) += 1;
        Ok(())
    }

    async fn list_by_status(&self, statuses: &[OrderStatus]) -> Result<Vec<Order>, StoreError> {
        Ok(self
            .read()
            .orders
            .values()
            .filter(|o| statuses.contains(&o.status))
            .cloned()
            .collect())
    }
}

/// In-memory [`SequenceStore`].
#[derive(Default)]
pub struct InMemorySequenceStore {
    values: RwLock<HashMap<String, u64>>,
}

impl InMemorySequenceStore {
    /// Creates a store with every sequence at zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SequenceStore for InMemorySequenceStore {
    async fn current(&self, key: &str) -> Result<u64, StoreError> {
        Ok(self
            .values
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(0))
    }

    async fn compare_and_advance(
        &self,
        key: &str,
        expected: u64,
        by: u64,
    ) -> Result<bool, StoreError> {
        let mut values = self
            .values
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let value = values.entry(key.to_string()).or_insert(0);
        if *value != expected {
            return Ok(false);
        }
        *value += by;
        Ok(true)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{Money, SeatClass, TrainNumber};

    fn order(id: u64, user: u64, passenger: u64, status: OrderStatus) -> Order {
        let dep: DateTime<Utc> = "2024-03-05T08:00:00Z".parse().unwrap();
        let arr: DateTime<Utc> = "2024-03-05T12:00:00Z".parse().unwrap();
        Order {
            id: OrderId::new(id),
            order_num: format!("R{id}"),
            user_id: UserId::new(user),
            passenger_id: PassengerId::new(passenger),
            train_num: TrainNumber::from("G1"),
            departure_date: dep.date_naive(),
            car_num: 1,
            seat_num: Some("01A".to_string()),
            seat_class: SeatClass::SecondClass,
            check_gate: None,
            dep_station: "A".to_string(),
            arr_station: "C".to_string(),
            dep_idx: 0,
            arr_idx: 2,
            dep_time: dep,
            arr_time: arr,
            price: Money::from_cents(100),
            book_time: dep,
            pay_time: None,
            pay_type: None,
            pay_account: None,
            status,
            change_order_id: None,
            source_order_id: None,
        }
    }

    #[tokio::test]
    async fn transition_is_compare_and_set() {
        let store = InMemoryOrderStore::new();
        store.insert(order(1, 1, 1, OrderStatus::Unpaid)).await.unwrap();

        let won = store
            .transition(OrderId::new(1), &[OrderStatus::Unpaid], OrderStatus::Cancelled)
            .await
            .unwrap();
        assert_eq!(won.unwrap().status, OrderStatus::Cancelled);

        // A racing timeout handler now observes a lost race.
        let lost = store
            .transition(
                OrderId::new(1),
                &[OrderStatus::Unpaid],
                OrderStatus::UnpaidTimeout,
            )
            .await
            .unwrap();
        assert!(lost.is_none());
    }

    #[tokio::test]
    async fn time_conflict_respects_exclusion_and_boundaries() {
        let store = InMemoryOrderStore::new();
        store.insert(order(1, 1, 9, OrderStatus::Paid)).await.unwrap();

        let dep: DateTime<Utc> = "2024-03-05T10:00:00Z".parse().unwrap();
        let arr: DateTime<Utc> = "2024-03-05T14:00:00Z".parse().unwrap();
        assert!(store
            .has_time_conflict(PassengerId::new(9), dep, arr, None)
            .await
            .unwrap());
        assert!(!store
            .has_time_conflict(PassengerId::new(9), dep, arr, Some(OrderId::new(1)))
            .await
            .unwrap());

        // Touching endpoints do not conflict.
        let dep2: DateTime<Utc> = "2024-03-05T12:00:00Z".parse().unwrap();
        let arr2: DateTime<Utc> = "2024-03-05T13:00:00Z".parse().unwrap();
        assert!(!store
            .has_time_conflict(PassengerId::new(9), dep2, arr2, None)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn sequence_compare_and_advance() {
        let store = InMemorySequenceStore::new();
        assert_eq!(store.current("order_id").await.unwrap(), 0);
        assert!(store.compare_and_advance("order_id", 0, 100).await.unwrap());
        assert!(!store.compare_and_advance("order_id", 0, 100).await.unwrap());
        assert_eq!(store.current("order_id").await.unwrap(), 100);
    }
}
