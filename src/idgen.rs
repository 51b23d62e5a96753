//! Pooled identifier allocation.
//!
//! Ids come out of bounded in-process pools; a drained pool refills by
//! atomically advancing its row in the sequence store (`update … set val =
//! val + capacity where val = expected`), so concurrent processes never
//! hand out overlapping blocks. Order and ticket ids are sharded: the low
//! nibble carries `user_id % 10` / `passenger_id % 10` for downstream
//! routing.

use crate::error::{BookingError, Result};
use crate::store::SequenceStore;
use crate::types::{OrderId, PassengerId, TicketId, UserId};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

/// How many refill attempts to make before giving up; each attempt loses
/// only to another refiller that advanced the same sequence first.
const MAX_REFILL_ATTEMPTS: u32 = 8;

/// A bounded pool of pre-allocated monotonic ids for one sequence key.
pub struct IdPool {
    key: &'static str,
    capacity: u64,
    store: Arc<dyn SequenceStore>,
    // The pool mutex also serializes refills: exactly one refiller.
    pool: Mutex<VecDeque<u64>>,
}

impl IdPool {
    /// Creates an empty pool over sequence `key`; the first `next` refills.
    #[must_use]
    pub fn new(key: &'static str, capacity: u64, store: Arc<dyn SequenceStore>) -> Self {
        Self {
            key,
            capacity: capacity.max(1),
            store,
            pool: Mutex::new(VecDeque::new()),
        }
    }

    /// Takes the next id, refilling the pool when drained.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::IdPoolExhausted`] when the sequence store
    /// keeps rejecting the refill, or a store error if it fails outright.
    pub async fn next(&self) -> Result<u64> {
        let mut pool = self.pool.lock().await;
        if pool.is_empty() {
            self.refill(&mut pool).await?;
        }
        pool.pop_front().ok_or(BookingError::IdPoolExhausted)
    }

    /// Takes the next id and folds `base % 10` into the low nibble.
    pub async fn next_sharded(&self, base: u64) -> Result<u64> {
        Ok((self.next().await? << 4) | (base % 10))
    }

    async fn refill(&self, pool: &mut VecDeque<u64>) -> Result<()> {
        for _ in 0..MAX_REFILL_ATTEMPTS {
            let offset = self.store.current(self.key).await?;
            if self
                .store
                .compare_and_advance(self.key, offset, self.capacity)
                .await?
            {
                pool.extend(offset..offset + self.capacity);
                tracing::debug!(key = self.key, offset, capacity = self.capacity, "id pool refilled");
                return Ok(());
            }
        }
        tracing::warn!(key = self.key, "id pool refill kept losing the sequence race");
        Err(BookingError::IdPoolExhausted)
    }
}

/// The id service: one pool per id kind.
pub struct IdService {
    orders: IdPool,
    tickets: IdPool,
    passengers: IdPool,
}

impl IdService {
    /// Creates the service over a sequence store, `capacity` ids per
    /// refill.
    #[must_use]
    pub fn new(store: Arc<dyn SequenceStore>, capacity: u64) -> Self {
        Self {
            orders: IdPool::new("order_id", capacity, Arc::clone(&store)),
            tickets: IdPool::new("ticket_id", capacity, Arc::clone(&store)),
            passengers: IdPool::new("passenger_id", capacity, store),
        }
    }

    /// Allocates an order id carrying `user % 10` in its low nibble.
    ///
    /// # Errors
    ///
    /// Propagates pool refill failures.
    pub async fn order_id(&self, user: UserId) -> Result<OrderId> {
        Ok(OrderId::new(self.orders.next_sharded(user.get()).await?))
    }

    /// Allocates a ticket id carrying `passenger % 10` in its low nibble.
    ///
    /// # Errors
    ///
    /// Propagates pool refill failures.
    pub async fn ticket_id(&self, passenger: PassengerId) -> Result<TicketId> {
        Ok(TicketId::new(
            self.tickets.next_sharded(passenger.get()).await?,
        ))
    }

    /// Allocates ticket ids for a whole travelling party.
    ///
    /// # Errors
    ///
    /// Propagates pool refill failures.
    pub async fn ticket_ids(&self, passengers: &[PassengerId]) -> Result<Vec<TicketId>> {
        let mut ids = Vec::with_capacity(passengers.len());
        for passenger in passengers {
            ids.push(self.ticket_id(*passenger).await?);
        }
        Ok(ids)
    }

    /// Allocates a plain passenger id.
    ///
    /// # Errors
    ///
    /// Propagates pool refill failures.
    pub async fn passenger_id(&self) -> Result<PassengerId> {
        Ok(PassengerId::new(self.passengers.next().await?))
    }
}
