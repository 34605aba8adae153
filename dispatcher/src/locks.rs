//! Per-order advisory locks

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use shared::OrderId;
use std::sync::Arc;
use std::time::Instant;

/// Set of orders with a dispatch run in flight
#[derive(Clone, Default)]
pub struct OrderLocks {
    held: Arc<DashMap<OrderId, Instant>>,
}

impl OrderLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the lock for `order_id`, or `None` when another run holds it.
    /// The lock is released when the guard is dropped.
    pub fn try_acquire(&self, order_id: OrderId) -> Option<OrderLockGuard> {
        match self.held.entry(order_id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(Instant::now());
                Some(OrderLockGuard {
                    order_id,
                    held: Arc::clone(&self.held),
                })
            }
        }
    }

    pub fn is_locked(&self, order_id: OrderId) -> bool {
        self.held.contains_key(&order_id)
    }

    pub fn held_count(&self) -> usize {
        self.held.len()
    }
}

pub struct OrderLockGuard {
    order_id: OrderId,
    held: Arc<DashMap<OrderId, Instant>>,
}

impl OrderLockGuard {
    pub fn order_id(&self) -> OrderId {
        self.order_id
    }
}

impl Drop for OrderLockGuard {
    fn drop(&mut self) {
        self.held.remove(&self.order_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_refused() {
        let locks = OrderLocks::new();
        let guard = locks.try_acquire(7).unwrap();
        assert_eq!(guard.order_id(), 7);
        assert!(locks.try_acquire(7).is_none());
        assert!(locks.is_locked(7));

        // Other orders are independent
        let other = locks.try_acquire(8);
        assert!(other.is_some());
        assert_eq!(locks.held_count(), 2);
    }

    #[test]
    fn test_drop_releases() {
        let locks = OrderLocks::new();
        {
            let _guard = locks.try_acquire(1).unwrap();
        }
        assert!(!locks.is_locked(1));
        assert!(locks.try_acquire(1).is_some());
    }

    #[test]
    fn test_released_on_panic() {
        let locks = OrderLocks::new();
        let cloned = locks.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = cloned.try_acquire(3).unwrap();
            panic!("run blew up");
        }));

        assert!(result.is_err());
        assert!(!locks.is_locked(3));
    }
}
