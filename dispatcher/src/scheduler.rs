//! One-shot delayed retries
//!
//! Each scheduled retry is a sleeping task that posts `RetryDue` back into the
//! engine's message channel. At most one retry is pending per order.

use crate::engine::DispatchMessage;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{debug, error};
use shared::OrderId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

#[derive(Clone)]
pub struct RetryScheduler {
    pending: Arc<DashMap<OrderId, Instant>>,
    tx: mpsc::UnboundedSender<DispatchMessage>,
}

impl RetryScheduler {
    pub fn new(tx: mpsc::UnboundedSender<DispatchMessage>) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            tx,
        }
    }

    /// Schedules a retry for `order_id` after `delay`.
    /// Returns `false` when one is already pending.
    pub fn schedule(&self, order_id: OrderId, delay: Duration) -> bool {
        let due = Instant::now() + delay;
        match self.pending.entry(order_id) {
            Entry::Occupied(_) => return false,
            Entry::Vacant(slot) => {
                slot.insert(due);
            }
        }

        let pending = Arc::clone(&self.pending);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(due).await;
            pending.remove(&order_id);
            debug!("Retry due for order {}", order_id);
            if let Err(e) = tx.send(DispatchMessage::RetryDue { order_id }) {
                error!("Failed to queue retry for order {}: {}", order_id, e);
            }
        });

        true
    }

    pub fn scheduled_at(&self, order_id: OrderId) -> Option<Instant> {
        self.pending.get(&order_id).map(|due| *due)
    }

    pub fn is_pending(&self, order_id: OrderId) -> bool {
        self.pending.contains_key(&order_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
