//! Order and product storage seams
//!
//! The shop owns orders and products; the engine only reads them and keeps
//! its own flags and history as order-scoped metadata.

use crate::error::StoreError;
use crate::history::{History, HistoryEntry};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::{Order, OrderId, ProductConfig, ProductId};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

pub const META_SENT: &str = "_rcon_sent";
pub const META_SENT_AT: &str = "_rcon_sent_at";
pub const META_SENT_METHOD: &str = "_rcon_sent_method";
pub const META_RETRY_ATTEMPTS: &str = "_rcon_retry_attempts";
pub const META_HISTORY: &str = "_rcon_log";

const SENT_YES: &str = "yes";

/// Orders plus arbitrary order-scoped key/value metadata
pub trait OrderRepository: Send + Sync {
    fn order(&self, order_id: OrderId) -> Option<Order>;
    fn meta(&self, order_id: OrderId, key: &str) -> Option<Value>;
    fn set_meta(&self, order_id: OrderId, key: &str, value: Value);
    fn delete_meta(&self, order_id: OrderId, key: &str);
}

/// Per-product command configuration
pub trait ProductCatalog: Send + Sync {
    fn product(&self, product_id: ProductId) -> Option<ProductConfig>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentMethod {
    Automatic,
    Manual,
}

/// Dispatch flags persisted on an order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderDispatchState {
    pub sent: bool,
    pub sent_at: Option<DateTime<Utc>>,
    pub sent_method: Option<SentMethod>,
    pub retry_attempts: u32,
}

/// Typed access to the engine's metadata keys
pub trait DispatchMeta {
    fn dispatch_state(&self, order_id: OrderId) -> OrderDispatchState;
    fn mark_sent(&self, order_id: OrderId, method: SentMethod, at: DateTime<Utc>);
    /// Clears only the `sent` flag, as a manual resend does
    fn clear_sent(&self, order_id: OrderId);
    /// Clears every dispatch flag without touching history
    fn reset_dispatch_state(&self, order_id: OrderId);
    fn set_retry_attempts(&self, order_id: OrderId, attempts: u32);
    fn history(&self, order_id: OrderId) -> History;
    fn append_history(&self, order_id: OrderId, entry: HistoryEntry);
}

impl<R: OrderRepository + ?Sized> DispatchMeta for R {
    fn dispatch_state(&self, order_id: OrderId) -> OrderDispatchState {
        let sent: Option<String> = typed_meta_or_warn(self, order_id, META_SENT);
        OrderDispatchState {
            sent: sent.as_deref() == Some(SENT_YES),
            sent_at: typed_meta_or_warn(self, order_id, META_SENT_AT),
            sent_method: typed_meta_or_warn(self, order_id, META_SENT_METHOD),
            retry_attempts: typed_meta_or_warn(self, order_id, META_RETRY_ATTEMPTS).unwrap_or(0),
        }
    }

    fn mark_sent(&self, order_id: OrderId, method: SentMethod, at: DateTime<Utc>) {
        self.set_meta(order_id, META_SENT, Value::from(SENT_YES));
        self.set_meta(order_id, META_SENT_AT, Value::from(at.to_rfc3339()));
        self.set_meta(order_id, META_SENT_METHOD, to_value(&method));
        self.delete_meta(order_id, META_RETRY_ATTEMPTS);
    }

    fn clear_sent(&self, order_id: OrderId) {
        self.delete_meta(order_id, META_SENT);
    }

    fn reset_dispatch_state(&self, order_id: OrderId) {
        self.delete_meta(order_id, META_SENT);
        self.delete_meta(order_id, META_SENT_AT);
        self.delete_meta(order_id, META_SENT_METHOD);
        self.delete_meta(order_id, META_RETRY_ATTEMPTS);
    }

    fn set_retry_attempts(&self, order_id: OrderId, attempts: u32) {
        if attempts == 0 {
            self.delete_meta(order_id, META_RETRY_ATTEMPTS);
        } else {
            self.set_meta(order_id, META_RETRY_ATTEMPTS, Value::from(attempts));
        }
    }

    fn history(&self, order_id: OrderId) -> History {
        typed_meta_or_warn(self, order_id, META_HISTORY).unwrap_or_default()
    }

    fn append_history(&self, order_id: OrderId, entry: HistoryEntry) {
        let mut history = self.history(order_id);
        history.push(entry);
        self.set_meta(order_id, META_HISTORY, to_value(&history));
    }
}

pub fn typed_meta<T, R>(repo: &R, order_id: OrderId, key: &str) -> Result<Option<T>, StoreError>
where
    T: DeserializeOwned,
    R: OrderRepository + ?Sized,
{
    match repo.meta(order_id, key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|source| StoreError::Metadata {
                key: key.to_string(),
                source,
            }),
    }
}

fn typed_meta_or_warn<T, R>(repo: &R, order_id: OrderId, key: &str) -> Option<T>
where
    T: DeserializeOwned,
    R: OrderRepository + ?Sized,
{
    typed_meta(repo, order_id, key).unwrap_or_else(|e| {
        warn!("Order {}: ignoring {}", order_id, e);
        None
    })
}

fn to_value<T: Serialize>(value: &T) -> Value {
    // Only engine-owned plain data goes through here
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// In-process order store
#[derive(Default)]
pub struct MemoryOrderStore {
    orders: DashMap<OrderId, Order>,
    meta: DashMap<OrderId, HashMap<String, Value>>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_order(&self, order: Order) {
        self.orders.insert(order.id, order);
    }

    /// Known order ids in ascending order
    pub fn order_ids(&self) -> Vec<OrderId> {
        let mut ids: Vec<OrderId> = self.orders.iter().map(|o| *o.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Updates an order's status and returns the previous one
    pub fn set_status(&self, order_id: OrderId, status: &str) -> Option<String> {
        self.orders
            .get_mut(&order_id)
            .map(|mut order| std::mem::replace(&mut order.status, status.to_string()))
    }

    pub fn from_snapshot(snapshot: &StoreSnapshot) -> Self {
        let store = Self::new();
        for order in &snapshot.orders {
            store.insert_order(order.clone());
        }
        for (order_id, values) in &snapshot.meta {
            store
                .meta
                .insert(*order_id, values.iter().map(|(k, v)| (k.clone(), v.clone())).collect());
        }
        store
    }

    /// Copies orders and metadata into `snapshot`, keeping its products
    pub fn export_into(&self, snapshot: &mut StoreSnapshot) {
        let mut orders: Vec<Order> = self.orders.iter().map(|o| o.value().clone()).collect();
        orders.sort_by_key(|o| o.id);
        snapshot.orders = orders;

        snapshot.meta = self
            .meta
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| {
                let values = entry
                    .value()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                (*entry.key(), values)
            })
            .collect();
    }
}

impl OrderRepository for MemoryOrderStore {
    fn order(&self, order_id: OrderId) -> Option<Order> {
        self.orders.get(&order_id).map(|o| o.value().clone())
    }

    fn meta(&self, order_id: OrderId, key: &str) -> Option<Value> {
        self.meta
            .get(&order_id)
            .and_then(|values| values.get(key).cloned())
    }

    fn set_meta(&self, order_id: OrderId, key: &str, value: Value) {
        self.meta
            .entry(order_id)
            .or_default()
            .insert(key.to_string(), value);
    }

    fn delete_meta(&self, order_id: OrderId, key: &str) {
        if let Some(mut values) = self.meta.get_mut(&order_id) {
            values.remove(key);
        }
    }
}

/// In-process product catalog
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    products: HashMap<ProductId, ProductConfig>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_product(mut self, product_id: ProductId, config: ProductConfig) -> Self {
        self.products.insert(product_id, config);
        self
    }

    pub fn from_snapshot(snapshot: &StoreSnapshot) -> Self {
        Self {
            products: snapshot
                .products
                .iter()
                .map(|(id, config)| (*id, config.clone()))
                .collect(),
        }
    }
}

impl ProductCatalog for MemoryCatalog {
    fn product(&self, product_id: ProductId) -> Option<ProductConfig> {
        self.products.get(&product_id).cloned()
    }
}

/// Everything the console persists between invocations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSnapshot {
    pub products: BTreeMap<ProductId, ProductConfig>,
    pub orders: Vec<Order>,
    pub meta: BTreeMap<OrderId, BTreeMap<String, Value>>,
}

impl StoreSnapshot {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::TargetSelector;

    #[test]
    fn test_dispatch_state_round_trip() {
        let store = MemoryOrderStore::new();
        assert_eq!(store.dispatch_state(1), OrderDispatchState::default());

        let at = Utc::now();
        store.set_retry_attempts(1, 2);
        store.mark_sent(1, SentMethod::Manual, at);

        let state = store.dispatch_state(1);
        assert!(state.sent);
        assert_eq!(state.sent_method, Some(SentMethod::Manual));
        assert_eq!(state.sent_at.map(|t| t.timestamp()), Some(at.timestamp()));
        assert_eq!(state.retry_attempts, 0);
        assert_eq!(store.meta(1, META_SENT), Some(Value::from("yes")));
    }

    #[test]
    fn test_clear_sent_keeps_timestamp() {
        let store = MemoryOrderStore::new();
        store.mark_sent(4, SentMethod::Automatic, Utc::now());

        store.clear_sent(4);
        let state = store.dispatch_state(4);
        assert!(!state.sent);
        assert!(state.sent_at.is_some());

        store.reset_dispatch_state(4);
        assert_eq!(store.dispatch_state(4), OrderDispatchState::default());
    }

    #[test]
    fn test_corrupt_metadata_is_ignored() {
        let store = MemoryOrderStore::new();
        store.set_meta(9, META_RETRY_ATTEMPTS, Value::from("many"));
        store.set_meta(9, META_HISTORY, Value::from(42));

        assert_eq!(store.dispatch_state(9).retry_attempts, 0);
        assert!(store.history(9).is_empty());
        assert!(matches!(
            typed_meta::<u32, _>(&store, 9, META_RETRY_ATTEMPTS),
            Err(StoreError::Metadata { .. })
        ));
    }

    #[test]
    fn test_history_append_through_metadata() {
        let store = MemoryOrderStore::new();
        store.append_history(3, HistoryEntry::new(true, "first"));
        store.append_history(3, HistoryEntry::new(false, "second"));

        let history = store.history(3);
        assert_eq!(history.len(), 2);
        assert_eq!(history.last_status(), Some(false));
        assert!(store.history(4).is_empty());
    }

    #[test]
    fn test_set_status_returns_previous() {
        let store = MemoryOrderStore::new();
        store.insert_order(Order::new(5));

        assert_eq!(store.set_status(5, "completed"), Some("pending".to_string()));
        assert_eq!(store.order(5).unwrap().status, "completed");
        assert_eq!(store.set_status(6, "completed"), None);

        store.insert_order(Order::new(2));
        assert_eq!(store.order_ids(), vec![2, 5]);
    }

    #[test]
    fn test_snapshot_file_round_trip() {
        let mut snapshot = StoreSnapshot::default();
        snapshot
            .products
            .insert(10, ProductConfig::new(&["say {order_id}"], TargetSelector::All));

        let store = MemoryOrderStore::new();
        store.insert_order(Order::new(1).with_item(10));
        store.mark_sent(1, SentMethod::Automatic, Utc::now());
        store.export_into(&mut snapshot);

        let file = tempfile::NamedTempFile::new().unwrap();
        snapshot.save(file.path()).unwrap();
        let loaded = StoreSnapshot::load(file.path()).unwrap();

        let restored = MemoryOrderStore::from_snapshot(&loaded);
        assert!(restored.dispatch_state(1).sent);
        assert_eq!(restored.order(1).unwrap().items.len(), 1);

        let catalog = MemoryCatalog::from_snapshot(&loaded);
        assert_eq!(catalog.product(10).unwrap().server, TargetSelector::All);
        assert!(catalog.product(11).is_none());
    }
}
