//! # RCON Dispatch Engine
//!
//! Delivers console commands to remote game servers when a shop order is
//! completed. Each order's purchased products carry command templates; the
//! engine expands them with order data, decides which servers receive which
//! commands and runs them over the RCON TCP protocol.
//!
//! ## Core Responsibilities
//!
//! ### Idempotent Delivery
//! An order is dispatched at most once automatically. A successful run marks
//! the order as sent and later triggers return without touching the network.
//! Only an operator reset or manual resend clears that mark.
//!
//! ### Mutual Exclusion
//! Two runs for the same order never overlap. A per-order lock is taken for
//! the duration of one run and released on every exit path, including panics.
//!
//! ### Multi-Server Fan-Out
//! Products select the default server, a specific server or every server.
//! Commands are grouped per server and each group runs over one authenticated
//! session.
//!
//! ### Failure Accounting
//! Every command outcome is recorded in a bounded per-order history. Failed
//! automatic runs schedule one delayed retry per order.
//!
//! ## Module Organization
//!
//! ### Session Module (`session`)
//! One TCP connection to one server: connect with a bounded retry,
//! authenticate, execute commands, close.
//!
//! ### Resolver and Distributor (`resolver`, `distributor`)
//! Pure functions turning templates into commands and commands into
//! per-server buckets.
//!
//! ### Orchestrator (`orchestrator`)
//! The `Dispatcher` ties settings, orders and products together and produces
//! a `DispatchOutcome` for every call.
//!
//! ### Engine (`engine`)
//! Channel-driven event loop running each dispatch on its own task, plus the
//! retry scheduler feeding back into it.
//!
//! ### Storage (`store`, `history`)
//! Traits for the shop's order and product data, in-memory implementations
//! and typed access to the engine's per-order metadata.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use dispatcher::engine::Engine;
//! use dispatcher::store::{MemoryCatalog, MemoryOrderStore};
//! use shared::{FileSettings, Order};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let orders = Arc::new(MemoryOrderStore::new());
//!     orders.insert_order(Order::new(1001).with_item(42));
//!
//!     let engine = Engine::new(
//!         Arc::new(FileSettings::new("settings.json")),
//!         orders,
//!         Arc::new(MemoryCatalog::new()),
//!     );
//!     let handle = engine.handle();
//!     let running = tokio::spawn(engine.run());
//!
//!     handle.status_changed(1001, "processing", "completed");
//!     handle.shutdown();
//!     let _ = running.await;
//! }
//! ```

pub mod distributor;
pub mod engine;
pub mod error;
pub mod history;
pub mod locks;
pub mod mock;
pub mod orchestrator;
pub mod resolver;
pub mod scheduler;
pub mod session;
pub mod store;

pub use engine::{DispatchMessage, Engine, EngineHandle};
pub use error::{ErrorKind, SessionError, StoreError};
pub use orchestrator::{test_connection, DispatchOutcome, Dispatcher, SkipReason, Trigger};
