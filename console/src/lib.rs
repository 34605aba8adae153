//! # RCON Operator Console
//!
//! Command-line front end for the dispatch engine. Operators use it to probe
//! servers, resend or reset orders, read per-order history and run a
//! long-lived watcher that feeds order status changes into the engine.
//!
//! ## Module Organization
//!
//! ### Data Module (`data`)
//! Loads and saves the JSON data file holding orders, the product catalog and
//! the engine's per-order metadata.
//!
//! ### Report Module (`report`)
//! Text views: dispatch outcomes, history listings and the order list.
//!
//! ### Watch Module (`watch`)
//! The line protocol read from stdin by `rcon-console watch`.

pub mod data;
pub mod report;
pub mod watch;

pub use data::DataFile;
