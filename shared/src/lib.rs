//! Types shared between the dispatch engine and the operator console:
//! the RCON wire codec, server settings and the order/product model.

pub mod config;
pub mod order;
pub mod packet;

pub use config::{
    ConfigError, FileSettings, RawServer, RawSettings, ServerTarget, Settings, SettingsProvider,
};
pub use order::{
    normalize_status, BillingInfo, Order, OrderId, OrderItem, ProductConfig, ProductId,
    TargetSelector, COMPLETED_STATUS,
};
pub use packet::{FrameError, Packet};
