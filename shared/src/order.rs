//! Order and product data supplied by the shop

use serde::{Deserialize, Serialize};

pub type OrderId = u64;
pub type ProductId = u64;

/// Status an order must reach before its commands are dispatched
pub const COMPLETED_STATUS: &str = "completed";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingInfo {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
}

/// A purchased order with the customer-supplied game identifiers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Order {
    pub id: OrderId,
    pub status: String,
    pub billing: BillingInfo,
    pub game_username: Option<String>,
    pub steam_id: Option<String>,
    pub items: Vec<OrderItem>,
}

impl Order {
    pub fn new(id: OrderId) -> Self {
        Self {
            id,
            status: "pending".to_string(),
            ..Default::default()
        }
    }

    pub fn with_item(mut self, product_id: ProductId) -> Self {
        self.items.push(OrderItem { product_id });
        self
    }
}

/// Strips the shop's `wc-` status prefix
pub fn normalize_status(status: &str) -> &str {
    status.strip_prefix("wc-").unwrap_or(status)
}

/// Which configured server(s) a product's commands go to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TargetSelector {
    /// First configured server
    #[default]
    Default,
    /// Every configured server
    All,
    /// Server at this list position
    Index(usize),
}

impl TargetSelector {
    /// Anything other than "", "all" or a non-negative number is the default
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.eq_ignore_ascii_case("all") {
            TargetSelector::All
        } else if let Ok(index) = value.parse::<usize>() {
            TargetSelector::Index(index)
        } else {
            TargetSelector::Default
        }
    }
}

impl From<String> for TargetSelector {
    fn from(value: String) -> Self {
        TargetSelector::parse(&value)
    }
}

impl From<TargetSelector> for String {
    fn from(selector: TargetSelector) -> Self {
        match selector {
            TargetSelector::Default => String::new(),
            TargetSelector::All => "all".to_string(),
            TargetSelector::Index(index) => index.to_string(),
        }
    }
}

/// Per-product command templates, one command per entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductConfig {
    pub commands: Vec<String>,
    pub server: TargetSelector,
}

impl ProductConfig {
    pub fn new(commands: &[&str], server: TargetSelector) -> Self {
        Self {
            commands: commands.iter().map(|c| c.to_string()).collect(),
            server,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_parsing() {
        assert_eq!(TargetSelector::parse(""), TargetSelector::Default);
        assert_eq!(TargetSelector::parse("all"), TargetSelector::All);
        assert_eq!(TargetSelector::parse("2"), TargetSelector::Index(2));
        assert_eq!(TargetSelector::parse("-1"), TargetSelector::Default);
        assert_eq!(TargetSelector::parse("primary"), TargetSelector::Default);
    }

    #[test]
    fn test_selector_serde_uses_strings() {
        let product: ProductConfig =
            serde_json::from_str(r#"{"commands": ["say hi"], "server": "1"}"#).unwrap();
        assert_eq!(product.server, TargetSelector::Index(1));

        let json = serde_json::to_string(&ProductConfig::new(&["x"], TargetSelector::All)).unwrap();
        assert!(json.contains(r#""server":"all""#));

        let missing: ProductConfig = serde_json::from_str(r#"{"commands": []}"#).unwrap();
        assert_eq!(missing.server, TargetSelector::Default);
    }

    #[test]
    fn test_normalize_status() {
        assert_eq!(normalize_status("wc-completed"), COMPLETED_STATUS);
        assert_eq!(normalize_status("completed"), COMPLETED_STATUS);
        assert_eq!(normalize_status("processing"), "processing");
    }

    #[test]
    fn test_order_builder() {
        let order = Order::new(12).with_item(3).with_item(4);
        assert_eq!(order.id, 12);
        assert_eq!(order.items.len(), 2);
        assert_eq!(order.items[1].product_id, 4);
    }
}
