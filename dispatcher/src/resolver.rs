//! Command template expansion
//!
//! Placeholders are replaced with order values, then characters a console
//! could treat as command separators or substitutions are removed from the
//! whole result.

use shared::{Order, ProductId};

/// Characters never forwarded to a remote console
pub const DENYLIST: &[char] = &[
    ';', '&', '|', '`', '$', '(', ')', '{', '}', '[', ']', '<', '>',
];

/// Longest template or resolved command that is dispatched
pub const MAX_COMMAND_LEN: usize = 500;

/// Expands one template line for one order item
pub fn resolve(template: &str, order: &Order, product_id: ProductId) -> String {
    let replacements = [
        ("{order_id}", order.id.to_string()),
        ("{product_id}", product_id.to_string()),
        ("{billing_email}", order.billing.email.trim().to_string()),
        (
            "{billing_first_name}",
            order.billing.first_name.trim().to_string(),
        ),
        (
            "{billing_last_name}",
            order.billing.last_name.trim().to_string(),
        ),
        (
            "{game_username}",
            sanitize_username(order.game_username.as_deref().unwrap_or_default()),
        ),
        (
            "{steam_id}",
            sanitize_platform_id(order.steam_id.as_deref().unwrap_or_default()),
        ),
    ];

    let expanded = substitute(template, &replacements);
    let filtered: String = expanded.chars().filter(|c| !DENYLIST.contains(c)).collect();
    filtered.trim().to_string()
}

/// Single left-to-right pass so substituted values are never re-expanded
fn substitute(template: &str, replacements: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        match replacements.iter().find(|(key, _)| tail.starts_with(key)) {
            Some((key, value)) => {
                out.push_str(value);
                rest = &tail[key.len()..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

/// In-game names keep letters, digits, `_`, `.` and `-`
pub fn sanitize_username(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect()
}

/// Platform ids are digits only
pub fn sanitize_platform_id(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Whether a template or resolved command may be dispatched.
/// The length limit is in bytes of UTF-8.
pub fn is_dispatchable(command: &str) -> bool {
    !command.is_empty() && command.len() <= MAX_COMMAND_LEN
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::BillingInfo;

    fn order() -> Order {
        Order {
            id: 1042,
            status: "completed".into(),
            billing: BillingInfo {
                email: " buyer@example.com ".into(),
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
            },
            game_username: Some("Viking_01; rm -rf".into()),
            steam_id: Some("7656119-8000000000".into()),
            items: vec![],
        }
    }

    #[test]
    fn test_known_placeholders() {
        let order = order();
        assert_eq!(
            resolve("say Thanks {billing_first_name} for #{order_id}", &order, 7),
            "say Thanks Ada for #1042"
        );
        assert_eq!(
            resolve("give {game_username} item_{product_id}", &order, 7),
            "give Viking_01rm-rf item_7"
        );
        assert_eq!(
            resolve("vip {steam_id} {billing_email}", &order, 7),
            "vip 76561198000000000 buyer@example.com"
        );
    }

    #[test]
    fn test_unknown_placeholder_kept_then_filtered() {
        // Braces are on the denylist, so the name survives without them
        assert_eq!(resolve("say {unknown} hi", &order(), 1), "say unknown hi");
    }

    #[test]
    fn test_denylist_applies_to_template_too() {
        assert_eq!(
            resolve("  say a; kick $(whoami) | b && `c` <d> [e]  ", &order(), 1),
            "say a kick whoami  b  c d e"
        );
    }

    #[test]
    fn test_missing_customer_fields_expand_empty() {
        let order = Order::new(5);
        assert_eq!(resolve("whitelist add {game_username}", &order, 1), "whitelist add");
    }

    #[test]
    fn test_values_not_re_expanded() {
        let mut order = order();
        order.billing.first_name = "{order_id}".into();
        assert_eq!(resolve("say {billing_first_name}", &order, 1), "say order_id");
    }

    #[test]
    fn test_is_dispatchable() {
        assert!(is_dispatchable("say hi"));
        assert!(!is_dispatchable(""));
        assert!(is_dispatchable(&"a".repeat(MAX_COMMAND_LEN)));
        assert!(!is_dispatchable(&"a".repeat(MAX_COMMAND_LEN + 1)));

        // Two bytes per char
        assert!(is_dispatchable(&"é".repeat(MAX_COMMAND_LEN / 2)));
        assert!(!is_dispatchable(&"é".repeat(MAX_COMMAND_LEN / 2 + 1)));
    }

    #[test]
    fn test_sanitizers() {
        assert_eq!(sanitize_username("Bjørn.S-1_x!"), "Bjrn.S-1_x");
        assert_eq!(sanitize_platform_id(" 7656 1198 "), "76561198");
    }
}
