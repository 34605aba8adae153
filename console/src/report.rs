//! Plain-text views printed by the console

use dispatcher::history::History;
use dispatcher::store::{DispatchMeta, MemoryOrderStore, OrderRepository};
use dispatcher::{DispatchOutcome, SkipReason};
use shared::OrderId;
use std::fmt::Write;

pub fn status_symbol(last: Option<bool>) -> &'static str {
    match last {
        Some(true) => "✓",
        Some(false) => "✗",
        None => "—",
    }
}

pub fn format_outcome(order_id: OrderId, outcome: &DispatchOutcome) -> String {
    let mut out = String::new();

    match outcome.skipped {
        Some(SkipReason::AlreadyRunning) => {
            let _ = writeln!(out, "Order {}: a dispatch is already running", order_id);
            return out;
        }
        Some(SkipReason::AlreadySent) => {
            let _ = writeln!(out, "Order {}: already sent", order_id);
            return out;
        }
        None => {}
    }

    let verdict = if outcome.is_success() { "ok" } else { "FAILED" };
    let _ = writeln!(
        out,
        "Order {}: {} ({}/{} commands sent)",
        order_id, verdict, outcome.sent, outcome.expected
    );
    for warning in &outcome.warnings {
        let _ = writeln!(out, "  warning: {}", warning);
    }
    for error in &outcome.errors {
        let _ = writeln!(out, "  error: {}", error);
    }
    if outcome.retry_scheduled {
        let _ = writeln!(out, "  retry scheduled");
    }
    out
}

/// The last `limit` entries, newest first
pub fn format_history(history: &History, limit: usize) -> String {
    if history.is_empty() {
        return "No history\n".to_string();
    }

    let mut out = String::new();
    for entry in history.recent(limit).into_iter().rev() {
        let _ = writeln!(
            out,
            "{} {} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            status_symbol(Some(entry.success)),
            entry.message
        );
        if !entry.response.is_empty() {
            let _ = writeln!(out, "    ↳ {}", entry.response);
        }
    }
    out
}

pub fn history_json(history: &History, limit: usize) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&history.recent(limit))
}

/// One line per order: id, status, sent flag and last history result
pub fn format_order_list(orders: &MemoryOrderStore) -> String {
    let ids = orders.order_ids();
    if ids.is_empty() {
        return "No orders\n".to_string();
    }

    let mut out = String::new();
    for order_id in ids {
        let Some(order) = orders.order(order_id) else {
            continue;
        };
        let state = orders.dispatch_state(order_id);
        let sent = match (state.sent, state.sent_at, state.sent_method) {
            (true, Some(at), Some(method)) => {
                format!("sent {} ({:?})", at.format("%Y-%m-%d %H:%M"), method)
            }
            (true, _, _) => "sent".to_string(),
            (false, _, _) => "not sent".to_string(),
        };
        let _ = writeln!(
            out,
            "#{:<8} {:<12} {:<32} {}",
            order_id,
            order.status,
            sent,
            status_symbol(orders.history(order_id).last_status())
        );
    }
    out
}
