//! Line protocol read by `rcon-console watch`
//!
//! ```text
//! 1042 processing completed     status change
//! resend 1042                   manual resend
//! reset 1042                    clear sent flags
//! ```

use shared::OrderId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchCommand {
    StatusChanged {
        order_id: OrderId,
        old_status: String,
        new_status: String,
    },
    Resend(OrderId),
    Reset(OrderId),
}

pub fn parse_line(line: &str) -> Result<WatchCommand, String> {
    let parts: Vec<&str> = line.split_whitespace().collect();

    match parts.as_slice() {
        ["resend", id] => parse_id(id).map(WatchCommand::Resend),
        ["reset", id] => parse_id(id).map(WatchCommand::Reset),
        [id, old_status, new_status] => Ok(WatchCommand::StatusChanged {
            order_id: parse_id(id)?,
            old_status: old_status.to_string(),
            new_status: new_status.to_string(),
        }),
        _ => Err(format!("unrecognised line: {}", line.trim())),
    }
}

fn parse_id(value: &str) -> Result<OrderId, String> {
    value
        .parse()
        .map_err(|_| format!("invalid order id: {}", value))
}
