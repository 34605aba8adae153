//! Dispatch runs: one order in, commands out to every selected server
//!
//! `Dispatcher::dispatch` never fails. Whatever happens is reported through
//! the returned `DispatchOutcome` and recorded in the order's history.

use crate::distributor::{distribute, CommandSpec};
use crate::error::{ErrorKind, SessionResult};
use crate::history::{redact, HistoryEntry};
use crate::locks::OrderLocks;
use crate::resolver::{is_dispatchable, resolve};
use crate::scheduler::RetryScheduler;
use crate::session::{self, BatchReport};
use crate::store::{DispatchMeta, OrderRepository, ProductCatalog, SentMethod};
use chrono::Utc;
use log::{debug, error, info, warn};
use shared::config::{MAX_TIMEOUT_SECS, MIN_TIMEOUT_SECS};
use shared::{
    normalize_status, Order, OrderId, ServerTarget, Settings, SettingsProvider, COMPLETED_STATUS,
};
use std::fmt;
use std::sync::Arc;

/// Command used by connection probes when none is given
pub const DEFAULT_PROBE_COMMAND: &str = "status";
/// Harmless command used to check that configured servers answer
pub const REACHABILITY_COMMAND: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Order status change or a scheduled retry
    Automatic,
    /// Operator resend; ignores and clears the `sent` flag
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Automatic => f.write_str("automatic"),
            Trigger::Manual => f.write_str("manual"),
        }
    }
}

impl From<Trigger> for SentMethod {
    fn from(trigger: Trigger) -> Self {
        match trigger {
            Trigger::Automatic => SentMethod::Automatic,
            Trigger::Manual => SentMethod::Manual,
        }
    }
}

/// Why a dispatch call returned without running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyRunning,
    AlreadySent,
}

/// Aggregate result of one dispatch call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchOutcome {
    pub sent: usize,
    pub expected: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub skipped: Option<SkipReason>,
    pub retry_scheduled: bool,
}

impl DispatchOutcome {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Default::default()
        }
    }

    fn fatal(message: String) -> Self {
        Self {
            errors: vec![message],
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && self.sent == self.expected
    }
}

pub struct Dispatcher {
    settings: Arc<dyn SettingsProvider>,
    orders: Arc<dyn OrderRepository>,
    catalog: Arc<dyn ProductCatalog>,
    locks: OrderLocks,
    retries: Option<RetryScheduler>,
}

impl Dispatcher {
    pub fn new(
        settings: Arc<dyn SettingsProvider>,
        orders: Arc<dyn OrderRepository>,
        catalog: Arc<dyn ProductCatalog>,
    ) -> Self {
        Self {
            settings,
            orders,
            catalog,
            locks: OrderLocks::new(),
            retries: None,
        }
    }

    /// Enables retry scheduling for failed automatic runs
    pub fn with_retries(mut self, scheduler: RetryScheduler) -> Self {
        self.retries = Some(scheduler);
        self
    }

    pub fn locks(&self) -> &OrderLocks {
        &self.locks
    }

    /// Status-change hook. Dispatches only when the new status is completed.
    pub async fn on_order_status_changed(
        &self,
        order_id: OrderId,
        old_status: &str,
        new_status: &str,
    ) -> Option<DispatchOutcome> {
        if normalize_status(new_status) != COMPLETED_STATUS {
            debug!(
                "Order {}: status {} → {}, nothing to dispatch",
                order_id, old_status, new_status
            );
            return None;
        }

        info!(
            "Order {}: status {} → {}, dispatching",
            order_id, old_status, new_status
        );
        Some(self.dispatch(order_id, Trigger::Automatic).await)
    }

    /// Runs the order's commands unless another run holds the order's lock or
    /// an automatic trigger finds the order already sent.
    pub async fn dispatch(&self, order_id: OrderId, trigger: Trigger) -> DispatchOutcome {
        let Some(_guard) = self.locks.try_acquire(order_id) else {
            info!("Order {}: dispatch already running, skipping", order_id);
            return DispatchOutcome::skipped(SkipReason::AlreadyRunning);
        };

        match trigger {
            Trigger::Manual => {
                self.orders.clear_sent(order_id);
                self.orders.set_retry_attempts(order_id, 0);
            }
            Trigger::Automatic => {
                if self.orders.dispatch_state(order_id).sent {
                    info!("Order {}: already sent, skipping", order_id);
                    return DispatchOutcome::skipped(SkipReason::AlreadySent);
                }
            }
        }

        self.run(order_id, trigger).await
    }

    /// Clears the order's dispatch flags without sending anything
    pub fn reset(&self, order_id: OrderId) {
        self.orders.reset_dispatch_state(order_id);
        info!("Order {}: dispatch status reset", order_id);
    }

    /// Whether any configured server answers a harmless command
    pub async fn verify_reachability(&self) -> bool {
        let settings = match self.settings.load() {
            Ok(settings) => settings,
            Err(e) => {
                error!("Reachability check could not load settings: {}", e);
                return false;
            }
        };

        for (index, server) in settings.servers.iter().enumerate() {
            if !server.is_complete() {
                continue;
            }
            match session::probe(server, REACHABILITY_COMMAND).await {
                Ok(_) => {
                    info!("{} is reachable", server.display_name(index));
                    return true;
                }
                Err(e) => warn!("{} unreachable: {}", server.display_name(index), e),
            }
        }

        false
    }

    async fn run(&self, order_id: OrderId, trigger: Trigger) -> DispatchOutcome {
        info!("Order {}: starting {} dispatch", order_id, trigger);

        let settings = match self.settings.load() {
            Ok(settings) => settings,
            Err(e) => {
                let message = format!("Configuration unavailable: {}", e);
                error!("Order {}: {}", order_id, message);
                self.record(order_id, HistoryEntry::new(false, &message));
                return DispatchOutcome::fatal(message);
            }
        };

        let Some(order) = self.orders.order(order_id) else {
            let message = format!("Order {} not found", order_id);
            error!("{}", message);
            return DispatchOutcome::fatal(message);
        };

        if settings.servers.is_empty() {
            let message = "RCON configuration incomplete".to_string();
            error!("Order {}: {}", order_id, message);
            self.record(order_id, HistoryEntry::new(false, &message));
            return DispatchOutcome::fatal(message);
        }

        let commands = self.gather_commands(&order);
        if commands.is_empty() {
            info!("Order {}: no commands to send", order_id);
            self.record(order_id, HistoryEntry::new(true, "No commands to send"));
            self.orders.mark_sent(order_id, trigger.into(), Utc::now());
            return DispatchOutcome::default();
        }

        let distribution = distribute(&commands, &settings.servers);
        if distribution.is_empty() {
            let message = "No valid server configuration".to_string();
            error!("Order {}: {}", order_id, message);
            self.record(order_id, HistoryEntry::new(false, &message));
            return DispatchOutcome::fatal(message);
        }

        let mut outcome = DispatchOutcome {
            expected: distribution.expected(),
            warnings: distribution.warnings,
            ..Default::default()
        };

        for (index, bucket) in &distribution.buckets {
            let server = &settings.servers[*index];
            debug!(
                "Order {}: {} commands for {}",
                order_id,
                bucket.len(),
                server.display_name(*index)
            );
            self.run_bucket(order_id, *index, server, bucket, &mut outcome)
                .await;
        }

        info!(
            "Order {}: {}/{} commands sent",
            order_id, outcome.sent, outcome.expected
        );

        if outcome.is_success() {
            self.orders.mark_sent(order_id, trigger.into(), Utc::now());
        } else if trigger == Trigger::Automatic && settings.auto_retry {
            outcome.retry_scheduled = self.schedule_retry(order_id, &settings);
        }

        outcome
    }

    /// Every dispatchable command of every purchased item, in item order
    fn gather_commands(&self, order: &Order) -> Vec<CommandSpec> {
        let mut commands = Vec::new();

        for item in &order.items {
            let Some(product) = self.catalog.product(item.product_id) else {
                continue;
            };

            for raw in &product.commands {
                let template = raw.trim();
                if !is_dispatchable(template) {
                    continue;
                }

                let command = resolve(template, order, item.product_id);
                if !is_dispatchable(&command) {
                    warn!(
                        "Order {}: product {} template '{}' resolved to an unusable command",
                        order.id, item.product_id, template
                    );
                    continue;
                }

                commands.push(CommandSpec {
                    source_item_id: item.product_id,
                    template: template.to_string(),
                    command,
                    selector: product.server,
                });
            }
        }

        commands
    }

    async fn run_bucket(
        &self,
        order_id: OrderId,
        index: usize,
        server: &ServerTarget,
        bucket: &[CommandSpec],
        outcome: &mut DispatchOutcome,
    ) {
        let name = server.display_name(index);

        if !server.is_complete() {
            let message = format!("Server {} (#{}) misconfigured", name, index);
            error!("Order {}: {}", order_id, message);
            self.record(order_id, HistoryEntry::new(false, &message));
            outcome.errors.push(message);
            return;
        }

        let commands: Vec<String> = bucket.iter().map(|spec| spec.command.clone()).collect();
        let report: SessionResult<BatchReport> = session::run_batch(server, &commands).await;

        let report = match report {
            Ok(report) => report,
            Err(e) => {
                let message = match e.kind() {
                    ErrorKind::Authentication => {
                        format!("Authentication failed to {}: {}", name, e)
                    }
                    _ => format!("Connection failed to {}: {}", name, e),
                };
                error!("Order {}: {}", order_id, message);
                self.record(order_id, HistoryEntry::new(false, &message));
                outcome.errors.push(message);
                return;
            }
        };

        for (spec, result) in bucket.iter().zip(report.results) {
            let shown = redact(&spec.command, &server.secret);
            match result {
                Ok(response) => {
                    outcome.sent += 1;
                    info!("Order {}: {} ran '{}'", order_id, name, shown);
                    let message = format!(
                        "{}: {} → {}",
                        name,
                        redact(&spec.template, &server.secret),
                        shown
                    );
                    self.record(
                        order_id,
                        HistoryEntry::new(true, &message).with_exchange(
                            &spec.command,
                            &response,
                            &server.secret,
                        ),
                    );
                }
                Err(e) => {
                    let message = format!("{}: Failed '{}' - {}", name, shown, e);
                    warn!("Order {}: {}", order_id, message);
                    self.record(
                        order_id,
                        HistoryEntry::new(false, &message).with_exchange(
                            &spec.command,
                            "",
                            &server.secret,
                        ),
                    );
                    outcome.errors.push(message);
                }
            }
        }
    }

    fn schedule_retry(&self, order_id: OrderId, settings: &Settings) -> bool {
        let Some(scheduler) = &self.retries else {
            info!("Order {}: no running engine, retry not scheduled", order_id);
            return false;
        };

        if scheduler.is_pending(order_id) {
            debug!("Order {}: retry already pending", order_id);
            return false;
        }

        let attempts = self.orders.dispatch_state(order_id).retry_attempts;
        if let Some(max) = settings.max_retries {
            if attempts >= max {
                warn!(
                    "Order {}: giving up after {} scheduled retries",
                    order_id, attempts
                );
                return false;
            }
        }

        if !scheduler.schedule(order_id, settings.retry_delay()) {
            return false;
        }

        self.orders.set_retry_attempts(order_id, attempts + 1);
        info!(
            "Order {}: retry {} scheduled in {}s",
            order_id,
            attempts + 1,
            settings.retry_delay_secs
        );
        true
    }

    fn record(&self, order_id: OrderId, entry: HistoryEntry) {
        self.orders.append_history(order_id, entry);
    }
}

/// Connect, authenticate and run one command against an unsaved server entry.
/// Returns the start of the server's answer.
pub async fn test_connection(
    host: &str,
    port: u16,
    secret: &str,
    timeout_secs: u64,
    command: Option<&str>,
) -> SessionResult<String> {
    let target = probe_target(host, port, secret, timeout_secs);
    session::probe(&target, command.unwrap_or(DEFAULT_PROBE_COMMAND)).await
}

/// Operator-typed entry, bounded like a saved server
fn probe_target(host: &str, port: u16, secret: &str, timeout_secs: u64) -> ServerTarget {
    ServerTarget::new(
        "probe",
        host.trim(),
        port.max(1),
        secret,
        timeout_secs.clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS),
    )
}
