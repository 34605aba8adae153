//! Event loop feeding the dispatcher
//!
//! Status changes, operator actions and due retries arrive as messages on one
//! channel. Every dispatch runs on its own task, so different orders proceed
//! concurrently while the per-order lock keeps runs of one order apart.

use crate::orchestrator::{DispatchOutcome, Dispatcher, Trigger};
use crate::scheduler::RetryScheduler;
use crate::store::{OrderRepository, ProductCatalog};
use log::{debug, error, info};
use shared::{OrderId, SettingsProvider};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;

#[derive(Debug)]
pub enum DispatchMessage {
    StatusChanged {
        order_id: OrderId,
        old_status: String,
        new_status: String,
    },
    ManualResend {
        order_id: OrderId,
        reply: Option<oneshot::Sender<DispatchOutcome>>,
    },
    Reset {
        order_id: OrderId,
    },
    RetryDue {
        order_id: OrderId,
    },
    Shutdown,
}

pub struct Engine {
    dispatcher: Arc<Dispatcher>,
    tx: mpsc::UnboundedSender<DispatchMessage>,
    rx: mpsc::UnboundedReceiver<DispatchMessage>,
}

impl Engine {
    pub fn new(
        settings: Arc<dyn SettingsProvider>,
        orders: Arc<dyn OrderRepository>,
        catalog: Arc<dyn ProductCatalog>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(settings, orders, catalog)
            .with_retries(RetryScheduler::new(tx.clone()));

        Self {
            dispatcher: Arc::new(dispatcher),
            tx,
            rx,
        }
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            tx: self.tx.clone(),
        }
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Processes messages until `Shutdown`, then waits for in-flight dispatches
    pub async fn run(mut self) {
        info!("Dispatch engine started");
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                message = self.rx.recv() => match message {
                    Some(DispatchMessage::Shutdown) | None => break,
                    Some(message) => self.handle_message(message, &mut tasks),
                },
                Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = result {
                        error!("Dispatch task failed: {}", e);
                    }
                }
            }
        }

        info!("Dispatch engine stopping, {} runs in flight", tasks.len());
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!("Dispatch task failed: {}", e);
            }
        }
    }

    fn handle_message(&self, message: DispatchMessage, tasks: &mut JoinSet<()>) {
        let dispatcher = Arc::clone(&self.dispatcher);

        match message {
            DispatchMessage::StatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                tasks.spawn(async move {
                    dispatcher
                        .on_order_status_changed(order_id, &old_status, &new_status)
                        .await;
                });
            }
            DispatchMessage::ManualResend { order_id, reply } => {
                tasks.spawn(async move {
                    let outcome = dispatcher.dispatch(order_id, Trigger::Manual).await;
                    if let Some(reply) = reply {
                        let _ = reply.send(outcome);
                    }
                });
            }
            DispatchMessage::RetryDue { order_id } => {
                debug!("Running scheduled retry for order {}", order_id);
                tasks.spawn(async move {
                    dispatcher.dispatch(order_id, Trigger::Automatic).await;
                });
            }
            DispatchMessage::Reset { order_id } => dispatcher.reset(order_id),
            DispatchMessage::Shutdown => {}
        }
    }
}

/// Cloneable sender side of the engine
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<DispatchMessage>,
}

impl EngineHandle {
    pub fn status_changed(&self, order_id: OrderId, old_status: &str, new_status: &str) -> bool {
        self.send(DispatchMessage::StatusChanged {
            order_id,
            old_status: old_status.to_string(),
            new_status: new_status.to_string(),
        })
    }

    /// Queues a manual resend and waits for its outcome
    pub async fn resend(&self, order_id: OrderId) -> Option<DispatchOutcome> {
        let (reply, outcome) = oneshot::channel();
        if !self.send(DispatchMessage::ManualResend {
            order_id,
            reply: Some(reply),
        }) {
            return None;
        }
        outcome.await.ok()
    }

    pub fn reset(&self, order_id: OrderId) -> bool {
        self.send(DispatchMessage::Reset { order_id })
    }

    pub fn shutdown(&self) -> bool {
        self.send(DispatchMessage::Shutdown)
    }

    fn send(&self, message: DispatchMessage) -> bool {
        match self.tx.send(message) {
            Ok(()) => true,
            Err(e) => {
                error!("Dispatch engine is gone: {}", e);
                false
            }
        }
    }
}
