// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus - Pub/Sub for Component Communication
//
// Accepts published messages into a bounded queue and delivers them to
// matching subscribers (global + per-event-type, optionally filtered by
// addressee) from a single owned delivery loop. In-memory only: messages
// are lost on process exit, and a stopped bus is not restartable.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::component::ComponentId;
use crate::domain::message::{BusError, EventHandler, EventPublisher, Message};

/// How the bus queues messages and polices delivery.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Bounded publish-queue capacity. Publishers await when the queue is
    /// full; messages are never silently dropped.
    pub queue_capacity: usize,
    /// Consecutive delivery failures tolerated per handler before the bus
    /// drops it from every subscription. `None` keeps failing handlers
    /// subscribed; failures are still counted and logged.
    pub max_handler_failures: Option<u32>,
}

impl BusConfig {
    /// Default queue capacity (1000 messages).
    pub fn with_default_capacity() -> Self {
        Self::default()
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            max_handler_failures: None,
        }
    }
}

#[derive(Default)]
struct SubscriberSets {
    global: HashMap<ComponentId, Arc<dyn EventHandler>>,
    by_type: HashMap<String, HashMap<ComponentId, Arc<dyn EventHandler>>>,
}

impl SubscriberSets {
    fn remove_everywhere(&mut self, handler_id: &ComponentId) {
        self.global.remove(handler_id);
        self.by_type.retain(|_, handlers| {
            handlers.remove(handler_id);
            !handlers.is_empty()
        });
    }
}

struct BusShared {
    subscribers: RwLock<SubscriberSets>,
    config: BusConfig,
}

/// Process-wide publish/subscribe broker. Construct exactly one per process
/// through the coordinator's startup path and share it via `Arc`.
pub struct EventBus {
    shared: Arc<BusShared>,
    tx: mpsc::Sender<Message>,
    rx: Mutex<Option<mpsc::Receiver<Message>>>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl EventBus {
    pub fn new(config: BusConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        Self {
            shared: Arc::new(BusShared {
                subscribers: RwLock::new(SubscriberSets::default()),
                config,
            }),
            tx,
            rx: Mutex::new(Some(rx)),
            worker: tokio::sync::Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Bus with the default configuration (capacity 1000, no eviction).
    pub fn with_default_capacity() -> Self {
        Self::new(BusConfig::default())
    }

    /// Launch the delivery loop. Idempotent: a second call, or a call after
    /// `stop`, is a no-op.
    pub async fn start(&self) {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            return;
        }
        let Some(rx) = self.rx.lock().take() else {
            return;
        };
        let shared = self.shared.clone();
        let cancel = self.cancel.clone();
        *worker = Some(tokio::spawn(delivery_loop(shared, rx, cancel)));
        info!("Event bus started");
    }

    /// Signal the delivery loop to exit and wait for in-flight delivery to
    /// finish. Idempotent; `stop` before `start` is a no-op.
    pub async fn stop(&self) {
        let handle = self.worker.lock().await.take();
        let Some(handle) = handle else {
            return;
        };
        self.cancel.cancel();
        if let Err(err) = handle.await {
            error!("Event bus delivery loop panicked: {}", err);
        }
        info!("Event bus stopped");
    }

    /// Subscribe a handler to the named event types, or to every message
    /// when `event_types` is `None`. Set semantics: subscribing the same
    /// handler twice to the same type has no additional effect.
    pub fn subscribe(&self, handler: Arc<dyn EventHandler>, event_types: Option<&[&str]>) {
        let handler_id = handler.handler_id().clone();
        let mut subscribers = self.shared.subscribers.write();
        match event_types {
            None => {
                subscribers.global.insert(handler_id.clone(), handler);
                debug!("Handler {} subscribed to all events", handler_id);
            }
            Some(types) => {
                for event_type in types {
                    subscribers
                        .by_type
                        .entry((*event_type).to_string())
                        .or_default()
                        .insert(handler_id.clone(), handler.clone());
                }
                debug!("Handler {} subscribed to events: {:?}", handler_id, types);
            }
        }
    }

    /// Mirror of `subscribe`: omitting `event_types` removes the handler
    /// from the global set and from every per-type set.
    pub fn unsubscribe(&self, handler_id: &ComponentId, event_types: Option<&[&str]>) {
        let mut subscribers = self.shared.subscribers.write();
        match event_types {
            None => {
                subscribers.remove_everywhere(handler_id);
                debug!("Handler {} unsubscribed from all events", handler_id);
            }
            Some(types) => {
                for event_type in types {
                    let now_empty = subscribers
                        .by_type
                        .get_mut(*event_type)
                        .map(|handlers| {
                            handlers.remove(handler_id);
                            handlers.is_empty()
                        })
                        .unwrap_or(false);
                    if now_empty {
                        subscribers.by_type.remove(*event_type);
                    }
                }
                debug!("Handler {} unsubscribed from events: {:?}", handler_id, types);
            }
        }
    }

    /// Enqueue a message for delivery. Applies backpressure when the queue
    /// is full; fails once the delivery loop has exited.
    pub async fn publish(&self, message: Message) -> Result<(), BusError> {
        debug!(
            "Message {} of type {} published to event bus",
            message.id, message.event_type
        );
        self.tx.send(message).await.map_err(|_| BusError::Stopped)
    }

    /// Number of distinct subscribed handlers across all sets.
    pub fn subscriber_count(&self) -> usize {
        let subscribers = self.shared.subscribers.read();
        let mut ids: std::collections::HashSet<&ComponentId> =
            subscribers.global.keys().collect();
        for handlers in subscribers.by_type.values() {
            ids.extend(handlers.keys());
        }
        ids.len()
    }
}

#[async_trait::async_trait]
impl EventPublisher for EventBus {
    async fn publish(&self, message: Message) -> Result<(), BusError> {
        EventBus::publish(self, message).await
    }
}

async fn delivery_loop(
    shared: Arc<BusShared>,
    mut rx: mpsc::Receiver<Message>,
    cancel: CancellationToken,
) {
    let mut failure_counts: HashMap<ComponentId, u32> = HashMap::new();
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(message) => message,
                None => break,
            },
        };
        deliver_message(&shared, &message, &mut failure_counts).await;
    }
    debug!("Event bus delivery loop exited");
}

/// Deliver one message to its full candidate set before returning, so
/// delivery of a message is atomic with respect to the queue.
async fn deliver_message(
    shared: &BusShared,
    message: &Message,
    failure_counts: &mut HashMap<ComponentId, u32>,
) {
    let candidates: Vec<Arc<dyn EventHandler>> = {
        let subscribers = shared.subscribers.read();
        let mut matched: HashMap<&ComponentId, &Arc<dyn EventHandler>> =
            subscribers.global.iter().collect();
        if let Some(handlers) = subscribers.by_type.get(&message.event_type) {
            matched.extend(handlers.iter());
        }
        matched
            .into_values()
            .filter(|handler| match &message.receiver_id {
                Some(receiver) => handler.handler_id() == receiver,
                None => true,
            })
            .cloned()
            .collect()
    };

    let mut delivered = 0usize;
    for handler in &candidates {
        match handler.handle_event(message).await {
            Ok(()) => {
                delivered += 1;
                failure_counts.remove(handler.handler_id());
            }
            Err(source) => {
                let failures = failure_counts
                    .entry(handler.handler_id().clone())
                    .or_insert(0);
                *failures += 1;
                let err = BusError::Delivery {
                    handler: handler.handler_id().clone(),
                    message: message.id.clone(),
                    source,
                };
                warn!("{} (consecutive failures: {})", err, failures);

                if let Some(limit) = shared.config.max_handler_failures {
                    if *failures >= limit {
                        error!(
                            "Handler {} exceeded {} consecutive delivery failures, unsubscribing",
                            handler.handler_id(),
                            limit
                        );
                        shared
                            .subscribers
                            .write()
                            .remove_everywhere(handler.handler_id());
                        failure_counts.remove(handler.handler_id());
                    }
                }
            }
        }
    }
    debug!("Message {} delivered to {} handlers", message.id, delivered);
}
