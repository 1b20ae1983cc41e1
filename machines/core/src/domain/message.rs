// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Standard message format for component communication.
//!
//! A [`Message`] is immutable once published: routing transformations go
//! through [`Message::routed_to`], which produces a new value carrying the
//! same id lineage with an updated receiver and metadata.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::component::ComponentId;

/// Open key/value bag carried by a message. The bus never interprets it;
/// capability implementers validate at their own boundary.
pub type Payload = serde_json::Map<String, Value>;

/// Cross-cutting annotations, e.g. which routing rule touched the message.
pub type Metadata = serde_json::Map<String, Value>;

/// Unique identifier for a message, generated at construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Event carried between components over the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: ComponentId,
    /// `None` means broadcast to all matching subscribers.
    pub receiver_id: Option<ComponentId>,
    /// Tag used for subscription matching.
    pub event_type: String,
    pub payload: Payload,
    pub timestamp: DateTime<Utc>,
    pub metadata: Metadata,
}

impl Message {
    fn new(
        sender_id: ComponentId,
        receiver_id: Option<ComponentId>,
        event_type: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self {
            id: MessageId::new(),
            sender_id,
            receiver_id,
            event_type: event_type.into(),
            payload,
            timestamp: Utc::now(),
            metadata: Metadata::new(),
        }
    }

    /// Message delivered only to the subscriber whose id matches `receiver_id`.
    pub fn addressed(
        sender_id: ComponentId,
        receiver_id: ComponentId,
        event_type: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self::new(sender_id, Some(receiver_id), event_type, payload)
    }

    /// Message delivered to every matching subscriber.
    pub fn broadcast(sender_id: ComponentId, event_type: impl Into<String>, payload: Payload) -> Self {
        Self::new(sender_id, None, event_type, payload)
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Routing transformation: a new message with the same id lineage, the
    /// receiver set to `receiver_id`, and the touching rule recorded under
    /// the `routed_by` metadata key.
    pub fn routed_to(&self, receiver_id: ComponentId, rule_name: &str) -> Self {
        let mut routed = self.clone();
        routed.receiver_id = Some(receiver_id);
        routed
            .metadata
            .insert("routed_by".to_string(), Value::String(rule_name.to_string()));
        routed
    }
}

/// Errors raised by the event bus.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The delivery loop has exited; the queue no longer accepts messages.
    #[error("Event bus is stopped")]
    Stopped,

    /// A subscriber's handler failed during delivery. Logged by the delivery
    /// loop and never surfaced to the publisher.
    #[error("Delivery of message {message} to handler {handler} failed")]
    Delivery {
        handler: ComponentId,
        message: MessageId,
        #[source]
        source: anyhow::Error,
    },
}

/// Receives messages delivered by the event bus.
///
/// `handler_id` is the identity used both for set-semantics subscription
/// (subscribing the same handler twice has no additional effect) and for
/// addressed-delivery filtering.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn handler_id(&self) -> &ComponentId;

    async fn handle_event(&self, message: &Message) -> anyhow::Result<()>;
}

/// Publish side of the event bus, injected into components so the domain
/// layer never reaches for a concrete bus instance.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, message: Message) -> Result<(), BusError>;
}
