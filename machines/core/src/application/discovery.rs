// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Read-side conveniences for locating components and fanning work out.
//!
//! Never mutates registry or bus state beyond the publish/execute calls it
//! delegates to.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::application::dispatcher::{CapabilityDispatcher, DispatchError, TaskCompletion};
use crate::domain::component::{Component, ComponentId};
use crate::domain::message::{BusError, Message, Payload};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::registry::ComponentRegistry;

/// Capability request routed through discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub capability: String,
    #[serde(default)]
    pub parameters: Payload,
}

pub struct Discovery {
    registry: Arc<ComponentRegistry>,
    dispatcher: Arc<CapabilityDispatcher>,
    bus: Arc<EventBus>,
}

impl Discovery {
    pub fn new(
        registry: Arc<ComponentRegistry>,
        dispatcher: Arc<CapabilityDispatcher>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            bus,
        }
    }

    /// Components of one type, optionally narrowed by a case-insensitive
    /// substring match on the component name. Registration order.
    pub fn find_by_type(&self, kind: &str, name_filter: Option<&str>) -> Vec<Arc<dyn Component>> {
        let components = self.registry.list(Some(kind));
        match name_filter {
            None => components,
            Some(filter) => {
                let needle = filter.to_lowercase();
                components
                    .into_iter()
                    .filter(|component| component.name().to_lowercase().contains(&needle))
                    .collect()
            }
        }
    }

    /// Run the requested capability on the first component able to execute
    /// it (deterministic, not load-balanced).
    pub async fn send_to_best_available(
        &self,
        request: TaskRequest,
    ) -> Result<TaskCompletion, DispatchError> {
        debug!("Dispatching '{}' to best available component", request.capability);
        self.dispatcher
            .execute_capability(&request.capability, request.parameters, None)
            .await
    }

    /// Broadcast an event to all listening components on behalf of
    /// `sender_id`; returns the constructed message for traceability.
    pub async fn broadcast_to_all(
        &self,
        sender_id: &ComponentId,
        event_type: &str,
        payload: Payload,
    ) -> Result<Message, BusError> {
        let message = Message::broadcast(sender_id.clone(), event_type, payload);
        self.bus.publish(message.clone()).await?;
        Ok(message)
    }
}
