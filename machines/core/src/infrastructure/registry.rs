// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Component registry for discovery and lifecycle bookkeeping.
//!
//! Maps component identity to a live handle, indexed by type, with
//! registration metadata and an aggregate health report. Registering a
//! component also subscribes it to the event bus so it receives addressed
//! and broadcast messages; unregistering reverses that, invoking the
//! component's shutdown hook best-effort before removal.
//!
//! The id map, type index, registration-order list, and metadata map are
//! mutated together under one lock: an operation either updates all of
//! them or none of them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::component::{Component, ComponentId, LifecycleState};
use crate::domain::message::{EventHandler, Message};
use crate::infrastructure::event_bus::EventBus;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Component {0} is already registered")]
    DuplicateRegistration(ComponentId),

    #[error("Component {0} is not registered")]
    UnknownComponent(ComponentId),
}

/// Registration bookkeeping kept alongside the live handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentMetadata {
    pub kind: String,
    pub registered_at: DateTime<Utc>,
}

/// Aggregate health report over all registered components. Produced by a
/// read-only scan; never mutates component state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub total_components: usize,
    pub components_by_type: HashMap<String, usize>,
    pub unhealthy_components: Vec<UnhealthyComponent>,
}

/// A component whose lifecycle state is not `Running`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnhealthyComponent {
    pub id: ComponentId,
    pub kind: String,
    pub state: LifecycleState,
}

#[derive(Default)]
struct RegistryInner {
    components: HashMap<ComponentId, Arc<dyn Component>>,
    by_type: HashMap<String, HashSet<ComponentId>>,
    // Registration order; gives the dispatcher its deterministic scan.
    order: Vec<ComponentId>,
    metadata: HashMap<ComponentId, ComponentMetadata>,
}

/// Process-wide component directory. Construct exactly one per process
/// through the coordinator's startup path and share it via `Arc`.
pub struct ComponentRegistry {
    inner: RwLock<RegistryInner>,
    bus: Arc<EventBus>,
}

impl ComponentRegistry {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            bus,
        }
    }

    /// Register a component and subscribe it to the event bus. Fails with
    /// `DuplicateRegistration` if the id is already present, leaving the
    /// registry unchanged.
    pub fn register(&self, component: Arc<dyn Component>) -> Result<(), RegistryError> {
        let id = component.id().clone();
        let kind = component.kind().to_string();
        {
            let mut inner = self.inner.write();
            if inner.components.contains_key(&id) {
                warn!("Component {} already registered", id);
                return Err(RegistryError::DuplicateRegistration(id));
            }
            inner.components.insert(id.clone(), component.clone());
            inner.by_type.entry(kind.clone()).or_default().insert(id.clone());
            inner.order.push(id.clone());
            inner.metadata.insert(
                id.clone(),
                ComponentMetadata {
                    kind: kind.clone(),
                    registered_at: Utc::now(),
                },
            );
        }

        self.bus
            .subscribe(Arc::new(ComponentSubscriber(component)), None);
        info!("Registered component {} of type {}", id, kind);
        Ok(())
    }

    /// Unregister a component: unsubscribe it from the bus, invoke its
    /// shutdown hook if it has not already stopped (errors are logged but
    /// do not prevent removal), then drop it from every index.
    pub async fn unregister(&self, id: &ComponentId) -> Result<(), RegistryError> {
        let component = self
            .inner
            .read()
            .components
            .get(id)
            .cloned()
            .ok_or_else(|| {
                warn!("Component {} not found", id);
                RegistryError::UnknownComponent(id.clone())
            })?;

        self.bus.unsubscribe(id, None);

        if component.state() != LifecycleState::Stopped {
            if let Err(err) = component.shutdown().await {
                warn!("Error shutting down component {} during unregister: {}", id, err);
            }
        }

        {
            let mut inner = self.inner.write();
            inner.components.remove(id);
            let kind = component.kind().to_string();
            let now_empty = inner
                .by_type
                .get_mut(&kind)
                .map(|ids| {
                    ids.remove(id);
                    ids.is_empty()
                })
                .unwrap_or(false);
            if now_empty {
                inner.by_type.remove(&kind);
            }
            inner.order.retain(|registered| registered != id);
            inner.metadata.remove(id);
        }

        info!("Unregistered component {}", id);
        Ok(())
    }

    pub fn get(&self, id: &ComponentId) -> Option<Arc<dyn Component>> {
        self.inner.read().components.get(id).cloned()
    }

    /// All components, or all of one type, in registration order.
    pub fn list(&self, kind: Option<&str>) -> Vec<Arc<dyn Component>> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter(|id| match kind {
                Some(kind) => inner
                    .metadata
                    .get(id)
                    .map(|meta| meta.kind == kind)
                    .unwrap_or(false),
                None => true,
            })
            .filter_map(|id| inner.components.get(id).cloned())
            .collect()
    }

    /// Registered component ids in registration order.
    pub fn ids(&self) -> Vec<ComponentId> {
        self.inner.read().order.clone()
    }

    pub fn metadata(&self, id: &ComponentId) -> Option<ComponentMetadata> {
        self.inner.read().metadata.get(id).cloned()
    }

    pub fn component_types(&self) -> Vec<String> {
        self.inner.read().by_type.keys().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.inner.read().components.len()
    }

    /// Read-only scan of every registered component's lifecycle state.
    pub fn health_check(&self) -> HealthReport {
        let inner = self.inner.read();
        let components_by_type = inner
            .by_type
            .iter()
            .map(|(kind, ids)| (kind.clone(), ids.len()))
            .collect();
        let unhealthy_components = inner
            .order
            .iter()
            .filter_map(|id| inner.components.get(id))
            .filter(|component| component.state() != LifecycleState::Running)
            .map(|component| UnhealthyComponent {
                id: component.id().clone(),
                kind: component.kind().to_string(),
                state: component.state(),
            })
            .collect();

        HealthReport {
            total_components: inner.components.len(),
            components_by_type,
            unhealthy_components,
        }
    }
}

/// Adapts a registered component to the bus subscriber contract. Fails fast
/// when the component is not running, so stale subscriptions surface as
/// delivery errors instead of silent no-ops.
struct ComponentSubscriber(Arc<dyn Component>);

#[async_trait]
impl EventHandler for ComponentSubscriber {
    fn handler_id(&self) -> &ComponentId {
        self.0.id()
    }

    async fn handle_event(&self, message: &Message) -> anyhow::Result<()> {
        if let Some(reply) = self.0.handle_message(message).await? {
            debug!(
                "Component {} replied {} to message {}; replies from bus delivery are discarded",
                self.0.id(),
                reply.id,
                message.id
            );
        }
        Ok(())
    }
}
