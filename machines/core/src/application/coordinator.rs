// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Caller-owned wiring of the coordination core.
//!
//! The bus and registry are created exactly once per process, here, on the
//! startup path, and injected everywhere else as `Arc` clones. There is no
//! hidden global instance and no automatic teardown on process exit:
//! owners call [`Coordinator::shutdown`] for orderly teardown (unregister
//! every component, then stop the bus) so no orphaned subscriptions
//! survive.

use std::sync::Arc;
use tracing::{info, warn};

use crate::application::discovery::Discovery;
use crate::application::dispatcher::CapabilityDispatcher;
use crate::domain::message::EventPublisher;
use crate::infrastructure::event_bus::{BusConfig, EventBus};
use crate::infrastructure::registry::ComponentRegistry;

pub struct Coordinator {
    bus: Arc<EventBus>,
    registry: Arc<ComponentRegistry>,
    dispatcher: Arc<CapabilityDispatcher>,
    discovery: Arc<Discovery>,
}

impl Coordinator {
    pub fn new(config: BusConfig) -> Self {
        let bus = Arc::new(EventBus::new(config));
        let registry = Arc::new(ComponentRegistry::new(bus.clone()));
        let dispatcher = Arc::new(CapabilityDispatcher::new(registry.clone()));
        let discovery = Arc::new(Discovery::new(
            registry.clone(),
            dispatcher.clone(),
            bus.clone(),
        ));
        Self {
            bus,
            registry,
            dispatcher,
            discovery,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(BusConfig::default())
    }

    /// Start message delivery. Idempotent.
    pub async fn start(&self) {
        self.bus.start().await;
        info!("Coordination core started");
    }

    /// Orderly teardown: unregister every component (newest first, so
    /// dependents go before the components they lean on), then stop the
    /// bus. Idempotent.
    pub async fn shutdown(&self) {
        let mut ids = self.registry.ids();
        ids.reverse();
        for id in ids {
            if let Err(err) = self.registry.unregister(&id).await {
                warn!("Error unregistering component {} during shutdown: {}", id, err);
            }
        }
        self.bus.stop().await;
        info!("Coordination core stopped");
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    /// The bus as the publish-side trait object components are built with.
    pub fn publisher(&self) -> Arc<dyn EventPublisher> {
        self.bus.clone()
    }

    pub fn registry(&self) -> Arc<ComponentRegistry> {
        self.registry.clone()
    }

    pub fn dispatcher(&self) -> Arc<CapabilityDispatcher> {
        self.dispatcher.clone()
    }

    pub fn discovery(&self) -> Arc<Discovery> {
        self.discovery.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::capability::Capability;
    use crate::domain::component::{Component, ComponentCore, ComponentId, LifecycleState};
    use crate::domain::message::Payload;
    use async_trait::async_trait;
    use serde_json::Value;

    struct Worker {
        core: ComponentCore,
    }

    impl Worker {
        fn new(id: &str, coordinator: &Coordinator) -> Arc<Self> {
            Arc::new(Self {
                core: ComponentCore::new(
                    Some(ComponentId::new(id)),
                    "agent",
                    id,
                    vec![Capability::new("echo", "Echo the parameters back")],
                    coordinator.publisher(),
                ),
            })
        }
    }

    #[async_trait]
    impl Component for Worker {
        fn core(&self) -> &ComponentCore {
            &self.core
        }

        async fn execute_capability(&self, _name: &str, parameters: &Payload) -> anyhow::Result<Value> {
            Ok(Value::Object(parameters.clone()))
        }
    }

    #[tokio::test]
    async fn test_shutdown_unregisters_components_and_stops_bus() {
        let coordinator = Coordinator::with_defaults();
        coordinator.start().await;

        let worker = Worker::new("w", &coordinator);
        worker.initialize().await.unwrap();
        coordinator.registry().register(worker.clone()).unwrap();

        coordinator.shutdown().await;

        assert_eq!(coordinator.registry().count(), 0);
        assert_eq!(worker.state(), LifecycleState::Stopped);
        assert_eq!(coordinator.bus().subscriber_count(), 0);

        // The bus no longer accepts messages.
        let result = coordinator
            .bus()
            .publish(crate::domain::message::Message::broadcast(
                ComponentId::new("late"),
                "tick",
                Payload::new(),
            ))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let coordinator = Coordinator::with_defaults();
        coordinator.start().await;
        coordinator.shutdown().await;
        coordinator.shutdown().await;
        assert_eq!(coordinator.registry().count(), 0);
    }
}
