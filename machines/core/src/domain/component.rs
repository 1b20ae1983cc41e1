// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Base abstraction for addressable components.
//!
//! Every unit on the bus (agent, time machine, orchestrator) implements
//! [`Component`] over an embedded [`ComponentCore`]. The core owns identity,
//! lifecycle state, the declared capability table, and the attached
//! integrations; the trait's provided methods drive the lifecycle state
//! machine and the messaging sugar so implementers only write the hooks.
//!
//! Lifecycle: `Created → Initializing → Running → ShuttingDown → Stopped`,
//! plus terminal `Error` when initialization fails. No automatic recovery
//! from `Error`. `initialize` and `shutdown` are idempotent; concurrent
//! lifecycle calls are serialized by an async gate so the state machine
//! never races.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::capability::Capability;
use crate::domain::message::{BusError, EventPublisher, Message, Payload};

/// Unique identifier for a component. Caller-supplied ids are allowed
/// (`"github_agent"`); a v4 uuid is generated otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentId(String);

impl ComponentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ComponentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ComponentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Created,
    Initializing,
    Running,
    ShuttingDown,
    Stopped,
    Error,
}

/// Opaque handle to an external collaborator (GitHub client, blockchain
/// RPC, ML backend) attached to a component by name. The core checks
/// presence by name only and never inspects the handle.
pub trait Integration: Send + Sync + 'static {}

#[derive(Debug, thiserror::Error)]
pub enum ComponentError {
    #[error("Component {0} is not running")]
    NotRunning(ComponentId),

    #[error("Component {0} is in the error state")]
    Faulted(ComponentId),

    #[error("Component {id} cannot initialize from state {state:?}")]
    InvalidTransition { id: ComponentId, state: LifecycleState },

    #[error("Component {id} failed to initialize")]
    InitializationFailed {
        id: ComponentId,
        #[source]
        source: anyhow::Error,
    },

    #[error("Component {id} hook failed")]
    Hook {
        id: ComponentId,
        #[source]
        source: anyhow::Error,
    },

    #[error("Component {id} failed to publish")]
    Publish {
        id: ComponentId,
        #[source]
        source: BusError,
    },
}

/// Shared runtime state embedded by every component implementation.
pub struct ComponentCore {
    id: ComponentId,
    kind: String,
    name: String,
    state: RwLock<LifecycleState>,
    // Serializes initialize/shutdown so state transitions never interleave.
    lifecycle_gate: tokio::sync::Mutex<()>,
    capabilities: HashMap<String, Capability>,
    integrations: RwLock<HashMap<String, Arc<dyn Integration>>>,
    publisher: Arc<dyn EventPublisher>,
}

impl ComponentCore {
    pub fn new(
        id: Option<ComponentId>,
        kind: impl Into<String>,
        name: impl Into<String>,
        capabilities: Vec<Capability>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            id: id.unwrap_or_else(ComponentId::generate),
            kind: kind.into(),
            name: name.into(),
            state: RwLock::new(LifecycleState::Created),
            lifecycle_gate: tokio::sync::Mutex::new(()),
            capabilities: capabilities
                .into_iter()
                .map(|c| (c.name.clone(), c))
                .collect(),
            integrations: RwLock::new(HashMap::new()),
            publisher,
        }
    }

    pub fn id(&self) -> &ComponentId {
        &self.id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    pub fn capabilities(&self) -> &HashMap<String, Capability> {
        &self.capabilities
    }

    pub fn publisher(&self) -> &Arc<dyn EventPublisher> {
        &self.publisher
    }

    /// Attach an integration by name. Attaching under an existing name
    /// replaces the previous handle.
    pub fn attach_integration(&self, name: impl Into<String>, handle: Arc<dyn Integration>) {
        let name = name.into();
        self.integrations.write().insert(name.clone(), handle);
        info!("Component {} attached integration: {}", self.id, name);
    }

    pub fn detach_integration(&self, name: &str) -> bool {
        let removed = self.integrations.write().remove(name).is_some();
        if removed {
            info!("Component {} detached integration: {}", self.id, name);
        }
        removed
    }

    pub fn has_integration(&self, name: &str) -> bool {
        self.integrations.read().contains_key(name)
    }

    pub fn attached_integrations(&self) -> Vec<String> {
        self.integrations.read().keys().cloned().collect()
    }

    fn set_state(&self, state: LifecycleState) {
        *self.state.write() = state;
    }
}

/// Addressable, lifecycle-managed unit on the bus.
///
/// Implementers provide [`Component::core`] plus the hooks; the provided
/// methods drive the lifecycle state machine, inbox handling, and the
/// messaging sugar.
#[async_trait]
pub trait Component: Send + Sync {
    /// Shared runtime state backing the provided methods.
    fn core(&self) -> &ComponentCore;

    /// Subclass-specific setup, run once inside [`Component::initialize`].
    async fn on_initialize(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Subclass-specific teardown, run once inside [`Component::shutdown`].
    async fn on_shutdown(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Inbox handler. Return a reply message to hand back to the caller.
    async fn on_message(&self, message: &Message) -> anyhow::Result<Option<Message>> {
        let _ = message;
        Ok(None)
    }

    /// Capability dispatch point. Invoked by the dispatcher only after it
    /// has verified the capability is declared and every required
    /// integration is attached.
    async fn execute_capability(&self, name: &str, parameters: &Payload) -> anyhow::Result<Value>;

    fn id(&self) -> &ComponentId {
        self.core().id()
    }

    fn kind(&self) -> &str {
        self.core().kind()
    }

    fn name(&self) -> &str {
        self.core().name()
    }

    fn state(&self) -> LifecycleState {
        self.core().state()
    }

    fn capabilities(&self) -> &HashMap<String, Capability> {
        self.core().capabilities()
    }

    fn has_integration(&self, name: &str) -> bool {
        self.core().has_integration(name)
    }

    /// Idempotent: a `Running` component is left untouched. A failure in
    /// [`Component::on_initialize`] leaves the component in `Error`, from
    /// which there is no recovery.
    async fn initialize(&self) -> Result<(), ComponentError> {
        let core = self.core();
        let _gate = core.lifecycle_gate.lock().await;
        match core.state() {
            LifecycleState::Running => return Ok(()),
            LifecycleState::Error => return Err(ComponentError::Faulted(core.id().clone())),
            LifecycleState::ShuttingDown | LifecycleState::Stopped => {
                return Err(ComponentError::InvalidTransition {
                    id: core.id().clone(),
                    state: core.state(),
                })
            }
            LifecycleState::Created | LifecycleState::Initializing => {}
        }

        info!("Initializing component {}", core.id());
        core.set_state(LifecycleState::Initializing);
        match self.on_initialize().await {
            Ok(()) => {
                core.set_state(LifecycleState::Running);
                Ok(())
            }
            Err(source) => {
                core.set_state(LifecycleState::Error);
                Err(ComponentError::InitializationFailed {
                    id: core.id().clone(),
                    source,
                })
            }
        }
    }

    /// Idempotent: a `Stopped` component is left untouched. Safe to call
    /// even if `initialize` never completed; the component always ends up
    /// `Stopped`, with any hook error reported after the transition.
    async fn shutdown(&self) -> Result<(), ComponentError> {
        let core = self.core();
        let _gate = core.lifecycle_gate.lock().await;
        if core.state() == LifecycleState::Stopped {
            return Ok(());
        }

        info!("Shutting down component {}", core.id());
        core.set_state(LifecycleState::ShuttingDown);
        let result = self.on_shutdown().await;
        core.set_state(LifecycleState::Stopped);
        result.map_err(|source| ComponentError::Hook {
            id: core.id().clone(),
            source,
        })
    }

    /// Handle an incoming message. Fails fast unless the component is
    /// `Running`.
    async fn handle_message(&self, message: &Message) -> Result<Option<Message>, ComponentError> {
        let core = self.core();
        if core.state() != LifecycleState::Running {
            return Err(ComponentError::NotRunning(core.id().clone()));
        }
        debug!(
            "Component {} handling message {} of type {}",
            core.id(),
            message.id,
            message.event_type
        );
        self.on_message(message).await.map_err(|source| ComponentError::Hook {
            id: core.id().clone(),
            source,
        })
    }

    /// Publish an addressed message; returns the constructed message for
    /// traceability.
    async fn send_message(
        &self,
        receiver_id: ComponentId,
        event_type: &str,
        payload: Payload,
    ) -> Result<Message, ComponentError> {
        let core = self.core();
        if core.state() != LifecycleState::Running {
            return Err(ComponentError::NotRunning(core.id().clone()));
        }
        let message = Message::addressed(core.id().clone(), receiver_id, event_type, payload);
        core.publisher()
            .publish(message.clone())
            .await
            .map_err(|source| ComponentError::Publish {
                id: core.id().clone(),
                source,
            })?;
        Ok(message)
    }

    /// Publish an unaddressed event to all listening components; returns the
    /// constructed message for traceability.
    async fn broadcast_event(
        &self,
        event_type: &str,
        payload: Payload,
    ) -> Result<Message, ComponentError> {
        let core = self.core();
        if core.state() != LifecycleState::Running {
            return Err(ComponentError::NotRunning(core.id().clone()));
        }
        let message = Message::broadcast(core.id().clone(), event_type, payload);
        core.publisher()
            .publish(message.clone())
            .await
            .map_err(|source| ComponentError::Publish {
                id: core.id().clone(),
                source,
            })?;
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct NullPublisher {
        published: Mutex<Vec<Message>>,
    }

    impl NullPublisher {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                published: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl EventPublisher for NullPublisher {
        async fn publish(&self, message: Message) -> Result<(), BusError> {
            self.published.lock().push(message);
            Ok(())
        }
    }

    struct ProbeComponent {
        core: ComponentCore,
        init_calls: Mutex<u32>,
        shutdown_calls: Mutex<u32>,
        fail_init: bool,
    }

    impl ProbeComponent {
        fn new(publisher: Arc<dyn EventPublisher>, fail_init: bool) -> Self {
            Self {
                core: ComponentCore::new(
                    Some(ComponentId::new("probe")),
                    "agent",
                    "Probe",
                    vec![],
                    publisher,
                ),
                init_calls: Mutex::new(0),
                shutdown_calls: Mutex::new(0),
                fail_init,
            }
        }
    }

    #[async_trait]
    impl Component for ProbeComponent {
        fn core(&self) -> &ComponentCore {
            &self.core
        }

        async fn on_initialize(&self) -> anyhow::Result<()> {
            *self.init_calls.lock() += 1;
            if self.fail_init {
                anyhow::bail!("setup exploded");
            }
            Ok(())
        }

        async fn on_shutdown(&self) -> anyhow::Result<()> {
            *self.shutdown_calls.lock() += 1;
            Ok(())
        }

        async fn execute_capability(&self, _name: &str, _parameters: &Payload) -> anyhow::Result<Value> {
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let component = ProbeComponent::new(NullPublisher::new(), false);

        component.initialize().await.unwrap();
        component.initialize().await.unwrap();

        assert_eq!(component.state(), LifecycleState::Running);
        assert_eq!(*component.init_calls.lock(), 1);
    }

    #[tokio::test]
    async fn test_failed_initialize_leaves_error_state() {
        let component = ProbeComponent::new(NullPublisher::new(), true);

        let result = component.initialize().await;
        assert!(matches!(result, Err(ComponentError::InitializationFailed { .. })));
        assert_eq!(component.state(), LifecycleState::Error);

        // No recovery from Error.
        let retry = component.initialize().await;
        assert!(matches!(retry, Err(ComponentError::Faulted(_))));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_safe_before_initialize() {
        let component = ProbeComponent::new(NullPublisher::new(), false);

        component.shutdown().await.unwrap();
        assert_eq!(component.state(), LifecycleState::Stopped);

        component.shutdown().await.unwrap();
        assert_eq!(*component.shutdown_calls.lock(), 1);
    }

    #[tokio::test]
    async fn test_send_message_fails_fast_when_not_running() {
        let publisher = NullPublisher::new();
        let component = ProbeComponent::new(publisher.clone(), false);

        let result = component
            .send_message(ComponentId::new("peer"), "ping", Payload::new())
            .await;
        assert!(matches!(result, Err(ComponentError::NotRunning(_))));
        assert!(publisher.published.lock().is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_event_returns_constructed_message() {
        let publisher = NullPublisher::new();
        let component = ProbeComponent::new(publisher.clone(), false);
        component.initialize().await.unwrap();

        let message = component.broadcast_event("tick", Payload::new()).await.unwrap();
        assert!(message.receiver_id.is_none());
        assert_eq!(message.sender_id.as_str(), "probe");
        assert_eq!(publisher.published.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_integration_attach_detach() {
        struct FakeClient;
        impl Integration for FakeClient {}

        let component = ProbeComponent::new(NullPublisher::new(), false);
        component.core().attach_integration("github", Arc::new(FakeClient));

        assert!(component.has_integration("github"));
        assert!(component.core().detach_integration("github"));
        assert!(!component.has_integration("github"));
        assert!(!component.core().detach_integration("github"));
    }
}
