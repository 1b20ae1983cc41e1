// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! End-to-end tests for capability dispatch and discovery over a live
//! coordinator: gating, deterministic selection, task tracking, and
//! routed fan-out.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use time_machines_core::application::{Coordinator, DispatchError, TaskRequest};
use time_machines_core::domain::{
    Capability, Component, ComponentCore, ComponentId, EventPublisher, Integration, Message,
    ParameterSpec, Payload, TaskStatus,
};
use time_machines_core::infrastructure::MessageRouter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

struct EchoAgent {
    core: ComponentCore,
    executed: Mutex<Vec<String>>,
    received: Mutex<Vec<Message>>,
}

impl EchoAgent {
    fn new(id: &str, requires: &[&str], publisher: Arc<dyn EventPublisher>) -> Arc<Self> {
        let mut capability = Capability::new("echo", "Echo the parameters back")
            .parameter("x", ParameterSpec::optional("number", Some(Value::from(0))));
        for integration in requires {
            capability = capability.requires(*integration);
        }
        Arc::new(Self {
            core: ComponentCore::new(
                Some(ComponentId::new(id)),
                "agent",
                id,
                vec![capability],
                publisher,
            ),
            executed: Mutex::new(Vec::new()),
            received: Mutex::new(Vec::new()),
        })
    }

    async fn wait_for_messages(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while self.received.lock().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for deliveries");
    }
}

#[async_trait]
impl Component for EchoAgent {
    fn core(&self) -> &ComponentCore {
        &self.core
    }

    async fn on_message(&self, message: &Message) -> anyhow::Result<Option<Message>> {
        self.received.lock().push(message.clone());
        Ok(None)
    }

    async fn execute_capability(&self, name: &str, parameters: &Payload) -> anyhow::Result<Value> {
        self.executed.lock().push(name.to_string());
        let mut result = parameters.clone();
        result.insert("handled_by".to_string(), Value::String(self.id().as_str().to_string()));
        Ok(Value::Object(result))
    }
}

struct NetClient;
impl Integration for NetClient {}

async fn spawn_agent(coordinator: &Coordinator, id: &str, requires: &[&str]) -> Arc<EchoAgent> {
    let agent = EchoAgent::new(id, requires, coordinator.publisher());
    agent.initialize().await.unwrap();
    coordinator.registry().register(agent.clone()).unwrap();
    agent
}

#[tokio::test]
async fn test_dispatch_skips_ineligible_component_deterministically() {
    init_tracing();
    let coordinator = Coordinator::with_defaults();
    coordinator.start().await;

    // A declares "echo" with no required integrations; B requires "net"
    // and never gets it. The dispatcher must select A.
    let a = spawn_agent(&coordinator, "a", &[]).await;
    let b = spawn_agent(&coordinator, "b", &["net"]).await;

    let mut parameters = Payload::new();
    parameters.insert("x".to_string(), Value::from(1));
    let completion = coordinator
        .dispatcher()
        .execute_capability("echo", parameters, None)
        .await
        .unwrap();

    assert_eq!(completion.task.status, TaskStatus::Completed);
    assert_eq!(completion.output["handled_by"], Value::String("a".into()));
    assert_eq!(a.executed.lock().len(), 1);
    assert!(b.executed.lock().is_empty());

    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_attaching_integration_makes_component_eligible() {
    init_tracing();
    let coordinator = Coordinator::with_defaults();
    coordinator.start().await;

    let gated = spawn_agent(&coordinator, "gated", &["net"]).await;

    let result = coordinator
        .dispatcher()
        .execute_capability("echo", Payload::new(), None)
        .await;
    assert!(matches!(result, Err(DispatchError::NoCapableComponent(_))));

    gated.core().attach_integration("net", Arc::new(NetClient));

    let completion = coordinator
        .dispatcher()
        .execute_capability("echo", Payload::new(), None)
        .await
        .unwrap();
    assert_eq!(completion.output["handled_by"], Value::String("gated".into()));

    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_preferred_component_used_when_eligible() {
    init_tracing();
    let coordinator = Coordinator::with_defaults();
    coordinator.start().await;

    spawn_agent(&coordinator, "first", &[]).await;
    let second = spawn_agent(&coordinator, "second", &[]).await;

    let completion = coordinator
        .dispatcher()
        .execute_capability("echo", Payload::new(), Some(second.id()))
        .await
        .unwrap();

    assert_eq!(completion.output["handled_by"], Value::String("second".into()));

    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_declared_defaults_reach_the_capability_body() {
    init_tracing();
    let coordinator = Coordinator::with_defaults();
    coordinator.start().await;
    spawn_agent(&coordinator, "a", &[]).await;

    let completion = coordinator
        .dispatcher()
        .execute_capability("echo", Payload::new(), None)
        .await
        .unwrap();

    // "x" was omitted; the declared default filled it in.
    assert_eq!(completion.output["x"], Value::from(0));

    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_task_ledger_keeps_terminal_records() {
    init_tracing();
    let coordinator = Coordinator::with_defaults();
    coordinator.start().await;
    spawn_agent(&coordinator, "a", &[]).await;

    let completion = coordinator
        .dispatcher()
        .execute_capability("echo", Payload::new(), None)
        .await
        .unwrap();

    let recorded = coordinator.dispatcher().task(&completion.task.id).unwrap();
    assert_eq!(recorded.status, TaskStatus::Completed);
    assert_eq!(recorded.capability, "echo");

    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_discovery_send_to_best_available() {
    init_tracing();
    let coordinator = Coordinator::with_defaults();
    coordinator.start().await;

    spawn_agent(&coordinator, "blocked", &["net"]).await;
    spawn_agent(&coordinator, "open", &[]).await;

    let completion = coordinator
        .discovery()
        .send_to_best_available(TaskRequest {
            capability: "echo".to_string(),
            parameters: Payload::new(),
        })
        .await
        .unwrap();

    assert_eq!(completion.output["handled_by"], Value::String("open".into()));

    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_discovery_broadcast_reaches_components() {
    init_tracing();
    let coordinator = Coordinator::with_defaults();
    coordinator.start().await;

    let a = spawn_agent(&coordinator, "a", &[]).await;
    let b = spawn_agent(&coordinator, "b", &[]).await;

    let message = coordinator
        .discovery()
        .broadcast_to_all(&ComponentId::new("ops"), "epoch", Payload::new())
        .await
        .unwrap();
    assert!(message.receiver_id.is_none());

    a.wait_for_messages(1).await;
    b.wait_for_messages(1).await;

    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_router_retargets_broadcast_to_one_component() {
    init_tracing();
    let coordinator = Coordinator::with_defaults();
    coordinator.start().await;

    let alpha = spawn_agent(&coordinator, "alpha", &[]).await;
    let beta = spawn_agent(&coordinator, "beta", &[]).await;

    let router = MessageRouter::new(coordinator.bus());
    router.add_routing_rule("work_to_alpha", |message: &Message| {
        (message.event_type == "work").then(|| ComponentId::new("alpha"))
    });

    let routed = router
        .route_message(Message::broadcast(
            ComponentId::new("ops"),
            "work",
            Payload::new(),
        ))
        .await
        .unwrap();
    assert_eq!(routed.metadata["routed_by"], Value::String("work_to_alpha".into()));

    alpha.wait_for_messages(1).await;
    assert!(beta.received.lock().is_empty());

    coordinator.shutdown().await;
}
