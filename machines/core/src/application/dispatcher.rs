// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Capability-gated task dispatch.
//!
//! Finds a component able to run a given capability and executes it as a
//! tracked [`Task`]. A capability is executable on a component iff the
//! component declares it and every required integration is attached.
//! Selection is deterministic: the preferred component when eligible,
//! otherwise the first eligible component in registration order.
//!
//! The task's terminal state is always observable: on success it is
//! returned in the [`TaskCompletion`], on failure it travels inside
//! [`DispatchError::CapabilityFailed`], and either way the terminal record
//! lands in the dispatcher's task ledger.

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::domain::capability::{Task, TaskId};
use crate::domain::component::{Component, ComponentId, LifecycleState};
use crate::domain::message::Payload;
use crate::infrastructure::registry::ComponentRegistry;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Component {component} does not declare capability '{capability}'")]
    CapabilityNotDeclared {
        component: ComponentId,
        capability: String,
    },

    #[error("Capability '{capability}' on component {component} requires integration '{integration}'")]
    MissingIntegration {
        component: ComponentId,
        capability: String,
        integration: String,
    },

    #[error("No component is able to execute capability '{0}'")]
    NoCapableComponent(String),

    #[error("Capability '{}' failed in task {}", .task.capability, .task.id)]
    CapabilityFailed {
        task: Task,
        #[source]
        source: anyhow::Error,
    },
}

/// Successful capability execution: the terminal task record plus the
/// capability body's output.
#[derive(Debug, Clone, Serialize)]
pub struct TaskCompletion {
    pub task: Task,
    pub output: Value,
}

pub struct CapabilityDispatcher {
    registry: Arc<ComponentRegistry>,
    tasks: DashMap<TaskId, Task>,
}

impl CapabilityDispatcher {
    pub fn new(registry: Arc<ComponentRegistry>) -> Self {
        Self {
            registry,
            tasks: DashMap::new(),
        }
    }

    /// True iff `component` declares `capability` and every required
    /// integration is attached.
    pub fn can_execute(&self, component: &Arc<dyn Component>, capability: &str) -> bool {
        self.check_executable(component, capability).is_ok()
    }

    /// Granular form of [`CapabilityDispatcher::can_execute`], naming the
    /// first missing piece.
    pub fn check_executable(
        &self,
        component: &Arc<dyn Component>,
        capability: &str,
    ) -> Result<(), DispatchError> {
        let Some(descriptor) = component.capabilities().get(capability) else {
            return Err(DispatchError::CapabilityNotDeclared {
                component: component.id().clone(),
                capability: capability.to_string(),
            });
        };
        for integration in &descriptor.required_integrations {
            if !component.has_integration(integration) {
                return Err(DispatchError::MissingIntegration {
                    component: component.id().clone(),
                    capability: capability.to_string(),
                    integration: integration.clone(),
                });
            }
        }
        Ok(())
    }

    /// Execute `capability` as a tracked task on the preferred component if
    /// it is eligible, otherwise on the first eligible running component in
    /// registration order.
    pub async fn execute_capability(
        &self,
        capability: &str,
        parameters: Payload,
        preferred: Option<&ComponentId>,
    ) -> Result<TaskCompletion, DispatchError> {
        let component = self.select_component(capability, preferred)?;
        let descriptor = match component.capabilities().get(capability) {
            Some(descriptor) => descriptor.clone(),
            None => {
                return Err(DispatchError::CapabilityNotDeclared {
                    component: component.id().clone(),
                    capability: capability.to_string(),
                })
            }
        };

        // Schema validation is advisory: issues are logged, never fatal.
        let parameters = descriptor.apply_defaults(&parameters);
        for issue in descriptor.validate_parameters(&parameters) {
            warn!(
                "Capability '{}' parameter issue on component {}: {}",
                capability,
                component.id(),
                issue
            );
        }

        let mut task = Task::new(capability, parameters.clone());
        info!(
            "Executing task {} ({}) on component {}",
            task.id,
            capability,
            component.id()
        );
        task.start();
        match component.execute_capability(capability, &parameters).await {
            Ok(output) => {
                task.complete();
                info!("Completed task {}", task.id);
                self.tasks.insert(task.id.clone(), task.clone());
                Ok(TaskCompletion { task, output })
            }
            Err(source) => {
                task.fail();
                error!("Failed task {}: {:#}", task.id, source);
                self.tasks.insert(task.id.clone(), task.clone());
                Err(DispatchError::CapabilityFailed { task, source })
            }
        }
    }

    fn select_component(
        &self,
        capability: &str,
        preferred: Option<&ComponentId>,
    ) -> Result<Arc<dyn Component>, DispatchError> {
        if let Some(id) = preferred {
            if let Some(component) = self.registry.get(id) {
                if component.state() == LifecycleState::Running
                    && self.can_execute(&component, capability)
                {
                    return Ok(component);
                }
                debug!(
                    "Preferred component {} cannot execute '{}', falling back to scan",
                    id, capability
                );
            }
        }

        self.registry
            .list(None)
            .into_iter()
            .find(|component| {
                component.state() == LifecycleState::Running
                    && self.can_execute(component, capability)
            })
            .ok_or_else(|| DispatchError::NoCapableComponent(capability.to_string()))
    }

    /// Terminal task record by id, if the dispatcher has run it.
    pub fn task(&self, id: &TaskId) -> Option<Task> {
        self.tasks.get(id).map(|task| task.clone())
    }

    /// All terminal task records held by the ledger.
    pub fn tasks(&self) -> Vec<Task> {
        self.tasks.iter().map(|entry| entry.value().clone()).collect()
    }
}
