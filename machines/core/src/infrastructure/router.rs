// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Routes messages between components based on named rules.
//!
//! Rules are evaluated in insertion order; the first rule naming a
//! destination wins. The routed copy keeps the original message id and
//! records the touching rule under the `routed_by` metadata key. A message
//! no rule matches is published unchanged.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

use crate::domain::component::ComponentId;
use crate::domain::message::{BusError, Message};
use crate::infrastructure::event_bus::EventBus;

type RoutingRule = Box<dyn Fn(&Message) -> Option<ComponentId> + Send + Sync>;

pub struct MessageRouter {
    bus: Arc<EventBus>,
    rules: RwLock<Vec<(String, RoutingRule)>>,
}

impl MessageRouter {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            rules: RwLock::new(Vec::new()),
        }
    }

    /// Add a routing rule that determines a message's destination. Adding a
    /// rule under an existing name replaces it in place, keeping its
    /// evaluation position.
    pub fn add_routing_rule(
        &self,
        name: impl Into<String>,
        rule: impl Fn(&Message) -> Option<ComponentId> + Send + Sync + 'static,
    ) {
        let name = name.into();
        let mut rules = self.rules.write();
        if let Some(existing) = rules.iter_mut().find(|(existing, _)| *existing == name) {
            existing.1 = Box::new(rule);
        } else {
            rules.push((name.clone(), Box::new(rule)));
        }
        debug!("Added routing rule: {}", name);
    }

    pub fn remove_routing_rule(&self, name: &str) -> bool {
        let mut rules = self.rules.write();
        let before = rules.len();
        rules.retain(|(existing, _)| existing != name);
        let removed = rules.len() != before;
        if removed {
            debug!("Removed routing rule: {}", name);
        }
        removed
    }

    /// Apply routing rules and publish. Returns the message that was
    /// actually published (routed copy or the original) for traceability.
    pub async fn route_message(&self, message: Message) -> Result<Message, BusError> {
        let matched = {
            let rules = self.rules.read();
            rules
                .iter()
                .find_map(|(name, rule)| rule(&message).map(|destination| (name.clone(), destination)))
        };

        match matched {
            Some((rule_name, destination)) => {
                let routed = message.routed_to(destination.clone(), &rule_name);
                debug!(
                    "Message {} routed to {} by rule {}",
                    message.id, destination, rule_name
                );
                self.bus.publish(routed.clone()).await?;
                Ok(routed)
            }
            None => {
                self.bus.publish(message.clone()).await?;
                Ok(message)
            }
        }
    }
}
