// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod capability;
pub mod component;
pub mod message;

pub use capability::{Capability, ParameterSpec, Task, TaskId, TaskStatus};
pub use component::{Component, ComponentCore, ComponentError, ComponentId, Integration, LifecycleState};
pub use message::{BusError, EventHandler, EventPublisher, Message, MessageId, Metadata, Payload};
