// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Capability descriptors and tracked task records.
//!
//! A [`Capability`] is a named operation a component declares, gated by the
//! integrations it requires. A capability is executable on a component iff
//! every name in `required_integrations` is present in that component's
//! attached-integration set; the dispatcher enforces this before invoking
//! the component's dispatch point.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::message::Payload;

/// Declared expected parameter for a capability. Advisory: validated by the
/// dispatcher, never enforced by the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Expected JSON type: "string", "number", "boolean", "array", "object".
    pub param_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParameterSpec {
    pub fn required(param_type: impl Into<String>) -> Self {
        Self {
            param_type: param_type.into(),
            required: true,
            default: None,
        }
    }

    pub fn optional(param_type: impl Into<String>, default: Option<Value>) -> Self {
        Self {
            param_type: param_type.into(),
            required: false,
            default,
        }
    }

    fn matches_type(&self, value: &Value) -> bool {
        match self.param_type.as_str() {
            "string" => value.is_string(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            _ => true,
        }
    }
}

/// Named operation a component can perform, gated by required integrations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub required_integrations: Vec<String>,
    #[serde(default)]
    pub parameters: HashMap<String, ParameterSpec>,
}

impl Capability {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required_integrations: Vec::new(),
            parameters: HashMap::new(),
        }
    }

    pub fn requires(mut self, integration: impl Into<String>) -> Self {
        self.required_integrations.push(integration.into());
        self
    }

    pub fn parameter(mut self, name: impl Into<String>, spec: ParameterSpec) -> Self {
        self.parameters.insert(name.into(), spec);
        self
    }

    /// Fill in declared defaults for parameters the caller omitted.
    pub fn apply_defaults(&self, parameters: &Payload) -> Payload {
        let mut effective = parameters.clone();
        for (name, spec) in &self.parameters {
            if !effective.contains_key(name) {
                if let Some(default) = &spec.default {
                    effective.insert(name.clone(), default.clone());
                }
            }
        }
        effective
    }

    /// Advisory check of `parameters` against the declared schema. Returns a
    /// list of human-readable issues; empty means clean.
    pub fn validate_parameters(&self, parameters: &Payload) -> Vec<String> {
        let mut issues = Vec::new();
        for (name, spec) in &self.parameters {
            match parameters.get(name) {
                None => {
                    if spec.required {
                        issues.push(format!("missing required parameter '{}'", name));
                    }
                }
                Some(value) => {
                    if !spec.matches_type(value) {
                        issues.push(format!(
                            "parameter '{}' expected type {}, got {}",
                            name,
                            spec.param_type,
                            json_type_name(value)
                        ));
                    }
                }
            }
        }
        issues
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Unique identifier for a tracked task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(String);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Tracked execution record of one capability invocation. Created `Pending`
/// by the dispatcher, moved to `Running` immediately before the capability
/// body runs, and always left in a terminal state the caller can observe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub capability: String,
    pub parameters: Payload,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(capability: impl Into<String>, parameters: Payload) -> Self {
        Self {
            id: TaskId::new(),
            capability: capability.into(),
            parameters,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
        }
    }

    pub fn start(&mut self) {
        self.status = TaskStatus::Running;
    }

    pub fn complete(&mut self) {
        self.status = TaskStatus::Completed;
    }

    pub fn fail(&mut self) {
        self.status = TaskStatus::Failed;
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, TaskStatus::Completed | TaskStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_status_transitions() {
        let mut task = Task::new("echo", Payload::new());
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(!task.is_terminal());

        task.start();
        assert_eq!(task.status, TaskStatus::Running);

        task.complete();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.is_terminal());
    }

    #[test]
    fn test_validate_parameters_reports_missing_required() {
        let capability = Capability::new("analyze", "Analyze a repository")
            .parameter("repo", ParameterSpec::required("string"));

        let issues = capability.validate_parameters(&Payload::new());
        assert_eq!(issues.len(), 1);
        assert!(issues[0].contains("repo"));
    }

    #[test]
    fn test_validate_parameters_reports_type_mismatch() {
        let capability = Capability::new("analyze", "Analyze a repository")
            .parameter("depth", ParameterSpec::optional("number", None));

        let mut params = Payload::new();
        params.insert("depth".to_string(), Value::String("deep".into()));

        let issues = capability.validate_parameters(&params);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].contains("expected type number"));
    }

    #[test]
    fn test_apply_defaults_fills_missing_only() {
        let capability = Capability::new("analyze", "Analyze a repository")
            .parameter("depth", ParameterSpec::optional("number", Some(Value::from(3))));

        let mut supplied = Payload::new();
        supplied.insert("depth".to_string(), Value::from(7));

        assert_eq!(capability.apply_defaults(&Payload::new())["depth"], Value::from(3));
        assert_eq!(capability.apply_defaults(&supplied)["depth"], Value::from(7));
    }
}
