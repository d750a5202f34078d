//! Workflow nodes.
//!
//! A node is a single configured step. Its `kind` picks the type definition
//! in the registry; `config` is an opaque map whose meaning depends on the
//! kind.

use crate::port::{NodePort, PortDirection};
use crate::registry::NodeKind;
use innoflow_core::{NodeId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Retry ceiling applied when none is configured.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_enabled() -> bool {
    true
}

/// A workflow node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub workflow_id: WorkflowId,
    pub kind: NodeKind,
    #[serde(default)]
    pub config: Map<String, JsonValue>,
    /// Position in the declared execution sequence, unique per workflow.
    pub order: i32,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
    /// Failed attempts recorded against this node.
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub ports: Vec<NodePort>,
}

impl Node {
    /// Creates an enabled node with no ports and the default retry ceiling.
    ///
    /// Ports are filled in when the node is added to a workflow.
    #[must_use]
    pub fn new(workflow_id: WorkflowId, kind: NodeKind, order: i32) -> Self {
        Self {
            id: NodeId::new(),
            workflow_id,
            kind,
            config: Map::new(),
            order,
            is_enabled: true,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            ports: Vec::new(),
        }
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: Map<String, JsonValue>) -> Self {
        self.config = config;
        self
    }

    /// Sets a single configuration value.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: JsonValue) -> Self {
        self.config.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.is_enabled = false;
        self
    }

    /// Clears the recorded failure count.
    pub fn reset_retry_count(&mut self) {
        self.retry_count = 0;
    }

    /// Returns the stored port with the given name and direction.
    #[must_use]
    pub fn port(&self, name: &str, direction: PortDirection) -> Option<&NodePort> {
        self.ports
            .iter()
            .find(|p| p.name == name && p.direction == direction)
    }

    /// Returns true if a port with this name exists in either direction.
    #[must_use]
    pub fn has_port_named(&self, name: &str) -> bool {
        self.ports.iter().any(|p| p.name == name)
    }

    /// Returns the stored input ports.
    pub fn inputs(&self) -> impl Iterator<Item = &NodePort> {
        self.ports
            .iter()
            .filter(|p| p.direction == PortDirection::Input)
    }

    /// Returns a string configuration value, if present.
    #[must_use]
    pub fn config_str(&self, name: &str) -> Option<&str> {
        self.config.get(name).and_then(JsonValue::as_str)
    }
}
