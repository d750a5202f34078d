//! Connections between node ports.

use innoflow_core::{ConnectionId, NodeId};
use serde::{Deserialize, Serialize};

/// A directed edge carrying one output port's value to an input port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConnection {
    pub id: ConnectionId,
    pub source_node: NodeId,
    /// Output port on the source node.
    pub source_port: String,
    pub target_node: NodeId,
    /// Input port on the target node; also the key the value is delivered under.
    pub target_port: String,
}

impl NodeConnection {
    /// Creates a connection with a fresh id.
    #[must_use]
    pub fn new(
        source_node: NodeId,
        source_port: impl Into<String>,
        target_node: NodeId,
        target_port: impl Into<String>,
    ) -> Self {
        Self {
            id: ConnectionId::new(),
            source_node,
            source_port: source_port.into(),
            target_node,
            target_port: target_port.into(),
        }
    }

    /// Creates a connection using the conventional port names ("output" -> "input").
    #[must_use]
    pub fn with_default_ports(source_node: NodeId, target_node: NodeId) -> Self {
        Self::new(source_node, "output", target_node, "input")
    }

    /// Returns true if either endpoint is `node_id`.
    #[must_use]
    pub fn touches(&self, node_id: NodeId) -> bool {
        self.source_node == node_id || self.target_node == node_id
    }
}
