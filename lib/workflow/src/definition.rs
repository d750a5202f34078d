//! Workflow definition and graph editing.
//!
//! A workflow owns its nodes and the connections between them. The editing
//! operations here enforce the invariants that must hold before anything is
//! stored: unique `order`, ports derived from the registry, and connections
//! that run from an output port to an input port of the same workflow.

use crate::connection::NodeConnection;
use crate::error::StructuralError;
use crate::node::Node;
use crate::port::{PortDirection, PortSync, reconcile_ports};
use crate::registry::NodeTypeRegistry;
use chrono::{DateTime, Utc};
use innoflow_core::{ConnectionId, NodeId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// A workflow: a named graph of nodes and connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    pub description: Option<String>,
    /// Workflow-wide settings, opaque to the engine.
    #[serde(default)]
    pub config: Map<String, JsonValue>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub connections: Vec<NodeConnection>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Creates an empty workflow.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(WorkflowId::new(), name)
    }

    /// Creates an empty workflow with a specific ID.
    #[must_use]
    pub fn with_id(id: WorkflowId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            description: None,
            config: Map::new(),
            nodes: Vec::new(),
            connections: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    pub fn node_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id == node_id)
    }

    /// Adds a node, deriving its ports from the registry.
    ///
    /// # Errors
    ///
    /// - `ForeignNode` if the node was created for another workflow
    /// - `DuplicateOrder` if another node already uses the same `order`
    /// - `UnknownNodeType` if the registry has no definition for the kind
    pub fn add_node(
        &mut self,
        mut node: Node,
        registry: &NodeTypeRegistry,
    ) -> Result<NodeId, StructuralError> {
        if node.workflow_id != self.id {
            return Err(StructuralError::ForeignNode {
                node_id: node.id,
                workflow_id: node.workflow_id,
            });
        }
        if self.nodes.iter().any(|n| n.order == node.order) {
            return Err(StructuralError::DuplicateOrder { order: node.order });
        }
        let definition = registry.get_node_type(node.kind)?;
        reconcile_ports(&mut node.ports, &definition.ports);

        let node_id = node.id;
        self.nodes.push(node);
        self.touch();
        Ok(node_id)
    }

    /// Removes a node together with every connection touching it.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if the node is not part of this workflow.
    pub fn remove_node(&mut self, node_id: NodeId) -> Result<Node, StructuralError> {
        let position = self
            .nodes
            .iter()
            .position(|n| n.id == node_id)
            .ok_or(StructuralError::NodeNotFound { node_id })?;
        self.connections.retain(|c| !c.touches(node_id));
        self.touch();
        Ok(self.nodes.remove(position))
    }

    /// Connects an output port to an input port.
    ///
    /// # Errors
    ///
    /// - `NodeNotFound` if either node is not part of this workflow
    /// - `PortNotFound` if the source has no such output or the target no such input
    /// - `IncompatiblePorts` if the data types cannot be joined
    /// - `TargetPortOccupied` if a required target port is already connected
    pub fn connect(
        &mut self,
        source_node: NodeId,
        source_port: &str,
        target_node: NodeId,
        target_port: &str,
    ) -> Result<ConnectionId, StructuralError> {
        let source = self.node(source_node).ok_or(StructuralError::NodeNotFound {
            node_id: source_node,
        })?;
        let target = self.node(target_node).ok_or(StructuralError::NodeNotFound {
            node_id: target_node,
        })?;

        let output = source
            .port(source_port, PortDirection::Output)
            .ok_or_else(|| StructuralError::PortNotFound {
                node_id: source_node,
                port_name: source_port.to_string(),
                direction: PortDirection::Output,
            })?;
        let input = target
            .port(target_port, PortDirection::Input)
            .ok_or_else(|| StructuralError::PortNotFound {
                node_id: target_node,
                port_name: target_port.to_string(),
                direction: PortDirection::Input,
            })?;

        if !output.data_type.is_compatible_with(&input.data_type) {
            return Err(StructuralError::IncompatiblePorts {
                source_node,
                source_port: source_port.to_string(),
                target_node,
                target_port: target_port.to_string(),
            });
        }

        if !input.optional
            && self
                .incoming(target_node)
                .any(|c| c.target_port == target_port)
        {
            return Err(StructuralError::TargetPortOccupied {
                node_id: target_node,
                port_name: target_port.to_string(),
            });
        }

        let connection = NodeConnection::new(source_node, source_port, target_node, target_port);
        let connection_id = connection.id;
        self.connections.push(connection);
        self.touch();
        Ok(connection_id)
    }

    /// Removes a connection.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionNotFound` for an unknown id.
    pub fn disconnect(
        &mut self,
        connection_id: ConnectionId,
    ) -> Result<NodeConnection, StructuralError> {
        let position = self
            .connections
            .iter()
            .position(|c| c.id == connection_id)
            .ok_or(StructuralError::ConnectionNotFound { connection_id })?;
        self.touch();
        Ok(self.connections.remove(position))
    }

    /// Reconciles one node's stored ports with its type definition.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` or `UnknownNodeType`.
    pub fn sync_ports(
        &mut self,
        node_id: NodeId,
        registry: &NodeTypeRegistry,
    ) -> Result<PortSync, StructuralError> {
        let node = self
            .node_mut(node_id)
            .ok_or(StructuralError::NodeNotFound { node_id })?;
        let definition = registry.get_node_type(node.kind)?;
        let sync = reconcile_ports(&mut node.ports, &definition.ports);
        if !sync.is_unchanged() {
            self.touch();
        }
        Ok(sync)
    }

    /// Reconciles every node's ports. Returns only the nodes that changed.
    ///
    /// # Errors
    ///
    /// Returns `UnknownNodeType` for the first node whose kind is not registered;
    /// nodes before it have already been reconciled.
    pub fn sync_all_ports(
        &mut self,
        registry: &NodeTypeRegistry,
    ) -> Result<Vec<(NodeId, PortSync)>, StructuralError> {
        let mut changed = Vec::new();
        for node in &mut self.nodes {
            let definition = registry.get_node_type(node.kind)?;
            let sync = reconcile_ports(&mut node.ports, &definition.ports);
            if !sync.is_unchanged() {
                changed.push((node.id, sync));
            }
        }
        if !changed.is_empty() {
            self.touch();
        }
        Ok(changed)
    }

    /// Connections whose target is `node_id`.
    pub fn incoming(&self, node_id: NodeId) -> impl Iterator<Item = &NodeConnection> {
        self.connections
            .iter()
            .filter(move |c| c.target_node == node_id)
    }

    /// Connections whose source is `node_id`.
    pub fn outgoing(&self, node_id: NodeId) -> impl Iterator<Item = &NodeConnection> {
        self.connections
            .iter()
            .filter(move |c| c.source_node == node_id)
    }

    /// Enabled nodes sorted ascending by `order`.
    #[must_use]
    pub fn enabled_nodes_by_order(&self) -> Vec<&Node> {
        let mut nodes: Vec<&Node> = self.nodes.iter().filter(|n| n.is_enabled).collect();
        nodes.sort_by_key(|n| n.order);
        nodes
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::NodeKind;
    use serde_json::json;

    fn registry() -> NodeTypeRegistry {
        NodeTypeRegistry::builtin()
    }

    #[test]
    fn add_node_derives_ports() {
        let registry = registry();
        let mut workflow = Workflow::new("demo");
        let id = workflow
            .add_node(Node::new(workflow.id, NodeKind::TextTransformation, 1), &registry)
            .expect("add");

        let node = workflow.node(id).expect("node");
        assert!(node.port("input", PortDirection::Input).is_some());
        assert!(node.port("output", PortDirection::Output).is_some());
    }

    #[test]
    fn duplicate_order_is_rejected() {
        let registry = registry();
        let mut workflow = Workflow::new("demo");
        workflow
            .add_node(Node::new(workflow.id, NodeKind::TextInput, 1), &registry)
            .expect("first");
        let err = workflow
            .add_node(Node::new(workflow.id, NodeKind::TextOutput, 1), &registry)
            .expect_err("duplicate");

        assert_eq!(err, StructuralError::DuplicateOrder { order: 1 });
        assert_eq!(workflow.nodes.len(), 1);
    }

    #[test]
    fn node_from_other_workflow_is_rejected() {
        let registry = registry();
        let mut workflow = Workflow::new("demo");
        let other = WorkflowId::new();
        let err = workflow
            .add_node(Node::new(other, NodeKind::TextInput, 1), &registry)
            .expect_err("foreign");
        assert!(matches!(
            err,
            StructuralError::ForeignNode { workflow_id, .. } if workflow_id == other
        ));
    }

    #[test]
    fn unregistered_kind_is_rejected() {
        let mut workflow = Workflow::new("demo");
        let err = workflow
            .add_node(
                Node::new(workflow.id, NodeKind::TextInput, 1),
                &NodeTypeRegistry::new(),
            )
            .expect_err("empty registry");
        assert!(matches!(err, StructuralError::UnknownNodeType { .. }));
    }

    #[test]
    fn connect_checks_port_directions() {
        let registry = registry();
        let mut workflow = Workflow::new("demo");
        let a = workflow
            .add_node(Node::new(workflow.id, NodeKind::TextInput, 1), &registry)
            .expect("a");
        let b = workflow
            .add_node(Node::new(workflow.id, NodeKind::TextOutput, 2), &registry)
            .expect("b");

        let err = workflow.connect(b, "input", a, "output").expect_err("reversed");
        assert_eq!(
            err,
            StructuralError::PortNotFound {
                node_id: b,
                port_name: "input".to_string(),
                direction: PortDirection::Output,
            }
        );

        workflow.connect(a, "output", b, "input").expect("forward");
        assert_eq!(workflow.incoming(b).count(), 1);
        assert_eq!(workflow.outgoing(a).count(), 1);
    }

    #[test]
    fn required_target_accepts_one_connection() {
        let registry = registry();
        let mut workflow = Workflow::new("demo");
        let a = workflow
            .add_node(Node::new(workflow.id, NodeKind::TextInput, 1), &registry)
            .expect("a");
        let b = workflow
            .add_node(Node::new(workflow.id, NodeKind::TextInput, 2), &registry)
            .expect("b");
        let c = workflow
            .add_node(Node::new(workflow.id, NodeKind::TextOutput, 3), &registry)
            .expect("c");

        workflow.connect(a, "output", c, "input").expect("first");
        let err = workflow.connect(b, "output", c, "input").expect_err("second");
        assert!(matches!(err, StructuralError::TargetPortOccupied { node_id, .. } if node_id == c));
    }

    #[test]
    fn connect_to_unknown_node_fails() {
        let registry = registry();
        let mut workflow = Workflow::new("demo");
        let a = workflow
            .add_node(Node::new(workflow.id, NodeKind::TextInput, 1), &registry)
            .expect("a");
        let stranger = NodeId::new();
        let err = workflow
            .connect(a, "output", stranger, "input")
            .expect_err("unknown");
        assert_eq!(err, StructuralError::NodeNotFound { node_id: stranger });
    }

    #[test]
    fn remove_node_drops_its_connections() {
        let registry = registry();
        let mut workflow = Workflow::new("demo");
        let a = workflow
            .add_node(Node::new(workflow.id, NodeKind::TextInput, 1), &registry)
            .expect("a");
        let b = workflow
            .add_node(Node::new(workflow.id, NodeKind::TextOutput, 2), &registry)
            .expect("b");
        workflow.connect(a, "output", b, "input").expect("connect");

        workflow.remove_node(a).expect("remove");
        assert!(workflow.connections.is_empty());
        assert_eq!(
            workflow.remove_node(a),
            Err(StructuralError::NodeNotFound { node_id: a })
        );
    }

    #[test]
    fn disconnect_unknown_connection() {
        let mut workflow = Workflow::new("demo");
        let id = ConnectionId::new();
        assert_eq!(
            workflow.disconnect(id),
            Err(StructuralError::ConnectionNotFound { connection_id: id })
        );
    }

    #[test]
    fn sync_ports_after_kind_change() {
        let registry = registry();
        let mut workflow = Workflow::new("demo");
        let id = workflow
            .add_node(Node::new(workflow.id, NodeKind::TextInput, 1), &registry)
            .expect("add");

        workflow.node_mut(id).expect("node").kind = NodeKind::TextOutput;
        let sync = workflow.sync_ports(id, &registry).expect("sync");
        assert_eq!(sync.added, vec!["input"]);
        assert_eq!(sync.removed, vec!["output"]);

        assert!(workflow.sync_all_ports(&registry).expect("sync all").is_empty());
    }

    #[test]
    fn enabled_nodes_sorted_by_order() {
        let registry = registry();
        let mut workflow = Workflow::new("demo");
        let late = workflow
            .add_node(
                Node::new(workflow.id, NodeKind::TextInput, 5).with_param("text", json!("b")),
                &registry,
            )
            .expect("late");
        workflow
            .add_node(Node::new(workflow.id, NodeKind::TextInput, 3).disabled(), &registry)
            .expect("disabled");
        let early = workflow
            .add_node(Node::new(workflow.id, NodeKind::TextInput, 1), &registry)
            .expect("early");

        let ids: Vec<_> = workflow.enabled_nodes_by_order().iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![early, late]);
    }
}
