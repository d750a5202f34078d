//! Structural validation of workflows.
//!
//! Every check runs on its own and all violations are collected; nothing
//! short-circuits. The validator is pure: the same workflow always yields
//! the same list.

use crate::definition::Workflow;
use crate::error::StructuralError;
use crate::graph::ConnectionGraph;
use crate::node::Node;
use crate::port::PortDirection;
use crate::registry::NodeTypeRegistry;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Checks workflows against the node-type registry.
#[derive(Debug, Clone)]
pub struct Validator {
    registry: Arc<NodeTypeRegistry>,
    check_order: bool,
}

impl Validator {
    /// Creates a validator with the declared-order check turned off.
    #[must_use]
    pub fn new(registry: Arc<NodeTypeRegistry>) -> Self {
        Self {
            registry,
            check_order: false,
        }
    }

    /// Also report connections that run against the declared `order`.
    #[must_use]
    pub fn with_order_check(mut self, enabled: bool) -> Self {
        self.check_order = enabled;
        self
    }

    /// Returns human-readable problems; empty means valid.
    #[must_use]
    pub fn validate(&self, workflow: &Workflow) -> Vec<String> {
        self.issues(workflow)
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    /// Returns every structural problem found.
    #[must_use]
    pub fn issues(&self, workflow: &Workflow) -> Vec<StructuralError> {
        let mut issues = Vec::new();
        let graph = ConnectionGraph::new(&workflow.nodes, &workflow.connections);

        // A single cycle error covers the whole workflow.
        if graph.has_cycle() {
            issues.push(StructuralError::CycleDetected);
        }

        for node in &workflow.nodes {
            check_required_inputs(workflow, node, &mut issues);
        }

        for node in &workflow.nodes {
            self.check_type_and_config(node, &mut issues);
        }

        if workflow.nodes.is_empty() {
            issues.push(StructuralError::NoNodes);
        }

        check_duplicate_orders(workflow, &mut issues);
        check_connections(workflow, &mut issues);

        for node in &workflow.nodes {
            self.check_port_drift(node, &mut issues);
        }

        if self.check_order {
            for connection in graph.order_violations() {
                issues.push(StructuralError::OrderConflict {
                    source: connection.source_node,
                    target: connection.target_node,
                });
            }
        }

        issues
    }

    fn check_type_and_config(&self, node: &Node, issues: &mut Vec<StructuralError>) {
        match self.registry.get_node_type(node.kind) {
            Ok(definition) => {
                issues.extend(definition.missing_required(&node.config).map(|param| {
                    StructuralError::MissingConfigParam {
                        node_id: node.id,
                        param: param.to_string(),
                    }
                }));
            }
            Err(e) => issues.push(e),
        }
    }

    fn check_port_drift(&self, node: &Node, issues: &mut Vec<StructuralError>) {
        // Unknown types are already reported by the config check.
        let Ok(definition) = self.registry.get_node_type(node.kind) else {
            return;
        };

        for expected in &definition.ports {
            match node.port(&expected.name, expected.direction) {
                None => issues.push(StructuralError::PortMissing {
                    node_id: node.id,
                    port_name: expected.name.clone(),
                    direction: expected.direction,
                }),
                Some(stored) if stored.data_type != expected.data_type => {
                    issues.push(StructuralError::PortMismatch {
                        node_id: node.id,
                        port_name: expected.name.clone(),
                        detail: format!(
                            "has data type {}, expected {}",
                            stored.data_type, expected.data_type
                        ),
                    });
                }
                Some(stored) if stored.optional != expected.optional => {
                    issues.push(StructuralError::PortMismatch {
                        node_id: node.id,
                        port_name: expected.name.clone(),
                        detail: format!(
                            "optional is {}, expected {}",
                            stored.optional, expected.optional
                        ),
                    });
                }
                Some(_) => {}
            }
        }

        for stored in &node.ports {
            let defined = definition
                .ports
                .iter()
                .any(|d| d.name == stored.name && d.direction == stored.direction);
            if !defined {
                issues.push(StructuralError::PortUnexpected {
                    node_id: node.id,
                    port_name: stored.name.clone(),
                    direction: stored.direction,
                });
            }
        }
    }
}

fn check_required_inputs(workflow: &Workflow, node: &Node, issues: &mut Vec<StructuralError>) {
    for port in node.inputs().filter(|p| !p.optional) {
        let connections = workflow
            .incoming(node.id)
            .filter(|c| c.target_port == port.name)
            .count();
        match connections {
            0 => issues.push(StructuralError::RequiredInputMissing {
                node_id: node.id,
                port_name: port.name.clone(),
            }),
            1 => {}
            n => issues.push(StructuralError::RequiredInputDuplicated {
                node_id: node.id,
                port_name: port.name.clone(),
                connections: n,
            }),
        }
    }
}

fn check_duplicate_orders(workflow: &Workflow, issues: &mut Vec<StructuralError>) {
    let mut counts: BTreeMap<i32, usize> = BTreeMap::new();
    for node in &workflow.nodes {
        *counts.entry(node.order).or_default() += 1;
    }
    issues.extend(
        counts
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(order, _)| StructuralError::DuplicateOrder { order }),
    );
}

fn check_connections(workflow: &Workflow, issues: &mut Vec<StructuralError>) {
    for connection in &workflow.connections {
        let source = workflow.node(connection.source_node);
        let target = workflow.node(connection.target_node);

        match source {
            None => issues.push(StructuralError::NodeNotFound {
                node_id: connection.source_node,
            }),
            Some(node) if node.port(&connection.source_port, PortDirection::Output).is_none() => {
                issues.push(StructuralError::PortNotFound {
                    node_id: node.id,
                    port_name: connection.source_port.clone(),
                    direction: PortDirection::Output,
                });
            }
            Some(_) => {}
        }

        match target {
            None => issues.push(StructuralError::NodeNotFound {
                node_id: connection.target_node,
            }),
            Some(node) if node.port(&connection.target_port, PortDirection::Input).is_none() => {
                issues.push(StructuralError::PortNotFound {
                    node_id: node.id,
                    port_name: connection.target_port.clone(),
                    direction: PortDirection::Input,
                });
            }
            Some(_) => {}
        }
    }
}
