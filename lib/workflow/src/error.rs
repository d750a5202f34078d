//! Error types for the workflow crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `StructuralError`: problems with the shape of a workflow graph
//! - `NodeExecutionError`: a single failed attempt of a node executor
//! - `StoreError`: graph store / execution record persistence
//! - `EngineError`: orchestrator-level failures (wraps lower errors via context)

use crate::execution::ExecutionStatus;
use crate::port::PortDirection;
use innoflow_core::{ConnectionId, ExecutionId, NodeId, WorkflowId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Problems with the structure or configuration of a workflow.
///
/// The validator reports these as a flat list; graph-editing operations
/// return the first one they hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuralError {
    /// The connection graph contains at least one directed cycle.
    CycleDetected,
    /// A non-optional input port has no incoming connection.
    RequiredInputMissing { node_id: NodeId, port_name: String },
    /// A non-optional input port has more than one incoming connection.
    RequiredInputDuplicated {
        node_id: NodeId,
        port_name: String,
        connections: usize,
    },
    /// The node type tag is not in the registry.
    UnknownNodeType { type_name: String },
    /// A required configuration parameter is absent or null.
    MissingConfigParam { node_id: NodeId, param: String },
    /// Two nodes of the same workflow share an execution order.
    DuplicateOrder { order: i32 },
    /// The workflow has no nodes at all.
    NoNodes,
    /// A referenced node is not part of the workflow.
    NodeNotFound { node_id: NodeId },
    /// A node belongs to a different workflow than the one being edited.
    ForeignNode {
        node_id: NodeId,
        workflow_id: WorkflowId,
    },
    /// A connection names a port the node does not have in that direction.
    PortNotFound {
        node_id: NodeId,
        port_name: String,
        direction: PortDirection,
    },
    /// The source port's data type cannot feed the target port.
    IncompatiblePorts {
        source_node: NodeId,
        source_port: String,
        target_node: NodeId,
        target_port: String,
    },
    /// A non-optional target port already has an incoming connection.
    TargetPortOccupied { node_id: NodeId, port_name: String },
    /// The connection id is unknown.
    ConnectionNotFound { connection_id: ConnectionId },
    /// A port defined by the node type is not stored on the node.
    PortMissing {
        node_id: NodeId,
        port_name: String,
        direction: PortDirection,
    },
    /// A stored port has no counterpart in the node type definition.
    PortUnexpected {
        node_id: NodeId,
        port_name: String,
        direction: PortDirection,
    },
    /// A stored port disagrees with its definition.
    PortMismatch {
        node_id: NodeId,
        port_name: String,
        detail: String,
    },
    /// A connection points from a later-ordered node to an earlier one.
    OrderConflict { source: NodeId, target: NodeId },
    /// The workflow failed validation and must not be executed.
    InvalidWorkflow {
        workflow_id: WorkflowId,
        errors: Vec<String>,
    },
}

impl fmt::Display for StructuralError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CycleDetected => write!(f, "workflow contains a cycle"),
            Self::RequiredInputMissing { node_id, port_name } => {
                write!(
                    f,
                    "node {node_id}: required input port '{port_name}' has no connection"
                )
            }
            Self::RequiredInputDuplicated {
                node_id,
                port_name,
                connections,
            } => {
                write!(
                    f,
                    "node {node_id}: required input port '{port_name}' has multiple connections ({connections})"
                )
            }
            Self::UnknownNodeType { type_name } => write!(f, "unknown node type: {type_name}"),
            Self::MissingConfigParam { node_id, param } => {
                write!(f, "node {node_id}: required parameter '{param}' is missing")
            }
            Self::DuplicateOrder { order } => {
                write!(f, "duplicate node execution order {order}")
            }
            Self::NoNodes => write!(f, "workflow has no nodes"),
            Self::NodeNotFound { node_id } => write!(f, "node not found: {node_id}"),
            Self::ForeignNode {
                node_id,
                workflow_id,
            } => {
                write!(f, "node {node_id} belongs to workflow {workflow_id}")
            }
            Self::PortNotFound {
                node_id,
                port_name,
                direction,
            } => {
                write!(f, "{direction} port '{port_name}' not found on node {node_id}")
            }
            Self::IncompatiblePorts {
                source_node,
                source_port,
                target_node,
                target_port,
            } => {
                write!(
                    f,
                    "incompatible ports: {source_node}:{source_port} -> {target_node}:{target_port}"
                )
            }
            Self::TargetPortOccupied { node_id, port_name } => {
                write!(
                    f,
                    "target port '{port_name}' on node {node_id} already has a connection"
                )
            }
            Self::ConnectionNotFound { connection_id } => {
                write!(f, "connection not found: {connection_id}")
            }
            Self::PortMissing {
                node_id,
                port_name,
                direction,
            } => {
                write!(f, "node {node_id} is missing {direction} port '{port_name}'")
            }
            Self::PortUnexpected {
                node_id,
                port_name,
                direction,
            } => {
                write!(f, "node {node_id} has extra {direction} port '{port_name}'")
            }
            Self::PortMismatch {
                node_id,
                port_name,
                detail,
            } => {
                write!(f, "node {node_id}: port '{port_name}' {detail}")
            }
            Self::OrderConflict { source, target } => {
                write!(
                    f,
                    "node {source} feeds node {target} but is not ordered before it"
                )
            }
            Self::InvalidWorkflow {
                workflow_id,
                errors,
            } => {
                write!(
                    f,
                    "workflow {workflow_id} is invalid: {}",
                    errors.join("; ")
                )
            }
        }
    }
}

impl std::error::Error for StructuralError {}

/// A single failed attempt of a node executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeExecutionError {
    /// Input validation failed.
    InvalidInput { message: String },
    /// Execution failed.
    ExecutionFailed { message: String },
    /// No executor is registered for the node type.
    UnsupportedNodeType { node_type: String },
    /// External service error.
    ExternalServiceError { service: String, message: String },
    /// The executor gave up waiting.
    Timeout,
}

impl fmt::Display for NodeExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput { message } => write!(f, "invalid input: {message}"),
            Self::ExecutionFailed { message } => write!(f, "execution failed: {message}"),
            Self::UnsupportedNodeType { node_type } => {
                write!(f, "unsupported node type: {node_type}")
            }
            Self::ExternalServiceError { service, message } => {
                write!(f, "external service error ({service}): {message}")
            }
            Self::Timeout => write!(f, "execution timed out"),
        }
    }
}

impl std::error::Error for NodeExecutionError {}

/// Errors from the graph store and execution record persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing store could not be reached or rejected the query.
    Backend { message: String },
    /// A stored row could not be decoded into a domain value.
    Decode { message: String },
    /// A write targeted a record that does not exist.
    Missing { entity: &'static str, id: String },
    /// Another writer moved the execution out of the status this write
    /// started from.
    StaleStatus {
        execution_id: ExecutionId,
        expected: ExecutionStatus,
        found: ExecutionStatus,
    },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend { message } => write!(f, "store backend error: {message}"),
            Self::Decode { message } => write!(f, "failed to decode stored record: {message}"),
            Self::Missing { entity, id } => write!(f, "{entity} {id} does not exist"),
            Self::StaleStatus {
                execution_id,
                expected,
                found,
            } => write!(f, "execution {execution_id} is {found}, expected {expected}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// An illegal execution status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionError {
    /// Status the record was in.
    pub from: ExecutionStatus,
    /// Status the caller asked for.
    pub to: ExecutionStatus,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid execution transition from {} to {}",
            self.from, self.to
        )
    }
}

impl std::error::Error for TransitionError {}

/// Orchestrator-level errors.
///
/// Use these to add engine context when wrapping lower-level errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Workflow not found.
    WorkflowNotFound { workflow_id: WorkflowId },
    /// Execution record not found.
    ExecutionNotFound { execution_id: ExecutionId },
    /// The execution is not in a state that allows the operation.
    InvalidState {
        execution_id: ExecutionId,
        status: ExecutionStatus,
    },
    /// A node kept failing after its retry budget was spent.
    RetriesExhausted {
        node_id: NodeId,
        attempts: u32,
        message: String,
    },
    /// A node failed and its retry counter could not be persisted, so the
    /// run stopped before the retry budget was spent.
    NodeFailed {
        node_id: NodeId,
        message: String,
        source: StoreError,
    },
    /// The workflow graph is structurally unusable.
    Structural(StructuralError),
    /// Persisting or loading engine state failed.
    Store(StoreError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkflowNotFound { workflow_id } => {
                write!(f, "workflow not found: {workflow_id}")
            }
            Self::ExecutionNotFound { execution_id } => {
                write!(f, "execution not found: {execution_id}")
            }
            Self::InvalidState {
                execution_id,
                status,
            } => {
                write!(f, "execution {execution_id} is {status}, expected pending")
            }
            Self::RetriesExhausted {
                node_id,
                attempts,
                message,
            } => {
                write!(
                    f,
                    "node {node_id} failed after {attempts} attempts: {message}"
                )
            }
            Self::NodeFailed {
                node_id,
                message,
                source,
            } => {
                write!(
                    f,
                    "node {node_id} failed: {message} (retry count not saved: {source})"
                )
            }
            Self::Structural(e) => write!(f, "structural error: {e}"),
            Self::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StructuralError> for EngineError {
    fn from(e: StructuralError) -> Self {
        Self::Structural(e)
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}
