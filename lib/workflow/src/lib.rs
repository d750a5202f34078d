//! Workflow engine for InnoFlow.
//!
//! This crate provides the workflow model and its execution engine:
//!
//! - **Graph Model**: workflows of typed nodes joined by port-to-port connections
//! - **Node Types**: a registry of node kinds with their ports and config parameters
//! - **Validation**: structural checks producing a flat list of readable errors
//! - **Resolution**: turning upstream results into a node's input
//! - **Execution**: the execution record state machine and the retrying orchestrator

pub mod connection;
pub mod definition;
pub mod error;
pub mod execution;
pub mod executor;
pub mod graph;
pub mod node;
pub mod orchestrator;
pub mod port;
pub mod registry;
pub mod resolver;
pub mod store;
pub mod validation;

pub use connection::NodeConnection;
pub use definition::Workflow;
pub use error::{EngineError, NodeExecutionError, StoreError, StructuralError, TransitionError};
pub use execution::{ExecutionStatus, WorkflowExecution};
pub use executor::{ExecutorRegistry, NodeExecutor, ScriptedExecutor};
pub use graph::ConnectionGraph;
pub use node::Node;
pub use orchestrator::{EngineConfig, ExecutionOrder, Orchestrator, RetryScope};
pub use port::{NodePort, PortDataType, PortDefinition, PortDirection};
pub use registry::{NodeKind, NodeTypeDefinition, NodeTypeRegistry};
pub use resolver::NodeInput;
pub use store::{InMemoryStore, WorkflowStore};
pub use validation::Validator;
