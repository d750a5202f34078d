//! Core domain types shared across the InnoFlow workspace.
//!
//! This crate provides the strongly-typed identifiers for workflow entities
//! and the `Result` alias every layer builds its error context on.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ConnectionId, ExecutionId, NodeId, ParseIdError, WorkflowId};
