//! Execution records.
//!
//! A [`WorkflowExecution`] is one run of a workflow. It moves
//! `pending -> running -> {completed | failed}`, and a terminal record is
//! never mutated again. Pending records may also fail directly when the
//! workflow is refused before it starts.

use crate::error::TransitionError;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use innoflow_core::{ExecutionId, NodeId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;

/// Lifecycle state of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns the stored tag.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parses a stored tag.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    fn can_become(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Failed)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One run of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub status: ExecutionStatus,
    /// Node outputs keyed by node id, in execution order.
    #[serde(default)]
    pub results: IndexMap<NodeId, JsonValue>,
    /// Append-only failure messages.
    #[serde(default)]
    pub error_logs: Vec<String>,
    /// Values available to nodes, e.g. for `${name}` substitution.
    #[serde(default)]
    pub variables: Map<String, JsonValue>,
    #[serde(default)]
    pub execution_context: Map<String, JsonValue>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    /// Creates a pending execution.
    #[must_use]
    pub fn new(workflow_id: WorkflowId) -> Self {
        Self {
            id: ExecutionId::new(),
            workflow_id,
            status: ExecutionStatus::Pending,
            results: IndexMap::new(),
            error_logs: Vec::new(),
            variables: Map::new(),
            execution_context: Map::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    #[must_use]
    pub fn with_variables(mut self, variables: Map<String, JsonValue>) -> Self {
        self.variables = variables;
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: Map<String, JsonValue>) -> Self {
        self.execution_context = context;
        self
    }

    /// Moves `pending -> running`.
    ///
    /// # Errors
    ///
    /// Fails if the record is not pending.
    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.transition(ExecutionStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Moves `running -> completed`, attaching the results.
    ///
    /// # Errors
    ///
    /// Fails if the record is not running.
    pub fn complete(
        &mut self,
        results: IndexMap<NodeId, JsonValue>,
    ) -> Result<(), TransitionError> {
        self.transition(ExecutionStatus::Completed)?;
        self.results = results;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Moves to `failed`, keeping whatever results were produced.
    ///
    /// # Errors
    ///
    /// Fails if the record is already terminal.
    pub fn fail(
        &mut self,
        partial_results: IndexMap<NodeId, JsonValue>,
        errors: impl IntoIterator<Item = String>,
    ) -> Result<(), TransitionError> {
        self.transition(ExecutionStatus::Failed)?;
        self.results = partial_results;
        self.error_logs.extend(errors);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Status the stored record must still hold for this one to be written.
    #[must_use]
    pub fn prior_status(&self) -> ExecutionStatus {
        match self.status {
            ExecutionStatus::Pending | ExecutionStatus::Running => ExecutionStatus::Pending,
            ExecutionStatus::Completed => ExecutionStatus::Running,
            ExecutionStatus::Failed if self.started_at.is_some() => ExecutionStatus::Running,
            ExecutionStatus::Failed => ExecutionStatus::Pending,
        }
    }

    /// Returns true once the record has reached a final state.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    fn transition(&mut self, next: ExecutionStatus) -> Result<(), TransitionError> {
        if !self.status.can_become(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}
