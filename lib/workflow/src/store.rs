//! Persistence seam for workflows and execution records.
//!
//! The engine reads graphs and writes execution state through
//! [`WorkflowStore`]. [`InMemoryStore`] backs tests and embedded use; the
//! worker provides a Postgres implementation.

use crate::definition::Workflow;
use crate::error::StoreError;
use crate::execution::{ExecutionStatus, WorkflowExecution};
use async_trait::async_trait;
use indexmap::IndexMap;
use innoflow_core::{ExecutionId, NodeId, WorkflowId};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Storage for workflows and execution records.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Loads a workflow with its nodes and connections.
    async fn load_workflow(&self, id: WorkflowId) -> Result<Option<Workflow>, StoreError>;

    /// Inserts or replaces a workflow with its nodes and connections.
    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), StoreError>;

    /// Loads an execution record.
    async fn load_execution(
        &self,
        id: ExecutionId,
    ) -> Result<Option<WorkflowExecution>, StoreError>;

    /// Inserts a new execution record.
    async fn create_execution(&self, execution: &WorkflowExecution) -> Result<(), StoreError>;

    /// Overwrites status, results, error log and timestamps of an existing record.
    ///
    /// The write only lands if the stored record still holds
    /// [`WorkflowExecution::prior_status`]; otherwise it fails with
    /// [`StoreError::StaleStatus`] and the stored record is unchanged.
    async fn save_execution(&self, execution: &WorkflowExecution) -> Result<(), StoreError>;

    /// Writes a node's retry counter.
    async fn save_retry_count(&self, node_id: NodeId, retry_count: u32) -> Result<(), StoreError>;

    /// Returns up to `limit` pending executions, oldest first.
    async fn list_pending(&self, limit: usize) -> Result<Vec<ExecutionId>, StoreError>;
}

/// A [`WorkflowStore`] held in process memory.
///
/// Keeps a log of every execution status and retry counter written, so
/// callers can observe intermediate states after the fact.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    workflows: RwLock<HashMap<WorkflowId, Workflow>>,
    executions: RwLock<IndexMap<ExecutionId, WorkflowExecution>>,
    status_log: RwLock<Vec<(ExecutionId, ExecutionStatus)>>,
    retry_log: RwLock<Vec<(NodeId, u32)>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Statuses written for `id`, in write order.
    pub async fn status_history(&self, id: ExecutionId) -> Vec<ExecutionStatus> {
        self.status_log
            .read()
            .await
            .iter()
            .filter(|(execution_id, _)| *execution_id == id)
            .map(|(_, status)| *status)
            .collect()
    }

    /// Retry counters written for `node_id`, in write order.
    pub async fn retry_history(&self, node_id: NodeId) -> Vec<u32> {
        self.retry_log
            .read()
            .await
            .iter()
            .filter(|(id, _)| *id == node_id)
            .map(|(_, count)| *count)
            .collect()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryStore {
    async fn load_workflow(&self, id: WorkflowId) -> Result<Option<Workflow>, StoreError> {
        Ok(self.workflows.read().await.get(&id).cloned())
    }

    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), StoreError> {
        self.workflows
            .write()
            .await
            .insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn load_execution(
        &self,
        id: ExecutionId,
    ) -> Result<Option<WorkflowExecution>, StoreError> {
        Ok(self.executions.read().await.get(&id).cloned())
    }

    async fn create_execution(&self, execution: &WorkflowExecution) -> Result<(), StoreError> {
        self.executions
            .write()
            .await
            .insert(execution.id, execution.clone());
        self.status_log
            .write()
            .await
            .push((execution.id, execution.status));
        Ok(())
    }

    async fn save_execution(&self, execution: &WorkflowExecution) -> Result<(), StoreError> {
        let mut executions = self.executions.write().await;
        let stored = executions
            .get_mut(&execution.id)
            .ok_or_else(|| StoreError::Missing {
                entity: "execution",
                id: execution.id.to_string(),
            })?;
        let expected = execution.prior_status();
        if stored.status != expected {
            return Err(StoreError::StaleStatus {
                execution_id: execution.id,
                expected,
                found: stored.status,
            });
        }
        *stored = execution.clone();
        drop(executions);

        self.status_log
            .write()
            .await
            .push((execution.id, execution.status));
        Ok(())
    }

    async fn save_retry_count(&self, node_id: NodeId, retry_count: u32) -> Result<(), StoreError> {
        let mut workflows = self.workflows.write().await;
        let node = workflows
            .values_mut()
            .find_map(|workflow| workflow.node_mut(node_id))
            .ok_or_else(|| StoreError::Missing {
                entity: "node",
                id: node_id.to_string(),
            })?;
        node.retry_count = retry_count;
        drop(workflows);

        self.retry_log.write().await.push((node_id, retry_count));
        Ok(())
    }

    async fn list_pending(&self, limit: usize) -> Result<Vec<ExecutionId>, StoreError> {
        Ok(self
            .executions
            .read()
            .await
            .values()
            .filter(|execution| execution.status == ExecutionStatus::Pending)
            .take(limit)
            .map(|execution| execution.id)
            .collect())
    }
}
