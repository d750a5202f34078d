//! Workflow orchestrator.
//!
//! Drives one execution at a time through its workflow:
//! 1. Mark the record running and persist it
//! 2. Order the enabled nodes (declared `order`, or dependency order)
//! 3. For each node, resolve its input and run it with retry
//! 4. Persist the terminal state: completed with results, or failed with
//!    the partial results and an error log entry naming the node
//!
//! Nodes run strictly one after another. Separate executions share nothing
//! but the read-only workflow, so callers may run many concurrently.

use crate::definition::Workflow;
use crate::error::{EngineError, StoreError, StructuralError};
use crate::execution::{ExecutionStatus, WorkflowExecution};
use crate::executor::NodeExecutor;
use crate::graph::ConnectionGraph;
use crate::node::Node;
use crate::registry::NodeTypeRegistry;
use crate::resolver::NodeInput;
use crate::store::WorkflowStore;
use crate::validation::Validator;
use indexmap::IndexMap;
use innoflow_core::{ExecutionId, NodeId, WorkflowId};
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// How the orchestrator orders nodes within a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOrder {
    /// Ascending declared `order`; connections are not consulted.
    #[default]
    Declared,
    /// Dependency order from connections, ties broken by declared `order`.
    Topological,
}

/// Where a node's failure counter starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryScope {
    /// Every run starts counting at zero.
    #[default]
    PerExecution,
    /// Runs continue from the node's stored `retry_count`, so failures
    /// accumulate across runs until the counter is reset.
    PerNode,
}

fn default_validate_before_run() -> bool {
    true
}

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub execution_order: ExecutionOrder,
    #[serde(default)]
    pub retry_scope: RetryScope,
    /// Whether callers should validate before executing.
    #[serde(default = "default_validate_before_run")]
    pub validate_before_run: bool,
    /// Whether validation also checks `order` against connection direction.
    #[serde(default)]
    pub check_declared_order: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            execution_order: ExecutionOrder::default(),
            retry_scope: RetryScope::default(),
            validate_before_run: default_validate_before_run(),
            check_declared_order: false,
        }
    }
}

/// Runs workflow executions against a store.
pub struct Orchestrator<S: WorkflowStore> {
    store: Arc<S>,
    registry: Arc<NodeTypeRegistry>,
    executor: Arc<dyn NodeExecutor>,
    config: EngineConfig,
}

impl<S: WorkflowStore> Clone for Orchestrator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            executor: Arc::clone(&self.executor),
            config: self.config.clone(),
        }
    }
}

impl<S: WorkflowStore> Orchestrator<S> {
    /// Creates an orchestrator.
    pub fn new(
        store: Arc<S>,
        registry: Arc<NodeTypeRegistry>,
        executor: Arc<dyn NodeExecutor>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            registry,
            executor,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Returns a validator sharing this orchestrator's registry.
    #[must_use]
    pub fn validator(&self) -> Validator {
        Validator::new(Arc::clone(&self.registry))
            .with_order_check(self.config.check_declared_order)
    }

    /// Loads a workflow and reports its structural problems.
    #[instrument(skip(self), fields(workflow_id = %workflow_id))]
    pub async fn validate(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Vec<String>, Report<EngineError>> {
        let workflow = self.load_workflow(workflow_id).await?;
        let errors = self.validator().validate(&workflow);
        if !errors.is_empty() {
            warn!(error_count = errors.len(), "workflow failed validation");
        }
        Ok(errors)
    }

    /// Creates a pending execution for a workflow.
    #[instrument(skip(self, variables, context), fields(workflow_id = %workflow_id))]
    pub async fn create_execution(
        &self,
        workflow_id: WorkflowId,
        variables: Map<String, JsonValue>,
        context: Map<String, JsonValue>,
    ) -> Result<WorkflowExecution, Report<EngineError>> {
        self.load_workflow(workflow_id).await?;
        let execution = WorkflowExecution::new(workflow_id)
            .with_variables(variables)
            .with_context(context);
        self.store
            .create_execution(&execution)
            .await
            .map_err(EngineError::from)?;
        info!(execution_id = %execution.id, "execution created");
        Ok(execution)
    }

    /// Validates, then creates and executes a run.
    ///
    /// An invalid workflow is refused before any execution record exists.
    #[instrument(skip(self, variables), fields(workflow_id = %workflow_id))]
    pub async fn run(
        &self,
        workflow_id: WorkflowId,
        variables: Map<String, JsonValue>,
    ) -> Result<WorkflowExecution, Report<EngineError>> {
        let errors = self.validate(workflow_id).await?;
        if !errors.is_empty() {
            return Err(EngineError::Structural(StructuralError::InvalidWorkflow {
                workflow_id,
                errors,
            })
            .into());
        }
        let execution = self
            .create_execution(workflow_id, variables, Map::new())
            .await?;
        self.execute(execution.id).await
    }

    /// Fails a pending execution without running it.
    ///
    /// Used when the caller refuses to start a run, e.g. after validation.
    #[instrument(skip(self, errors), fields(execution_id = %execution_id))]
    pub async fn reject(
        &self,
        execution_id: ExecutionId,
        errors: Vec<String>,
    ) -> Result<WorkflowExecution, Report<EngineError>> {
        let mut execution = self.load_pending(execution_id).await?;
        execution
            .fail(IndexMap::new(), errors)
            .map_err(|e| EngineError::InvalidState {
                execution_id,
                status: e.from,
            })?;
        self.persist(&execution).await?;
        warn!(errors = ?execution.error_logs, "execution rejected");
        Ok(execution)
    }

    /// Runs a pending execution to a terminal state.
    ///
    /// The record is persisted as running before the first node starts, and
    /// again when it completes or fails. A failure is returned after the
    /// failed state has been stored.
    ///
    /// # Errors
    ///
    /// - `ExecutionNotFound` / `WorkflowNotFound` before anything is touched
    /// - `InvalidState` if the record is not pending, or another run moves
    ///   it first; it is left unchanged
    /// - `Structural(CycleDetected)` when dependency ordering finds a cycle
    /// - `RetriesExhausted` when a node keeps failing
    /// - `NodeFailed` when a node fails and its retry counter cannot be saved
    #[instrument(skip(self), fields(execution_id = %execution_id))]
    pub async fn execute(
        &self,
        execution_id: ExecutionId,
    ) -> Result<WorkflowExecution, Report<EngineError>> {
        let mut execution = self.load_pending(execution_id).await?;
        let workflow = self.load_workflow(execution.workflow_id).await?;

        let plan = match self.plan(&workflow) {
            Ok(plan) => plan,
            Err(e) => {
                let failure = EngineError::Structural(e);
                self.record_failure(&mut execution, IndexMap::new(), &failure)
                    .await?;
                return Err(failure.into());
            }
        };

        execution
            .start()
            .map_err(|e| EngineError::InvalidState {
                execution_id,
                status: e.from,
            })?;
        self.persist(&execution).await?;
        info!(
            workflow_id = %workflow.id,
            node_count = plan.len(),
            "execution started"
        );

        let mut results: IndexMap<NodeId, JsonValue> = IndexMap::new();
        for node in plan {
            let input = NodeInput::resolve(
                node.id,
                workflow.incoming(node.id),
                &results,
                &execution.variables,
            );
            match self.execute_with_retry(node, &input).await {
                Ok(output) => {
                    results.insert(node.id, output);
                }
                Err(failure) => {
                    error!(node_id = %node.id, error = %failure, "node failed, stopping execution");
                    self.record_failure(&mut execution, results, &failure)
                        .await?;
                    return Err(failure.into());
                }
            }
        }

        execution
            .complete(results)
            .map_err(|e| EngineError::InvalidState {
                execution_id,
                status: e.from,
            })?;
        self.persist(&execution).await?;
        info!(result_count = execution.results.len(), "execution completed");
        Ok(execution)
    }

    /// Runs one node, retrying immediately on failure.
    ///
    /// The node gets `max_retries` retries after its first failure; the
    /// counter is persisted after every increment.
    async fn execute_with_retry(
        &self,
        node: &Node,
        input: &NodeInput,
    ) -> Result<JsonValue, EngineError> {
        let mut retries = match self.config.retry_scope {
            RetryScope::PerExecution => 0,
            RetryScope::PerNode => node.retry_count,
        };
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.executor.execute(node, input).await {
                Ok(output) => return Ok(output),
                Err(e) if retries < node.max_retries => {
                    retries += 1;
                    if let Err(source) = self.store.save_retry_count(node.id, retries).await {
                        return Err(EngineError::NodeFailed {
                            node_id: node.id,
                            message: e.to_string(),
                            source,
                        });
                    }
                    info!(node_id = %node.id, attempt = retries, error = %e, "retrying node");
                }
                Err(e) => {
                    return Err(EngineError::RetriesExhausted {
                        node_id: node.id,
                        attempts,
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    /// Enabled nodes in the order they will run.
    fn plan<'w>(&self, workflow: &'w Workflow) -> Result<Vec<&'w Node>, StructuralError> {
        let enabled = workflow.enabled_nodes_by_order();
        match self.config.execution_order {
            ExecutionOrder::Declared => Ok(enabled),
            ExecutionOrder::Topological => {
                let graph = ConnectionGraph::new(enabled.iter().copied(), &workflow.connections);
                let order = graph.topological_order()?;
                Ok(order
                    .into_iter()
                    .filter_map(|node_id| workflow.node(node_id))
                    .collect())
            }
        }
    }

    async fn record_failure(
        &self,
        execution: &mut WorkflowExecution,
        partial_results: IndexMap<NodeId, JsonValue>,
        failure: &EngineError,
    ) -> Result<(), Report<EngineError>> {
        let execution_id = execution.id;
        execution
            .fail(partial_results, [failure.to_string()])
            .map_err(|e| EngineError::InvalidState {
                execution_id,
                status: e.from,
            })?;
        self.persist(execution).await?;
        Ok(())
    }

    /// Saves an execution, reporting a concurrent status change as
    /// `InvalidState`.
    async fn persist(&self, execution: &WorkflowExecution) -> Result<(), Report<EngineError>> {
        match self.store.save_execution(execution).await {
            Ok(()) => Ok(()),
            Err(StoreError::StaleStatus {
                execution_id,
                found,
                ..
            }) => {
                warn!(%execution_id, status = %found, "execution changed underneath this run");
                Err(EngineError::InvalidState {
                    execution_id,
                    status: found,
                }
                .into())
            }
            Err(e) => Err(EngineError::from(e).into()),
        }
    }

    async fn load_workflow(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Workflow, Report<EngineError>> {
        self.store
            .load_workflow(workflow_id)
            .await
            .map_err(EngineError::from)?
            .ok_or_else(|| EngineError::WorkflowNotFound { workflow_id }.into())
    }

    async fn load_pending(
        &self,
        execution_id: ExecutionId,
    ) -> Result<WorkflowExecution, Report<EngineError>> {
        let execution = self
            .store
            .load_execution(execution_id)
            .await
            .map_err(EngineError::from)?
            .ok_or(EngineError::ExecutionNotFound { execution_id })?;
        if execution.status != ExecutionStatus::Pending {
            return Err(EngineError::InvalidState {
                execution_id,
                status: execution.status,
            }
            .into());
        }
        Ok(execution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ExecutorRegistry, ScriptedExecutor};
    use crate::registry::NodeKind;
    use crate::store::InMemoryStore;
    use serde_json::json;

    struct Harness {
        store: Arc<InMemoryStore>,
        registry: Arc<NodeTypeRegistry>,
        workflow: Workflow,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                store: Arc::new(InMemoryStore::new()),
                registry: Arc::new(NodeTypeRegistry::builtin()),
                workflow: Workflow::new("test"),
            }
        }

        fn add(&mut self, kind: NodeKind, order: i32, config: JsonValue) -> NodeId {
            let node = Node::new(self.workflow.id, kind, order)
                .with_config(config.as_object().cloned().unwrap_or_default());
            self.workflow
                .add_node(node, &self.registry)
                .expect("add node")
        }

        fn connect(&mut self, source: NodeId, target: NodeId) {
            self.workflow
                .connect(source, "output", target, "input")
                .expect("connect");
        }

        async fn orchestrator(
            &self,
            executors: ExecutorRegistry,
            config: EngineConfig,
        ) -> Orchestrator<InMemoryStore> {
            self.store
                .save_workflow(&self.workflow)
                .await
                .expect("save workflow");
            Orchestrator::new(
                Arc::clone(&self.store),
                Arc::clone(&self.registry),
                Arc::new(executors),
                config,
            )
        }
    }

    async fn pending(
        orchestrator: &Orchestrator<InMemoryStore>,
        workflow_id: WorkflowId,
    ) -> ExecutionId {
        orchestrator
            .create_execution(workflow_id, Map::new(), Map::new())
            .await
            .expect("create execution")
            .id
    }

    async fn stored(store: &InMemoryStore, id: ExecutionId) -> WorkflowExecution {
        store
            .load_execution(id)
            .await
            .expect("load")
            .expect("present")
    }

    #[tokio::test]
    async fn single_text_input_completes() {
        let mut h = Harness::new();
        let a = h.add(NodeKind::TextInput, 1, json!({"text": "hi"}));
        let orchestrator = h
            .orchestrator(ExecutorRegistry::builtin(), EngineConfig::default())
            .await;
        let id = pending(&orchestrator, h.workflow.id).await;

        let execution = orchestrator.execute(id).await.expect("execute");

        assert_eq!(execution.status, ExecutionStatus::Completed);
        let mut expected = IndexMap::new();
        expected.insert(a, json!("hi"));
        assert_eq!(execution.results, expected);
        assert!(execution.completed_at.is_some());
        assert_eq!(
            h.store.status_history(id).await,
            vec![
                ExecutionStatus::Pending,
                ExecutionStatus::Running,
                ExecutionStatus::Completed
            ]
        );
    }

    #[tokio::test]
    async fn unconnected_nodes_complete_in_declared_order() {
        let mut h = Harness::new();
        let third = h.add(NodeKind::TextInput, 30, json!({"text": "c"}));
        let first = h.add(NodeKind::TextInput, 10, json!({"text": "a"}));
        let second = h.add(NodeKind::TextInput, 20, json!({"text": "b"}));
        let orchestrator = h
            .orchestrator(ExecutorRegistry::builtin(), EngineConfig::default())
            .await;
        let id = pending(&orchestrator, h.workflow.id).await;

        let execution = orchestrator.execute(id).await.expect("execute");

        let keys: Vec<_> = execution.results.keys().copied().collect();
        assert_eq!(keys, vec![first, second, third]);
        let values: Vec<_> = execution.results.values().cloned().collect();
        assert_eq!(values, vec![json!("a"), json!("b"), json!("c")]);
    }

    #[tokio::test]
    async fn chain_passes_values_and_variables() {
        let mut h = Harness::new();
        let a = h.add(NodeKind::TextInput, 1, json!({"text": "hello ${name}"}));
        let b = h.add(
            NodeKind::TextTransformation,
            2,
            json!({"operation": "to_uppercase"}),
        );
        let c = h.add(NodeKind::TextOutput, 3, json!({}));
        h.connect(a, b);
        h.connect(b, c);
        let orchestrator = h
            .orchestrator(ExecutorRegistry::builtin(), EngineConfig::default())
            .await;

        let mut variables = Map::new();
        variables.insert("name".to_string(), json!("ada"));
        let execution = orchestrator
            .run(h.workflow.id, variables)
            .await
            .expect("run");

        assert_eq!(execution.results.get(&a), Some(&json!("hello ada")));
        assert_eq!(execution.results.get(&c), Some(&json!("HELLO ADA")));
    }

    #[tokio::test]
    async fn node_failing_max_retries_times_then_succeeding_completes() {
        let mut h = Harness::new();
        let a = h.add(NodeKind::TextInput, 1, json!({"text": "long text..."}));
        let b = h.add(NodeKind::HuggingfaceSummarization, 2, json!({}));
        h.connect(a, b);
        let scripted = Arc::new(ScriptedExecutor::failing_times(3, json!("summary")));
        let executors = ExecutorRegistry::builtin()
            .with(NodeKind::HuggingfaceSummarization, scripted.clone());
        let orchestrator = h.orchestrator(executors, EngineConfig::default()).await;
        let id = pending(&orchestrator, h.workflow.id).await;

        let execution = orchestrator.execute(id).await.expect("execute");

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(scripted.calls(), 4);
        assert_eq!(execution.results.get(&b), Some(&json!("summary")));
        assert_eq!(h.store.retry_history(b).await, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn exhausted_node_fails_run_and_keeps_partial_results() {
        let mut h = Harness::new();
        let a = h.add(NodeKind::TextInput, 1, json!({"text": "long text..."}));
        let b = h.add(NodeKind::HuggingfaceSummarization, 2, json!({}));
        h.connect(a, b);
        let scripted = Arc::new(
            ScriptedExecutor::failing_times(4, json!("too late")).with_error("model overloaded"),
        );
        let executors = ExecutorRegistry::builtin()
            .with(NodeKind::HuggingfaceSummarization, scripted.clone());
        let orchestrator = h.orchestrator(executors, EngineConfig::default()).await;
        let id = pending(&orchestrator, h.workflow.id).await;

        let err = orchestrator.execute(id).await.expect_err("exhausted");
        assert!(matches!(
            err.current_context(),
            EngineError::RetriesExhausted { node_id, attempts: 4, .. } if *node_id == b
        ));
        assert_eq!(scripted.calls(), 4);

        let execution = stored(&h.store, id).await;
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.error_logs.len(), 1);
        assert!(execution.error_logs[0].contains(&b.to_string()));
        assert!(execution.error_logs[0].contains("model overloaded"));
        let mut expected = IndexMap::new();
        expected.insert(a, json!("long text..."));
        assert_eq!(execution.results, expected);
        assert_eq!(
            h.store.status_history(id).await,
            vec![
                ExecutionStatus::Pending,
                ExecutionStatus::Running,
                ExecutionStatus::Failed
            ]
        );
    }

    #[tokio::test]
    async fn failure_stops_remaining_nodes() {
        let mut h = Harness::new();
        let a = h.add(NodeKind::OpenaiTts, 1, json!({"voice": "en"}));
        let b = h.add(NodeKind::TextInput, 2, json!({"text": "never"}));
        h.workflow.node_mut(a).expect("a").max_retries = 0;
        // No executor for openai_tts is registered.
        let orchestrator = h
            .orchestrator(ExecutorRegistry::builtin(), EngineConfig::default())
            .await;
        let id = pending(&orchestrator, h.workflow.id).await;

        let err = orchestrator.execute(id).await.expect_err("unsupported");
        assert!(
            err.current_context()
                .to_string()
                .contains("failed after 1 attempts: unsupported node type: openai_tts")
        );
        let execution = stored(&h.store, id).await;
        assert!(execution.results.is_empty());
        assert!(!execution.results.contains_key(&b));
    }

    #[tokio::test]
    async fn disabled_nodes_never_run() {
        let mut h = Harness::new();
        let a = h.add(NodeKind::TextInput, 1, json!({"text": "on"}));
        let off = Node::new(h.workflow.id, NodeKind::HuggingfaceSummarization, 2).disabled();
        let off_id = h.workflow.add_node(off, &h.registry).expect("add");
        let scripted = Arc::new(ScriptedExecutor::succeeding(json!("unused")));
        let executors = ExecutorRegistry::builtin()
            .with(NodeKind::HuggingfaceSummarization, scripted.clone());
        let orchestrator = h.orchestrator(executors, EngineConfig::default()).await;
        let id = pending(&orchestrator, h.workflow.id).await;

        let execution = orchestrator.execute(id).await.expect("execute");

        assert_eq!(scripted.calls(), 0);
        assert!(execution.results.contains_key(&a));
        assert!(!execution.results.contains_key(&off_id));
    }

    #[tokio::test]
    async fn terminal_execution_is_not_rerun() {
        let mut h = Harness::new();
        h.add(NodeKind::TextInput, 1, json!({"text": "once"}));
        let orchestrator = h
            .orchestrator(ExecutorRegistry::builtin(), EngineConfig::default())
            .await;
        let id = pending(&orchestrator, h.workflow.id).await;
        let done = orchestrator.execute(id).await.expect("first run");

        let err = orchestrator.execute(id).await.expect_err("second run");
        assert_eq!(
            err.current_context(),
            &EngineError::InvalidState {
                execution_id: id,
                status: ExecutionStatus::Completed,
            }
        );
        assert_eq!(stored(&h.store, id).await, done);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let h = Harness::new();
        let orchestrator = h
            .orchestrator(ExecutorRegistry::builtin(), EngineConfig::default())
            .await;

        let missing_execution = ExecutionId::new();
        let err = orchestrator.execute(missing_execution).await.expect_err("missing");
        assert_eq!(
            err.current_context(),
            &EngineError::ExecutionNotFound {
                execution_id: missing_execution
            }
        );

        let missing_workflow = WorkflowId::new();
        let err = orchestrator
            .create_execution(missing_workflow, Map::new(), Map::new())
            .await
            .expect_err("missing");
        assert_eq!(
            err.current_context(),
            &EngineError::WorkflowNotFound {
                workflow_id: missing_workflow
            }
        );
    }

    #[tokio::test]
    async fn run_refuses_cyclic_workflow() {
        let mut h = Harness::new();
        let a = h.add(NodeKind::TextTransformation, 1, json!({"operation": "trim"}));
        let b = h.add(NodeKind::TextTransformation, 2, json!({"operation": "trim"}));
        h.connect(a, b);
        h.connect(b, a);
        let orchestrator = h
            .orchestrator(ExecutorRegistry::builtin(), EngineConfig::default())
            .await;

        let errors = orchestrator.validate(h.workflow.id).await.expect("validate");
        assert!(errors.contains(&"workflow contains a cycle".to_string()));

        let err = orchestrator
            .run(h.workflow.id, Map::new())
            .await
            .expect_err("refused");
        assert!(matches!(
            err.current_context(),
            EngineError::Structural(StructuralError::InvalidWorkflow { .. })
        ));
        assert!(h.store.list_pending(10).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn reject_fails_pending_record() {
        let mut h = Harness::new();
        h.add(NodeKind::TextOutput, 1, json!({}));
        let orchestrator = h
            .orchestrator(ExecutorRegistry::builtin(), EngineConfig::default())
            .await;
        let id = pending(&orchestrator, h.workflow.id).await;

        let errors = orchestrator.validate(h.workflow.id).await.expect("validate");
        let execution = orchestrator.reject(id, errors.clone()).await.expect("reject");

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.error_logs, errors);
        assert!(execution.started_at.is_none());
    }

    #[tokio::test]
    async fn per_execution_scope_ignores_stored_count() {
        let mut h = Harness::new();
        let a = h.add(NodeKind::HuggingfaceSummarization, 1, json!({}));
        h.workflow.node_mut(a).expect("a").retry_count = 3;
        let scripted = Arc::new(ScriptedExecutor::failing_times(1, json!("ok")));
        let executors =
            ExecutorRegistry::new().with(NodeKind::HuggingfaceSummarization, scripted.clone());
        let orchestrator = h.orchestrator(executors, EngineConfig::default()).await;
        let id = pending(&orchestrator, h.workflow.id).await;

        let execution = orchestrator.execute(id).await.expect("execute");

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(scripted.calls(), 2);
        assert_eq!(h.store.retry_history(a).await, vec![1]);
    }

    #[tokio::test]
    async fn per_node_scope_carries_failures_across_runs() {
        let mut h = Harness::new();
        let a = h.add(NodeKind::HuggingfaceSummarization, 1, json!({}));
        let scripted = Arc::new(ScriptedExecutor::failing_times(2, json!("ok")));
        let executors =
            ExecutorRegistry::new().with(NodeKind::HuggingfaceSummarization, scripted.clone());
        let config = EngineConfig {
            retry_scope: RetryScope::PerNode,
            ..EngineConfig::default()
        };
        let orchestrator = h.orchestrator(executors, config).await;

        // First run burns two retries and succeeds; the counter stays at 2.
        let first = pending(&orchestrator, h.workflow.id).await;
        orchestrator.execute(first).await.expect("first run");
        let node = h
            .store
            .load_workflow(h.workflow.id)
            .await
            .expect("load")
            .expect("present")
            .node(a)
            .cloned()
            .expect("node");
        assert_eq!(node.retry_count, 2);

        // Second run fails once and resumes from 2, leaving one retry.
        let flaky = Arc::new(ScriptedExecutor::failing_times(2, json!("ok")));
        let orchestrator = Orchestrator::new(
            Arc::clone(&h.store),
            Arc::clone(&h.registry),
            Arc::new(
                ExecutorRegistry::new().with(NodeKind::HuggingfaceSummarization, flaky.clone()),
            ),
            EngineConfig {
                retry_scope: RetryScope::PerNode,
                ..EngineConfig::default()
            },
        );
        let second = pending(&orchestrator, h.workflow.id).await;
        let err = orchestrator.execute(second).await.expect_err("budget spent");
        assert!(matches!(
            err.current_context(),
            EngineError::RetriesExhausted { attempts: 2, .. }
        ));
        assert_eq!(flaky.calls(), 2);
        assert_eq!(h.store.retry_history(a).await, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn topological_order_fixes_misdeclared_order() {
        let mut h = Harness::new();
        let sink = h.add(NodeKind::TextOutput, 1, json!({}));
        let source = h.add(NodeKind::TextInput, 2, json!({"text": "up"}));
        h.connect(source, sink);

        let declared = h.orchestrator(ExecutorRegistry::builtin(), EngineConfig::default()).await;
        let id = pending(&declared, h.workflow.id).await;
        let err = declared.execute(id).await.expect_err("sink runs first");
        assert!(err.current_context().to_string().contains("no upstream text"));

        let topological = Orchestrator::new(
            Arc::clone(&h.store),
            Arc::clone(&h.registry),
            Arc::new(ExecutorRegistry::builtin()),
            EngineConfig {
                execution_order: ExecutionOrder::Topological,
                ..EngineConfig::default()
            },
        );
        let id = pending(&topological, h.workflow.id).await;
        let execution = topological.execute(id).await.expect("execute");
        let keys: Vec<_> = execution.results.keys().copied().collect();
        assert_eq!(keys, vec![source, sink]);
        assert_eq!(execution.results.get(&sink), Some(&json!("up")));
    }

    #[tokio::test]
    async fn topological_order_fails_record_on_cycle() {
        let mut h = Harness::new();
        let a = h.add(NodeKind::TextTransformation, 1, json!({"operation": "trim"}));
        let b = h.add(NodeKind::TextTransformation, 2, json!({"operation": "trim"}));
        h.connect(a, b);
        h.connect(b, a);
        let config = EngineConfig {
            execution_order: ExecutionOrder::Topological,
            ..EngineConfig::default()
        };
        let orchestrator = h.orchestrator(ExecutorRegistry::builtin(), config).await;
        let id = pending(&orchestrator, h.workflow.id).await;

        let err = orchestrator.execute(id).await.expect_err("cycle");
        assert_eq!(
            err.current_context(),
            &EngineError::Structural(StructuralError::CycleDetected)
        );
        let execution = stored(&h.store, id).await;
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.error_logs.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_executions_are_independent() {
        let mut h = Harness::new();
        h.add(NodeKind::TextInput, 1, json!({"text": "hi ${who}"}));
        let orchestrator = h
            .orchestrator(ExecutorRegistry::builtin(), EngineConfig::default())
            .await;

        let mut handles = Vec::new();
        for who in ["ann", "bob", "cy"] {
            let mut variables = Map::new();
            variables.insert("who".to_string(), json!(who));
            let id = orchestrator
                .create_execution(h.workflow.id, variables, Map::new())
                .await
                .expect("create")
                .id;
            let orchestrator = orchestrator.clone();
            handles.push(tokio::spawn(async move {
                orchestrator
                    .execute(id)
                    .await
                    .map(|e| (who, e))
                    .map_err(|e| e.current_context().to_string())
            }));
        }

        for handle in handles {
            let (who, execution) = handle.await.expect("join").expect("execute");
            let only = execution.results.values().next().expect("one result");
            assert_eq!(only, &json!(format!("hi {who}")));
        }
    }

    /// An in-memory store with injected faults.
    struct FaultyStore {
        inner: Arc<InMemoryStore>,
        /// Served in place of the stored record, as a reader that lost a
        /// race with another worker would see it.
        stale_execution: Option<WorkflowExecution>,
        /// Returned by every retry counter write.
        retry_count_error: Option<StoreError>,
    }

    impl FaultyStore {
        fn over(inner: &Arc<InMemoryStore>) -> Self {
            Self {
                inner: Arc::clone(inner),
                stale_execution: None,
                retry_count_error: None,
            }
        }
    }

    #[async_trait::async_trait]
    impl WorkflowStore for FaultyStore {
        async fn load_workflow(&self, id: WorkflowId) -> Result<Option<Workflow>, StoreError> {
            self.inner.load_workflow(id).await
        }

        async fn save_workflow(&self, workflow: &Workflow) -> Result<(), StoreError> {
            self.inner.save_workflow(workflow).await
        }

        async fn load_execution(
            &self,
            id: ExecutionId,
        ) -> Result<Option<WorkflowExecution>, StoreError> {
            match &self.stale_execution {
                Some(stale) if stale.id == id => Ok(Some(stale.clone())),
                _ => self.inner.load_execution(id).await,
            }
        }

        async fn create_execution(&self, execution: &WorkflowExecution) -> Result<(), StoreError> {
            self.inner.create_execution(execution).await
        }

        async fn save_execution(&self, execution: &WorkflowExecution) -> Result<(), StoreError> {
            self.inner.save_execution(execution).await
        }

        async fn save_retry_count(
            &self,
            node_id: NodeId,
            retry_count: u32,
        ) -> Result<(), StoreError> {
            match &self.retry_count_error {
                Some(e) => Err(e.clone()),
                None => self.inner.save_retry_count(node_id, retry_count).await,
            }
        }

        async fn list_pending(&self, limit: usize) -> Result<Vec<ExecutionId>, StoreError> {
            self.inner.list_pending(limit).await
        }
    }

    #[tokio::test]
    async fn unsaved_retry_count_fails_run_naming_node_and_cause() {
        let mut h = Harness::new();
        let a = h.add(NodeKind::TextInput, 1, json!({"text": "long text..."}));
        let b = h.add(NodeKind::HuggingfaceSummarization, 2, json!({}));
        h.connect(a, b);
        let scripted = Arc::new(ScriptedExecutor::failing("model down"));
        let executors = ExecutorRegistry::builtin()
            .with(NodeKind::HuggingfaceSummarization, scripted.clone());
        let orchestrator = h
            .orchestrator(ExecutorRegistry::builtin(), EngineConfig::default())
            .await;
        let id = pending(&orchestrator, h.workflow.id).await;
        let faulty = Orchestrator::new(
            Arc::new(FaultyStore {
                retry_count_error: Some(StoreError::Backend {
                    message: "disk full".to_string(),
                }),
                ..FaultyStore::over(&h.store)
            }),
            Arc::clone(&h.registry),
            Arc::new(executors),
            EngineConfig::default(),
        );

        let err = faulty.execute(id).await.expect_err("node failure");

        assert!(matches!(
            err.current_context(),
            EngineError::NodeFailed { node_id, source: StoreError::Backend { .. }, .. }
                if *node_id == b
        ));
        assert_eq!(scripted.calls(), 1);
        let execution = stored(&h.store, id).await;
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.results.keys().copied().collect::<Vec<_>>(), vec![a]);
        let [log] = execution.error_logs.as_slice() else {
            panic!("expected one error entry, got {:?}", execution.error_logs);
        };
        assert!(log.contains(&b.to_string()));
        assert!(log.contains("model down"));
        assert!(log.contains("disk full"));
    }

    #[tokio::test]
    async fn run_that_lost_the_claim_leaves_record_alone() {
        let mut h = Harness::new();
        h.add(NodeKind::TextInput, 1, json!({"text": "once"}));
        let orchestrator = h
            .orchestrator(ExecutorRegistry::builtin(), EngineConfig::default())
            .await;
        let id = pending(&orchestrator, h.workflow.id).await;
        let snapshot = stored(&h.store, id).await;
        let done = orchestrator.execute(id).await.expect("first run");
        let late = Orchestrator::new(
            Arc::new(FaultyStore {
                stale_execution: Some(snapshot),
                ..FaultyStore::over(&h.store)
            }),
            Arc::clone(&h.registry),
            Arc::new(ExecutorRegistry::builtin()),
            EngineConfig::default(),
        );

        let err = late.execute(id).await.expect_err("already claimed");

        assert_eq!(
            err.current_context(),
            &EngineError::InvalidState {
                execution_id: id,
                status: ExecutionStatus::Completed,
            }
        );
        assert_eq!(stored(&h.store, id).await, done);
        assert_eq!(
            h.store.status_history(id).await,
            vec![
                ExecutionStatus::Pending,
                ExecutionStatus::Running,
                ExecutionStatus::Completed
            ]
        );
    }

    #[test]
    fn engine_config_defaults() {
        let config: EngineConfig = serde_json::from_value(json!({})).expect("deserialize");
        assert_eq!(config, EngineConfig::default());
        assert!(config.validate_before_run);
        assert_eq!(config.execution_order, ExecutionOrder::Declared);
        assert_eq!(config.retry_scope, RetryScope::PerExecution);

        let config: EngineConfig = serde_json::from_value(json!({
            "execution_order": "topological",
            "retry_scope": "per_node",
        }))
        .expect("deserialize");
        assert_eq!(config.execution_order, ExecutionOrder::Topological);
        assert_eq!(config.retry_scope, RetryScope::PerNode);
    }
}
