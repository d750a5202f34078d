//! Postgres-backed workflow store.
//!
//! Workflows are stored across `workflows`, `nodes`, `node_ports` and
//! `node_connections`; execution records live in `workflow_executions`.
//! Ids are stored in their prefixed display form.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use innoflow_core::{ExecutionId, NodeId, WorkflowId};
use innoflow_workflow::{
    ExecutionStatus, Node, NodeConnection, NodeKind, NodePort, PortDataType, PortDirection,
    StoreError, Workflow, WorkflowExecution, WorkflowStore,
};
use serde_json::{Map, Value as JsonValue, json};
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use tracing::{debug, instrument};

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend {
        message: e.to_string(),
    }
}

fn decode(message: impl Into<String>) -> StoreError {
    StoreError::Decode {
        message: message.into(),
    }
}

fn parse_id<T>(raw: &str) -> Result<T, StoreError>
where
    T: FromStr,
    T::Err: Display,
{
    T::from_str(raw).map_err(|e| decode(format!("invalid id '{raw}': {e}")))
}

fn parse_status(tag: &str) -> Result<ExecutionStatus, StoreError> {
    ExecutionStatus::from_tag(tag)
        .ok_or_else(|| decode(format!("invalid execution status '{tag}'")))
}

fn into_object(value: JsonValue, column: &str) -> Result<Map<String, JsonValue>, StoreError> {
    match value {
        JsonValue::Object(map) => Ok(map),
        JsonValue::Null => Ok(Map::new()),
        other => Err(decode(format!("{column} is not an object: {other}"))),
    }
}

fn count_to_db(value: u32, column: &str) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| decode(format!("{column} {value} is out of range")))
}

fn count_from_db(value: i32, column: &str) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| decode(format!("{column} {value} is negative")))
}

/// Encodes results as an array of `{node_id, output}` entries so the
/// execution order survives JSONB's key reordering.
fn encode_results(results: &IndexMap<NodeId, JsonValue>) -> JsonValue {
    JsonValue::Array(
        results
            .iter()
            .map(|(node_id, output)| json!({"node_id": node_id.to_string(), "output": output}))
            .collect(),
    )
}

fn decode_results(value: JsonValue) -> Result<IndexMap<NodeId, JsonValue>, StoreError> {
    let JsonValue::Array(entries) = value else {
        return Err(decode("results is not an array"));
    };
    entries
        .into_iter()
        .map(|mut entry| {
            let node_id: NodeId = entry
                .get("node_id")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| decode("result entry has no node_id"))
                .and_then(parse_id)?;
            let output = entry
                .get_mut("output")
                .map(JsonValue::take)
                .unwrap_or(JsonValue::Null);
            Ok((node_id, output))
        })
        .collect()
}

#[derive(FromRow)]
struct WorkflowRow {
    id: String,
    name: String,
    description: Option<String>,
    config: JsonValue,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct NodeRow {
    id: String,
    node_type: String,
    config: JsonValue,
    execution_order: i32,
    is_enabled: bool,
    retry_count: i32,
    max_retries: i32,
}

impl NodeRow {
    fn try_into_node(
        self,
        workflow_id: WorkflowId,
        ports: Vec<NodePort>,
    ) -> Result<Node, StoreError> {
        let kind = NodeKind::from_str(&self.node_type).map_err(|e| decode(e.to_string()))?;
        Ok(Node {
            id: parse_id(&self.id)?,
            workflow_id,
            kind,
            config: into_object(self.config, "node config")?,
            order: self.execution_order,
            is_enabled: self.is_enabled,
            retry_count: count_from_db(self.retry_count, "retry_count")?,
            max_retries: count_from_db(self.max_retries, "max_retries")?,
            ports,
        })
    }
}

#[derive(FromRow)]
struct PortRow {
    node_id: String,
    name: String,
    direction: String,
    data_type: String,
    is_optional: bool,
}

impl PortRow {
    fn try_into_port(self) -> Result<(String, NodePort), StoreError> {
        let direction = PortDirection::from_tag(&self.direction)
            .ok_or_else(|| decode(format!("invalid port direction '{}'", self.direction)))?;
        Ok((
            self.node_id,
            NodePort {
                name: self.name,
                direction,
                data_type: PortDataType::from_tag(&self.data_type),
                optional: self.is_optional,
            },
        ))
    }
}

#[derive(FromRow)]
struct ConnectionRow {
    id: String,
    source_node_id: String,
    source_port: String,
    target_node_id: String,
    target_port: String,
}

impl ConnectionRow {
    fn try_into_connection(self) -> Result<NodeConnection, StoreError> {
        Ok(NodeConnection {
            id: parse_id(&self.id)?,
            source_node: parse_id(&self.source_node_id)?,
            source_port: self.source_port,
            target_node: parse_id(&self.target_node_id)?,
            target_port: self.target_port,
        })
    }
}

#[derive(FromRow)]
struct ExecutionRow {
    id: String,
    workflow_id: String,
    status: String,
    results: JsonValue,
    error_logs: JsonValue,
    variables: JsonValue,
    execution_context: JsonValue,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl ExecutionRow {
    fn try_into_execution(self) -> Result<WorkflowExecution, StoreError> {
        let status = parse_status(&self.status)?;
        let error_logs: Vec<String> = serde_json::from_value(self.error_logs)
            .map_err(|e| decode(format!("invalid error_logs: {e}")))?;
        Ok(WorkflowExecution {
            id: parse_id(&self.id)?,
            workflow_id: parse_id(&self.workflow_id)?,
            status,
            results: decode_results(self.results)?,
            error_logs,
            variables: into_object(self.variables, "variables")?,
            execution_context: into_object(self.execution_context, "execution_context")?,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}

/// [`WorkflowStore`] over a Postgres pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Creates a new store.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkflowStore for PgStore {
    #[instrument(skip(self), fields(workflow_id = %id))]
    async fn load_workflow(&self, id: WorkflowId) -> Result<Option<Workflow>, StoreError> {
        let key = id.to_string();
        let row: Option<WorkflowRow> = sqlx::query_as(
            r#"
            SELECT id, name, description, config, created_at, updated_at
            FROM workflows
            WHERE id = $1
            "#,
        )
        .bind(&key)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        let Some(row) = row else {
            return Ok(None);
        };

        let node_rows: Vec<NodeRow> = sqlx::query_as(
            r#"
            SELECT id, node_type, config, execution_order, is_enabled, retry_count, max_retries
            FROM nodes
            WHERE workflow_id = $1
            ORDER BY execution_order
            "#,
        )
        .bind(&key)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let port_rows: Vec<PortRow> = sqlx::query_as(
            r#"
            SELECT p.node_id, p.name, p.direction, p.data_type, p.is_optional
            FROM node_ports p
            JOIN nodes n ON n.id = p.node_id
            WHERE n.workflow_id = $1
            ORDER BY p.node_id, p.position
            "#,
        )
        .bind(&key)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let connection_rows: Vec<ConnectionRow> = sqlx::query_as(
            r#"
            SELECT id, source_node_id, source_port, target_node_id, target_port
            FROM node_connections
            WHERE workflow_id = $1
            ORDER BY position
            "#,
        )
        .bind(&key)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut ports: HashMap<String, Vec<NodePort>> = HashMap::new();
        for port_row in port_rows {
            let (node_id, port) = port_row.try_into_port()?;
            ports.entry(node_id).or_default().push(port);
        }

        let nodes = node_rows
            .into_iter()
            .map(|node_row| {
                let node_ports = ports.remove(&node_row.id).unwrap_or_default();
                node_row.try_into_node(id, node_ports)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let connections = connection_rows
            .into_iter()
            .map(ConnectionRow::try_into_connection)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(Workflow {
            id: parse_id(&row.id)?,
            name: row.name,
            description: row.description,
            config: into_object(row.config, "workflow config")?,
            nodes,
            connections,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }))
    }

    #[instrument(skip(self, workflow), fields(workflow_id = %workflow.id))]
    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), StoreError> {
        let key = workflow.id.to_string();
        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query(
            r#"
            INSERT INTO workflows (id, name, description, config, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name,
                description = EXCLUDED.description,
                config = EXCLUDED.config,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&key)
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(JsonValue::Object(workflow.config.clone()))
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        // Ports and connections go with their nodes.
        sqlx::query("DELETE FROM nodes WHERE workflow_id = $1")
            .bind(&key)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        for node in &workflow.nodes {
            let node_key = node.id.to_string();
            sqlx::query(
                r#"
                INSERT INTO nodes
                    (id, workflow_id, node_type, config, execution_order, is_enabled,
                     retry_count, max_retries)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(&node_key)
            .bind(&key)
            .bind(node.kind.as_str())
            .bind(JsonValue::Object(node.config.clone()))
            .bind(node.order)
            .bind(node.is_enabled)
            .bind(count_to_db(node.retry_count, "retry_count")?)
            .bind(count_to_db(node.max_retries, "max_retries")?)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

            for (position, port) in (0_i32..).zip(&node.ports) {
                sqlx::query(
                    r#"
                    INSERT INTO node_ports
                        (node_id, name, direction, data_type, is_optional, position)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(&node_key)
                .bind(&port.name)
                .bind(port.direction.as_str())
                .bind(port.data_type.as_str())
                .bind(port.optional)
                .bind(position)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
            }
        }

        for (position, connection) in (0_i32..).zip(&workflow.connections) {
            sqlx::query(
                r#"
                INSERT INTO node_connections
                    (id, workflow_id, source_node_id, source_port,
                     target_node_id, target_port, position)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(connection.id.to_string())
            .bind(&key)
            .bind(connection.source_node.to_string())
            .bind(&connection.source_port)
            .bind(connection.target_node.to_string())
            .bind(&connection.target_port)
            .bind(position)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        tx.commit().await.map_err(backend)?;
        debug!(
            nodes = workflow.nodes.len(),
            connections = workflow.connections.len(),
            "workflow saved"
        );
        Ok(())
    }

    async fn load_execution(
        &self,
        id: ExecutionId,
    ) -> Result<Option<WorkflowExecution>, StoreError> {
        let row: Option<ExecutionRow> = sqlx::query_as(
            r#"
            SELECT id, workflow_id, status, results, error_logs, variables,
                   execution_context, created_at, started_at, completed_at
            FROM workflow_executions
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(ExecutionRow::try_into_execution).transpose()
    }

    async fn create_execution(&self, execution: &WorkflowExecution) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO workflow_executions
                (id, workflow_id, status, results, error_logs, variables,
                 execution_context, created_at, started_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(execution.id.to_string())
        .bind(execution.workflow_id.to_string())
        .bind(execution.status.as_str())
        .bind(encode_results(&execution.results))
        .bind(json!(execution.error_logs))
        .bind(JsonValue::Object(execution.variables.clone()))
        .bind(JsonValue::Object(execution.execution_context.clone()))
        .bind(execution.created_at)
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    #[instrument(
        skip(self, execution),
        fields(execution_id = %execution.id, status = %execution.status)
    )]
    async fn save_execution(&self, execution: &WorkflowExecution) -> Result<(), StoreError> {
        let outcome = sqlx::query(
            r#"
            UPDATE workflow_executions
            SET status = $2, results = $3, error_logs = $4,
                started_at = $5, completed_at = $6
            WHERE id = $1 AND status = $7
            "#,
        )
        .bind(execution.id.to_string())
        .bind(execution.status.as_str())
        .bind(encode_results(&execution.results))
        .bind(json!(execution.error_logs))
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(execution.prior_status().as_str())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if outcome.rows_affected() > 0 {
            return Ok(());
        }

        let current: Option<(String,)> =
            sqlx::query_as("SELECT status FROM workflow_executions WHERE id = $1")
                .bind(execution.id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;
        match current {
            None => Err(StoreError::Missing {
                entity: "execution",
                id: execution.id.to_string(),
            }),
            Some((tag,)) => Err(StoreError::StaleStatus {
                execution_id: execution.id,
                expected: execution.prior_status(),
                found: parse_status(&tag)?,
            }),
        }
    }

    async fn save_retry_count(&self, node_id: NodeId, retry_count: u32) -> Result<(), StoreError> {
        let outcome = sqlx::query("UPDATE nodes SET retry_count = $2 WHERE id = $1")
            .bind(node_id.to_string())
            .bind(count_to_db(retry_count, "retry_count")?)
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        if outcome.rows_affected() == 0 {
            return Err(StoreError::Missing {
                entity: "node",
                id: node_id.to_string(),
            });
        }
        Ok(())
    }

    async fn list_pending(&self, limit: usize) -> Result<Vec<ExecutionId>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT id
            FROM workflow_executions
            WHERE status = 'pending'
            ORDER BY created_at, id
            LIMIT $1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(|(id,)| parse_id(&id)).collect()
    }
}
