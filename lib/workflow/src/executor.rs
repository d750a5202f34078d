//! Node execution capability.
//!
//! The orchestrator only sees [`NodeExecutor`]. [`ExecutorRegistry`] is the
//! dispatch table that routes each node to the executor registered for its
//! kind; vendor-backed kinds (completion, speech, summarization) are
//! registered by the embedding application.

use crate::error::NodeExecutionError;
use crate::node::Node;
use crate::registry::NodeKind;
use crate::resolver::NodeInput;
use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::debug;

/// Runs a single node.
///
/// Implementations must return within bounded time; the engine never
/// cancels a call.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Executes `node` with its resolved input and returns its output.
    async fn execute(&self, node: &Node, input: &NodeInput)
    -> Result<JsonValue, NodeExecutionError>;
}

/// Dispatch table from node kind to executor.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<NodeKind, Arc<dyn NodeExecutor>>,
}

impl ExecutorRegistry {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a table with the vendor-free executors.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(NodeKind::TextInput, Arc::new(TextInputExecutor));
        registry.register(NodeKind::ParameterInput, Arc::new(ParameterInputExecutor));
        registry.register(
            NodeKind::TextTransformation,
            Arc::new(TextTransformationExecutor),
        );
        registry.register(NodeKind::TextOutput, Arc::new(TextOutputExecutor));
        registry
    }

    /// Routes `kind` to `executor`, replacing any previous entry.
    pub fn register(&mut self, kind: NodeKind, executor: Arc<dyn NodeExecutor>) {
        self.executors.insert(kind, executor);
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, kind: NodeKind, executor: Arc<dyn NodeExecutor>) -> Self {
        self.register(kind, executor);
        self
    }

    #[must_use]
    pub fn supports(&self, kind: NodeKind) -> bool {
        self.executors.contains_key(&kind)
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("kinds", &self.executors.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl NodeExecutor for ExecutorRegistry {
    async fn execute(
        &self,
        node: &Node,
        input: &NodeInput,
    ) -> Result<JsonValue, NodeExecutionError> {
        let executor =
            self.executors
                .get(&node.kind)
                .ok_or_else(|| NodeExecutionError::UnsupportedNodeType {
                    node_type: node.kind.to_string(),
                })?;
        debug!(node_id = %node.id, kind = %node.kind, "dispatching node");
        executor.execute(node, input).await
    }
}

/// Replaces `${name}` placeholders with values from `variables`.
///
/// Unknown placeholders are left as they are. String values are inserted
/// verbatim, everything else as JSON.
#[must_use]
pub fn substitute_variables(template: &str, variables: &Map<String, JsonValue>) -> String {
    let mut rendered = template.to_string();
    for (name, value) in variables {
        let placeholder = format!("${{{name}}}");
        if rendered.contains(&placeholder) {
            let replacement = match value {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            };
            rendered = rendered.replace(&placeholder, &replacement);
        }
    }
    rendered
}

/// Emits configured text, falling back to upstream text when none is set.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextInputExecutor;

#[async_trait]
impl NodeExecutor for TextInputExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: &NodeInput,
    ) -> Result<JsonValue, NodeExecutionError> {
        let configured = node.config_str("text").unwrap_or_default();
        let text = if configured.is_empty() {
            input.primary_text().unwrap_or_default()
        } else {
            match input.variables() {
                Some(variables) => substitute_variables(configured, variables),
                None => configured.to_string(),
            }
        };
        Ok(JsonValue::String(text))
    }
}

/// Emits a named execution variable, or the configured default.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParameterInputExecutor;

#[async_trait]
impl NodeExecutor for ParameterInputExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: &NodeInput,
    ) -> Result<JsonValue, NodeExecutionError> {
        let name = node.config_str("param_name").unwrap_or_default();
        let raw = input
            .variables()
            .and_then(|variables| variables.get(name))
            .cloned()
            .or_else(|| node.config.get("default_value").cloned())
            .unwrap_or(JsonValue::Null);

        let param_type = node.config_str("param_type").unwrap_or("string");
        coerce_parameter(&raw, param_type).ok_or_else(|| NodeExecutionError::InvalidInput {
            message: format!("parameter '{name}' cannot be read as {param_type}"),
        })
    }
}

fn coerce_parameter(raw: &JsonValue, param_type: &str) -> Option<JsonValue> {
    match (param_type, raw) {
        (_, JsonValue::Null) => Some(JsonValue::Null),
        ("number", JsonValue::Number(_)) => Some(raw.clone()),
        ("number", JsonValue::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(JsonValue::Number),
        ("boolean", JsonValue::Bool(_)) => Some(raw.clone()),
        ("boolean", JsonValue::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(JsonValue::Bool(true)),
            "false" | "0" | "no" | "" => Some(JsonValue::Bool(false)),
            _ => None,
        },
        ("number" | "boolean", _) => None,
        (_, JsonValue::String(_)) => Some(raw.clone()),
        (_, other) => Some(JsonValue::String(other.to_string())),
    }
}

/// Applies a simple string operation to upstream text.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextTransformationExecutor;

#[async_trait]
impl NodeExecutor for TextTransformationExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: &NodeInput,
    ) -> Result<JsonValue, NodeExecutionError> {
        let text = input
            .primary_text()
            .ok_or_else(|| NodeExecutionError::InvalidInput {
                message: "text transformation needs upstream text".to_string(),
            })?;

        let transformed = match node.config_str("operation").unwrap_or("to_uppercase") {
            "to_uppercase" => text.to_uppercase(),
            "to_lowercase" => text.to_lowercase(),
            "trim" => text.trim().to_string(),
            "replace" => {
                let find = node.config_str("find").unwrap_or_default();
                if find.is_empty() {
                    return Err(NodeExecutionError::InvalidInput {
                        message: "replace needs a non-empty 'find' value".to_string(),
                    });
                }
                text.replace(find, node.config_str("replace_with").unwrap_or_default())
            }
            other => {
                return Err(NodeExecutionError::InvalidInput {
                    message: format!("unknown operation '{other}'"),
                });
            }
        };
        Ok(JsonValue::String(transformed))
    }
}

/// Passes upstream text through as the final output.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextOutputExecutor;

#[async_trait]
impl NodeExecutor for TextOutputExecutor {
    async fn execute(
        &self,
        _node: &Node,
        input: &NodeInput,
    ) -> Result<JsonValue, NodeExecutionError> {
        input
            .primary_text()
            .map(JsonValue::String)
            .ok_or_else(|| NodeExecutionError::InvalidInput {
                message: "text output has no upstream text".to_string(),
            })
    }
}

/// Executor that fails a fixed number of times, then succeeds.
///
/// Counts every call, which makes it handy for exercising retry behaviour.
#[derive(Debug)]
pub struct ScriptedExecutor {
    failures: u32,
    error: NodeExecutionError,
    output: JsonValue,
    calls: AtomicU32,
}

impl ScriptedExecutor {
    /// Always succeeds with `output`.
    #[must_use]
    pub fn succeeding(output: JsonValue) -> Self {
        Self::failing_times(0, output)
    }

    /// Fails on every call.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::failing_times(u32::MAX, JsonValue::Null).with_error(message)
    }

    /// Fails the first `failures` calls, then returns `output`.
    #[must_use]
    pub fn failing_times(failures: u32, output: JsonValue) -> Self {
        Self {
            failures,
            error: NodeExecutionError::ExecutionFailed {
                message: "scripted failure".to_string(),
            },
            output,
            calls: AtomicU32::new(0),
        }
    }

    /// Sets the failure message.
    #[must_use]
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error = NodeExecutionError::ExecutionFailed {
            message: message.into(),
        };
        self
    }

    /// Number of times `execute` has been called.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NodeExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        _node: &Node,
        _input: &NodeInput,
    ) -> Result<JsonValue, NodeExecutionError> {
        let previous = self.calls.fetch_add(1, Ordering::SeqCst);
        if previous < self.failures {
            Err(self.error.clone())
        } else {
            Ok(self.output.clone())
        }
    }
}
