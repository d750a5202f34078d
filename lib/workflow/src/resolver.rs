//! Dependency resolution for node inputs.
//!
//! Turns a node's incoming connections and the results gathered so far into
//! the payload handed to its executor.

use crate::connection::NodeConnection;
use indexmap::IndexMap;
use innoflow_core::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Reserved key under which execution variables are exposed.
pub const VARIABLES_KEY: &str = "variables";

/// Keys checked, in order, when an executor wants "the upstream text".
const TEXT_KEYS: [&str; 3] = ["result", "input", "text"];

/// The resolved input of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "snake_case")]
pub enum NodeInput {
    /// No upstream data and no variables; the node falls back to its own config.
    Empty,
    /// Upstream values keyed by target port, plus `variables` when present.
    Ports(Map<String, JsonValue>),
}

impl NodeInput {
    /// Builds the input for `node_id`.
    ///
    /// Only connections targeting `node_id` whose source already has a result
    /// contribute. Two connections into the same port keep the last one seen.
    #[must_use]
    pub fn resolve<'a>(
        node_id: NodeId,
        connections: impl IntoIterator<Item = &'a NodeConnection>,
        results: &IndexMap<NodeId, JsonValue>,
        variables: &Map<String, JsonValue>,
    ) -> Self {
        let mut values = Map::new();
        for connection in connections
            .into_iter()
            .filter(|c| c.target_node == node_id)
        {
            if let Some(result) = results.get(&connection.source_node) {
                values.insert(connection.target_port.clone(), result.clone());
            }
        }
        if !variables.is_empty() {
            values.insert(
                VARIABLES_KEY.to_string(),
                JsonValue::Object(variables.clone()),
            );
        }

        if values.is_empty() {
            Self::Empty
        } else {
            Self::Ports(values)
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Returns the value delivered to `port`.
    #[must_use]
    pub fn port(&self, port: &str) -> Option<&JsonValue> {
        match self {
            Self::Empty => None,
            Self::Ports(values) => values.get(port),
        }
    }

    /// Returns the execution variables, if any were passed.
    #[must_use]
    pub fn variables(&self) -> Option<&Map<String, JsonValue>> {
        self.port(VARIABLES_KEY).and_then(JsonValue::as_object)
    }

    /// Returns the upstream text: the first non-empty of the `result`,
    /// `input` or `text` ports.
    ///
    /// Non-string scalars are rendered as JSON.
    #[must_use]
    pub fn primary_text(&self) -> Option<String> {
        TEXT_KEYS
            .iter()
            .filter_map(|key| self.port(key))
            .find_map(|value| match value {
                JsonValue::Null => None,
                JsonValue::String(s) if s.is_empty() => None,
                JsonValue::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            })
    }
}
