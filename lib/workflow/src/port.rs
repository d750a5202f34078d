//! Port system for workflow nodes.
//!
//! Ports are named connection points on nodes. Their shape comes from the
//! node type definition in the registry; each node keeps its own copy so a
//! stored workflow can be checked against the registry later.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a port receives or produces data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortDirection {
    /// Receives data from an upstream connection.
    Input,
    /// Produces data for downstream connections.
    Output,
}

impl PortDirection {
    /// Returns the stored tag for this direction.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }

    /// Parses a stored tag.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "input" => Some(Self::Input),
            "output" => Some(Self::Output),
            _ => None,
        }
    }
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The data type tag carried by a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortDataType {
    /// Accepts or produces any value.
    #[default]
    Any,
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl PortDataType {
    /// Returns the stored tag for this data type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }

    /// Parses a stored tag; unknown tags are treated as `Any`.
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "string" => Self::String,
            "number" => Self::Number,
            "boolean" => Self::Boolean,
            "object" => Self::Object,
            "array" => Self::Array,
            _ => Self::Any,
        }
    }

    /// Checks whether a value of this type may flow into a port of `other`.
    #[must_use]
    pub fn is_compatible_with(&self, other: &Self) -> bool {
        matches!(self, Self::Any) || matches!(other, Self::Any) || self == other
    }
}

impl fmt::Display for PortDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A port as declared by a node type definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDefinition {
    pub name: String,
    pub direction: PortDirection,
    pub data_type: PortDataType,
    /// Optional inputs may stay unconnected.
    pub optional: bool,
    pub description: String,
}

impl PortDefinition {
    /// Declares a required input port.
    #[must_use]
    pub fn input(name: impl Into<String>, data_type: PortDataType) -> Self {
        Self {
            name: name.into(),
            direction: PortDirection::Input,
            data_type,
            optional: false,
            description: String::new(),
        }
    }

    /// Declares an output port.
    #[must_use]
    pub fn output(name: impl Into<String>, data_type: PortDataType) -> Self {
        Self {
            name: name.into(),
            direction: PortDirection::Output,
            data_type,
            optional: false,
            description: String::new(),
        }
    }

    /// Marks the port optional.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Builds the stored port for a node.
    #[must_use]
    pub fn to_node_port(&self) -> NodePort {
        NodePort {
            name: self.name.clone(),
            direction: self.direction,
            data_type: self.data_type,
            optional: self.optional,
        }
    }
}

/// A port stored on a node. `(node, name, direction)` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePort {
    pub name: String,
    pub direction: PortDirection,
    pub data_type: PortDataType,
    pub optional: bool,
}

impl NodePort {
    fn key(&self) -> (&str, PortDirection) {
        (self.name.as_str(), self.direction)
    }
}

/// What a reconciliation pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortSync {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
}

impl PortSync {
    /// Returns true if the stored ports already matched.
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Brings `ports` in line with `definitions` in place.
///
/// Matching ports are kept, changed ones updated, missing ones appended and
/// extra ones dropped. Ports that match are never removed and re-added, so
/// readers of `ports` never see a required port disappear.
pub fn reconcile_ports(ports: &mut Vec<NodePort>, definitions: &[PortDefinition]) -> PortSync {
    let mut sync = PortSync::default();

    ports.retain(|port| {
        let wanted = definitions
            .iter()
            .any(|d| d.name == port.name && d.direction == port.direction);
        if !wanted {
            sync.removed.push(port.name.clone());
        }
        wanted
    });

    for definition in definitions {
        let desired = definition.to_node_port();
        match ports.iter_mut().find(|p| p.key() == desired.key()) {
            Some(existing) if *existing != desired => {
                *existing = desired;
                sync.updated.push(definition.name.clone());
            }
            Some(_) => {}
            None => {
                ports.push(desired);
                sync.added.push(definition.name.clone());
            }
        }
    }

    sync
}
