//! Node-type registry.
//!
//! Maps a [`NodeKind`] to its port layout and configuration schema. The
//! registry is an explicit value built once at startup and shared through an
//! `Arc`; nothing reads it from global state.

use crate::error::StructuralError;
use crate::port::{PortDataType, PortDefinition};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue, json};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// The fixed set of node type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    TextInput,
    ParameterInput,
    OpenaiCompletion,
    OpenaiTts,
    HuggingfaceSummarization,
    TextTransformation,
    TextOutput,
}

impl NodeKind {
    /// Every known kind, in catalogue order.
    pub const ALL: [NodeKind; 7] = [
        Self::TextInput,
        Self::ParameterInput,
        Self::OpenaiCompletion,
        Self::OpenaiTts,
        Self::HuggingfaceSummarization,
        Self::TextTransformation,
        Self::TextOutput,
    ];

    /// Returns the stored tag.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TextInput => "text_input",
            Self::ParameterInput => "parameter_input",
            Self::OpenaiCompletion => "openai_completion",
            Self::OpenaiTts => "openai_tts",
            Self::HuggingfaceSummarization => "huggingface_summarization",
            Self::TextTransformation => "text_transformation",
            Self::TextOutput => "text_output",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = StructuralError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| StructuralError::UnknownNodeType {
                type_name: s.to_string(),
            })
    }
}

/// Broad grouping used by editors to lay out the palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    Input,
    Ai,
    Processing,
    Output,
}

/// The value kind a configuration parameter expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    String,
    Number,
    Boolean,
    /// One of the parameter's `options`.
    Select,
}

/// One configuration parameter of a node type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigParam {
    pub name: String,
    pub kind: ParamKind,
    pub default: Option<JsonValue>,
    pub required: bool,
    pub description: String,
    pub options: Vec<String>,
}

impl ConfigParam {
    /// Creates an optional parameter with no default.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            default: None,
            required: false,
            description: String::new(),
            options: Vec::new(),
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn with_default(mut self, default: JsonValue) -> Self {
        self.default = Some(default);
        self
    }

    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: &[&str]) -> Self {
        self.options = options.iter().map(|o| (*o).to_string()).collect();
        self
    }
}

/// Ports and configuration schema of one node type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTypeDefinition {
    pub kind: NodeKind,
    pub category: NodeCategory,
    pub description: String,
    pub ports: Vec<PortDefinition>,
    pub config_params: Vec<ConfigParam>,
}

impl NodeTypeDefinition {
    /// Checks a node configuration against this type's parameters.
    ///
    /// A required parameter counts as missing when its key is absent or its
    /// value is null.
    #[must_use]
    pub fn validate_config(&self, config: &Map<String, JsonValue>) -> Vec<String> {
        self.missing_required(config)
            .map(|name| format!("Required parameter '{name}' is missing"))
            .collect()
    }

    /// Names of required parameters that are absent or null in `config`.
    pub fn missing_required<'a>(
        &'a self,
        config: &'a Map<String, JsonValue>,
    ) -> impl Iterator<Item = &'a str> + 'a {
        self.config_params
            .iter()
            .filter(|param| param.required)
            .filter(|param| config.get(&param.name).is_none_or(JsonValue::is_null))
            .map(|param| param.name.as_str())
    }

    /// Builds a configuration from defaults, then applies known overrides.
    ///
    /// Keys that are not parameters of this type are dropped.
    #[must_use]
    pub fn create_node_config(&self, overrides: &Map<String, JsonValue>) -> Map<String, JsonValue> {
        let mut config = Map::new();
        for param in &self.config_params {
            if let Some(default) = &param.default {
                config.insert(param.name.clone(), default.clone());
            }
        }
        for (name, value) in overrides {
            if self.config_params.iter().any(|p| &p.name == name) {
                config.insert(name.clone(), value.clone());
            }
        }
        config
    }

    /// Returns the input port definitions.
    pub fn inputs(&self) -> impl Iterator<Item = &PortDefinition> {
        self.ports
            .iter()
            .filter(|p| p.direction == crate::port::PortDirection::Input)
    }
}

/// Catalogue of node types.
#[derive(Debug, Clone, Default)]
pub struct NodeTypeRegistry {
    types: HashMap<NodeKind, NodeTypeDefinition>,
}

impl NodeTypeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the standard node types.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for definition in builtin_definitions() {
            registry.register(definition);
        }
        registry
    }

    /// Adds or replaces a definition.
    pub fn register(&mut self, definition: NodeTypeDefinition) {
        self.types.insert(definition.kind, definition);
    }

    /// Looks up a node type.
    pub fn get_node_type(&self, kind: NodeKind) -> Result<&NodeTypeDefinition, StructuralError> {
        self.types
            .get(&kind)
            .ok_or_else(|| StructuralError::UnknownNodeType {
                type_name: kind.as_str().to_string(),
            })
    }

    /// Iterates over the registered definitions in catalogue order.
    pub fn iter(&self) -> impl Iterator<Item = &NodeTypeDefinition> {
        NodeKind::ALL
            .iter()
            .filter_map(|kind| self.types.get(kind))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

fn text_in_out() -> Vec<PortDefinition> {
    vec![
        PortDefinition::input("input", PortDataType::String),
        PortDefinition::output("output", PortDataType::String),
    ]
}

fn builtin_definitions() -> Vec<NodeTypeDefinition> {
    vec![
        NodeTypeDefinition {
            kind: NodeKind::TextInput,
            category: NodeCategory::Input,
            description: "Provides text input for the workflow".to_string(),
            ports: vec![
                PortDefinition::output("output", PortDataType::String).describe("The text output"),
            ],
            config_params: vec![
                ConfigParam::new("text", ParamKind::String)
                    .with_default(json!(""))
                    .describe("Default text value"),
            ],
        },
        NodeTypeDefinition {
            kind: NodeKind::ParameterInput,
            category: NodeCategory::Input,
            description: "Provides parameter input for the workflow".to_string(),
            ports: vec![
                PortDefinition::output("output", PortDataType::Any)
                    .describe("The parameter value"),
            ],
            config_params: vec![
                ConfigParam::new("param_name", ParamKind::String)
                    .required()
                    .with_default(json!(""))
                    .describe("Parameter name"),
                ConfigParam::new("param_type", ParamKind::Select)
                    .required()
                    .with_default(json!("string"))
                    .with_options(&["string", "number", "boolean"])
                    .describe("Parameter type"),
                ConfigParam::new("default_value", ParamKind::String)
                    .with_default(json!(""))
                    .describe("Default value"),
            ],
        },
        NodeTypeDefinition {
            kind: NodeKind::OpenaiCompletion,
            category: NodeCategory::Ai,
            description: "Generate text using OpenAI".to_string(),
            ports: text_in_out(),
            config_params: vec![
                ConfigParam::new("model", ParamKind::String)
                    .required()
                    .with_default(json!("gpt-3.5-turbo"))
                    .describe("Model name"),
                ConfigParam::new("max_tokens", ParamKind::Number)
                    .with_default(json!(100))
                    .describe("Maximum tokens"),
                ConfigParam::new("temperature", ParamKind::Number)
                    .with_default(json!(0.7))
                    .describe("Temperature"),
            ],
        },
        NodeTypeDefinition {
            kind: NodeKind::OpenaiTts,
            category: NodeCategory::Ai,
            description: "Convert text to speech".to_string(),
            ports: text_in_out(),
            config_params: vec![
                ConfigParam::new("voice", ParamKind::String)
                    .required()
                    .with_default(json!("en"))
                    .describe("Voice or language code"),
            ],
        },
        NodeTypeDefinition {
            kind: NodeKind::HuggingfaceSummarization,
            category: NodeCategory::Ai,
            description: "Summarize text".to_string(),
            ports: text_in_out(),
            config_params: vec![
                ConfigParam::new("max_length", ParamKind::Number)
                    .with_default(json!(130))
                    .describe("Maximum summary length in tokens"),
            ],
        },
        NodeTypeDefinition {
            kind: NodeKind::TextTransformation,
            category: NodeCategory::Processing,
            description: "Transform text with various operations".to_string(),
            ports: text_in_out(),
            config_params: vec![
                ConfigParam::new("operation", ParamKind::Select)
                    .required()
                    .with_default(json!("to_uppercase"))
                    .with_options(&["to_uppercase", "to_lowercase", "trim", "replace"])
                    .describe("Operation to perform"),
                ConfigParam::new("find", ParamKind::String).describe("Text to replace"),
                ConfigParam::new("replace_with", ParamKind::String)
                    .with_default(json!(""))
                    .describe("Replacement text"),
            ],
        },
        NodeTypeDefinition {
            kind: NodeKind::TextOutput,
            category: NodeCategory::Output,
            description: "Display text output".to_string(),
            ports: vec![
                PortDefinition::input("input", PortDataType::String).describe("Text to display"),
            ],
            config_params: vec![],
        },
    ]
}
