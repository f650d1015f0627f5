//! Model descriptor registry.
//!
//! Maps logical model names to the backend that serves them. Loaded once
//! from YAML; read-only afterwards.
//!
//! ```yaml
//! _model_templates:
//!   claude_base: &claude_base
//!     backend: anthropic
//!     provider: anthropic
//!     capabilities: [text, vision, tools]
//!
//! claude-sonnet:
//!   <<: *claude_base
//!   model_name: claude-sonnet-4-5
//!   context_window: 200000
//!   cost: { input_per_million_tokens: 3.0, output_per_million_tokens: 15.0 }
//! ```
//!
//! Top-level keys starting with `_` hold YAML anchors and are skipped. Merge
//! keys (`<<`) are resolved at load time, so every descriptor is flat.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised while loading the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The registry file could not be read.
    #[error("Failed to read model registry '{path}': {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The YAML was malformed or a record had the wrong shape.
    #[error("Failed to parse model registry: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A specific record failed to deserialize.
    #[error("Invalid descriptor for model '{model}': {source}")]
    Descriptor {
        /// Logical model name.
        model: String,
        /// Underlying error.
        #[source]
        source: serde_yaml::Error,
    },

    /// The document was structurally wrong.
    #[error("Invalid model registry: {0}")]
    Invalid(String),
}

/// What a model can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Text in, text out.
    Text,
    /// Image input.
    Vision,
    /// Tool / function calling.
    Tools,
    /// Audio input or output.
    Audio,
    /// Video input.
    Video,
    /// Any tag not listed above.
    #[serde(other)]
    Other,
}

/// Informational pricing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelCost {
    /// USD per million input tokens.
    pub input_per_million_tokens: f64,
    /// USD per million output tokens.
    pub output_per_million_tokens: f64,
}

/// Registry entry for one logical model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelDescriptor {
    /// Logical model name, unique within the registry.
    pub name: String,
    /// Backend that serves this model.
    pub backend: String,
    /// Provider label (informational).
    pub provider: Option<String>,
    /// Identifier sent to the backend.
    pub model_name: String,
    /// Context window in tokens (informational).
    pub context_window: Option<u32>,
    /// Pricing (informational).
    pub cost: Option<ModelCost>,
    /// Capability tags.
    pub capabilities: Vec<Capability>,
    /// Free-form notes.
    pub notes: Option<String>,
}

impl ModelDescriptor {
    /// Creates a descriptor whose provider-side identifier equals its name.
    #[must_use]
    pub fn new(name: impl Into<String>, backend: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            model_name: name.clone(),
            name,
            backend: backend.into(),
            provider: None,
            context_window: None,
            cost: None,
            capabilities: vec![Capability::Text],
            notes: None,
        }
    }

    /// Sets the identifier sent to the backend.
    #[must_use]
    pub fn with_model_name(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = model_name.into();
        self
    }

    /// Sets the provider label.
    #[must_use]
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }
}

/// On-disk record shape; the name comes from the mapping key.
#[derive(Debug, Deserialize)]
struct DescriptorRecord {
    #[serde(alias = "adapter_service")]
    backend: String,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default, alias = "model_name_direct")]
    model_name: Option<String>,
    #[serde(default)]
    context_window: Option<u32>,
    #[serde(default)]
    cost: Option<ModelCost>,
    #[serde(default)]
    capabilities: Vec<Capability>,
    #[serde(default)]
    notes: Option<String>,
}

impl DescriptorRecord {
    fn into_descriptor(self, name: String) -> ModelDescriptor {
        ModelDescriptor {
            model_name: self.model_name.unwrap_or_else(|| name.clone()),
            name,
            backend: self.backend,
            provider: self.provider,
            context_window: self.context_window,
            cost: self.cost,
            capabilities: self.capabilities,
            notes: self.notes,
        }
    }
}

/// Immutable lookup from logical model name to descriptor.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    descriptors: BTreeMap<String, ModelDescriptor>,
}

impl ModelRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a descriptor, replacing any previous one with the same name.
    #[must_use]
    pub fn with_descriptor(mut self, descriptor: ModelDescriptor) -> Self {
        self.descriptors.insert(descriptor.name.clone(), descriptor);
        self
    }

    /// Loads the registry from a YAML file.
    ///
    /// # Errors
    /// Returns a `RegistryError` if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let content = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let registry = Self::from_yaml_str(&content)?;
        info!(path = %path.display(), models = registry.len(), "Loaded model registry");
        Ok(registry)
    }

    /// Parses the registry from YAML text.
    ///
    /// Accepts either a top-level mapping of model records or the same
    /// mapping nested under a `models` key.
    ///
    /// # Errors
    /// Returns a `RegistryError` if the YAML is malformed or a record is
    /// invalid.
    pub fn from_yaml_str(content: &str) -> Result<Self, RegistryError> {
        let mut document: Value = serde_yaml::from_str(content)?;
        document.apply_merge()?;

        let mut root = match document {
            Value::Mapping(map) => map,
            Value::Null => return Ok(Self::new()),
            _ => {
                return Err(RegistryError::Invalid(
                    "expected a mapping of model names to descriptors".to_string(),
                ));
            }
        };

        if let Some(Value::Mapping(nested)) = root.remove("models") {
            root = nested;
        }

        let mut registry = Self::new();
        for (key, value) in root {
            let Value::String(name) = key else {
                return Err(RegistryError::Invalid(format!("model name must be a string: {key:?}")));
            };
            if name.starts_with('_') {
                debug!(key = %name, "Skipping template key in model registry");
                continue;
            }
            let record: DescriptorRecord = serde_yaml::from_value(value)
                .map_err(|source| RegistryError::Descriptor { model: name.clone(), source })?;
            registry = registry.with_descriptor(record.into_descriptor(name));
        }
        Ok(registry)
    }

    /// Looks up a logical model name.
    pub fn get(&self, name: &str) -> Option<&ModelDescriptor> {
        self.descriptors.get(name)
    }

    /// Logical model names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.descriptors.keys().cloned().collect()
    }

    /// Every descriptor, sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.descriptors.values()
    }

    /// Distinct backend identifiers referenced by descriptors.
    pub fn backends(&self) -> BTreeSet<String> {
        self.descriptors.values().map(|d| d.backend.clone()).collect()
    }

    /// Number of descriptors.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
