//! Resource Registry - Load list definitions from JSON
//!
//! Every enumerable resource type is described by a [`ListDefinition`]
//! loaded from embedded JSON, so new types need no code changes.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Embedded resource JSON files (compiled into the binary)
const RESOURCE_FILES: &[&str] = &[include_str!("../resources/google.json")];

/// How a listing is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListScope {
    /// One call for the whole project
    Global,
    /// One call per region; the region becomes the provider alias
    Regional,
    /// One call returning items grouped by zone or region
    Aggregated,
}

/// Where a flat attribute comes from in a listed item.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AttributeSource {
    Path(String),
    Detailed {
        path: String,
        /// Keep only the last URL segment (`.../zones/us-east1-b` -> `us-east1-b`)
        #[serde(default)]
        short: bool,
    },
}

impl AttributeSource {
    pub fn path(&self) -> &str {
        match self {
            Self::Path(path) => path,
            Self::Detailed { path, .. } => path,
        }
    }

    pub fn short(&self) -> bool {
        matches!(self, Self::Detailed { short: true, .. })
    }
}

/// Definition of one enumerable resource type
#[derive(Debug, Clone, Deserialize)]
pub struct ListDefinition {
    pub display_name: String,
    pub service: String,
    pub scope: ListScope,
    /// Path template relative to the service endpoint
    pub path: String,
    /// Dot-separated path to the item array in a response
    pub response_path: String,
    /// Field holding the resource id; self links are trimmed to `projects/...`
    pub id_field: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeSource>,
}

/// Root structure of resources/*.json
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceConfig {
    #[serde(default)]
    pub resources: BTreeMap<String, ListDefinition>,
}

/// Registry loaded from the embedded JSON
static REGISTRY: OnceLock<ResourceConfig> = OnceLock::new();

/// Get the resource registry (parsed from embedded JSON on first access)
pub fn get_registry() -> &'static ResourceConfig {
    REGISTRY.get_or_init(|| {
        let mut final_config = ResourceConfig {
            resources: BTreeMap::new(),
        };

        for content in RESOURCE_FILES {
            match serde_json::from_str::<ResourceConfig>(content) {
                Ok(partial) => final_config.resources.extend(partial.resources),
                Err(e) => tracing::error!("Failed to parse embedded resource JSON: {}", e),
            }
        }

        final_config
    })
}

/// Get a list definition by terraform resource type
pub fn get_definition(resource_type: &str) -> Option<&'static ListDefinition> {
    get_registry().resources.get(resource_type)
}

/// All known resource types, sorted
pub fn get_all_resource_types() -> Vec<&'static str> {
    get_registry()
        .resources
        .keys()
        .map(|s| s.as_str())
        .collect()
}
