//! Resource model and list sources
//!
//! - [`registry`] - list definitions loaded from embedded JSON
//! - [`fetcher`] - paginated listing and item-to-resource conversion
//! - [`filter`] - ignore policies (`.driftignore`, type selection)
//!
//! Enumerated resources carry flat string attributes (what a listing API
//! returns). Once read through a provider, attributes hold the structured
//! state returned by the provider.

pub mod fetcher;
pub mod filter;
pub mod registry;

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

pub use filter::{DriftIgnore, Filter, FilterChain, TypeFilter};
pub use registry::{get_all_resource_types, get_definition, ListDefinition, ListScope};

/// A live cloud resource
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resource {
    pub id: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub attributes: Map<String, Value>,
}

impl Resource {
    pub fn new(id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            attributes: Map::new(),
        }
    }

    pub fn with_attributes(mut self, attributes: Map<String, Value>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn set_attribute(&mut self, name: &str, value: impl Into<String>) {
        self.attributes
            .insert(name.to_string(), Value::String(value.into()));
    }

    /// A string attribute, if present
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(|v| v.as_str())
    }

    /// String-valued attributes as a flat map, the shape providers read from
    pub fn flat_attributes(&self) -> HashMap<String, String> {
        self.attributes
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect()
    }
}

/// Group resources by type, keeping ids sorted within each type
pub fn group_by_type(resources: Vec<Resource>) -> BTreeMap<String, Vec<Resource>> {
    let mut grouped: BTreeMap<String, Vec<Resource>> = BTreeMap::new();
    for resource in resources {
        grouped
            .entry(resource.resource_type.clone())
            .or_default()
            .push(resource);
    }
    for resources in grouped.values_mut() {
        resources.sort_by(|a, b| a.id.cmp(&b.id));
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flat_attributes_skip_structured_values() {
        let mut resource = Resource::new("b", "google_storage_bucket");
        resource.set_attribute("name", "b");
        resource.attributes.insert("labels".into(), json!({"env": "prod"}));

        let flat = resource.flat_attributes();
        assert_eq!(flat.len(), 1);
        assert_eq!(flat["name"], "b");
    }

    #[test]
    fn test_group_by_type_sorts_ids() {
        let grouped = group_by_type(vec![
            Resource::new("z", "google_compute_network"),
            Resource::new("b", "google_storage_bucket"),
            Resource::new("a", "google_compute_network"),
        ]);
        assert_eq!(grouped.len(), 2);
        let ids: Vec<_> = grouped["google_compute_network"].iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "z"]);
    }

    #[test]
    fn test_serializes_type_field() {
        let value = serde_json::to_value(Resource::new("id", "google_compute_disk")).unwrap();
        assert_eq!(value["type"], "google_compute_disk");
        assert_eq!(value["id"], "id");
    }
}
