//! Enumerators backed by the Google listing definitions

use super::repository::GoogleRepository;
use super::Enumerator;
use crate::error::ResourceScanningError;
use crate::resource::fetcher::to_resource;
use crate::resource::{get_definition, ListDefinition, ListScope, Resource};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Lists one resource type, in one region for regional types.
pub struct GoogleEnumerator {
    resource_type: String,
    definition: &'static ListDefinition,
    repository: Arc<GoogleRepository>,
    region: Option<String>,
}

impl GoogleEnumerator {
    pub fn new(
        resource_type: impl Into<String>,
        definition: &'static ListDefinition,
        repository: Arc<GoogleRepository>,
        region: Option<String>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            definition,
            repository,
            region,
        }
    }

    /// Enumerators for `resource_type`: one, or one per region for regional types
    pub fn for_type(
        resource_type: &str,
        repository: &Arc<GoogleRepository>,
        regions: &[String],
    ) -> Result<Vec<GoogleEnumerator>> {
        let definition =
            get_definition(resource_type).ok_or_else(|| anyhow!("Unsupported resource type: {}", resource_type))?;

        let enumerators = match definition.scope {
            ListScope::Regional => regions
                .iter()
                .map(|region| Self::new(resource_type, definition, repository.clone(), Some(region.clone())))
                .collect(),
            ListScope::Global | ListScope::Aggregated => {
                vec![Self::new(resource_type, definition, repository.clone(), None)]
            }
        };
        Ok(enumerators)
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }
}

#[async_trait]
impl Enumerator for GoogleEnumerator {
    fn supported_type(&self) -> &str {
        &self.resource_type
    }

    async fn enumerate(&self) -> Result<Vec<Resource>> {
        let items = self
            .repository
            .list(self.definition, self.region.as_deref())
            .await
            .map_err(|e| ResourceScanningError::new(&self.resource_type, &self.resource_type, e))?;

        let resources = items
            .iter()
            .filter_map(|item| to_resource(&self.resource_type, self.definition, item, self.region.as_deref()))
            .collect();
        Ok(resources)
    }
}
