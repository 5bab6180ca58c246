//! Provider plugin seams
//!
//! [`ProviderClient`] is one running provider instance; [`ProviderLauncher`]
//! starts one per alias. The bridge only speaks to these traits, so tests
//! can substitute in-memory fakes for real plugin processes.

use super::diagnostics::Diagnostics;
use super::schema::ProviderSchema;
use crate::error::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Wire request for `ReadResource`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadResourceRequest {
    pub type_name: String,
    /// Prior state, shaped by the resource schema
    pub current_state: serde_json::Value,
}

/// Wire response for `ReadResource`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadResourceResponse {
    /// `null` when the resource no longer exists
    #[serde(default)]
    pub new_state: serde_json::Value,
    #[serde(default)]
    pub diagnostics: Diagnostics,
}

#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn get_schema(&self) -> Result<ProviderSchema, ProviderError>;

    /// Configure the provider; returned diagnostics may carry errors.
    async fn configure(&self, config: serde_json::Value) -> Result<Diagnostics, ProviderError>;

    async fn read_resource(&self, request: ReadResourceRequest) -> Result<ReadResourceResponse, ProviderError>;

    /// Ask the provider to shut down. Implementations must tolerate repeated calls.
    async fn stop(&self) -> Result<(), ProviderError>;
}

#[async_trait]
pub trait ProviderLauncher: Send + Sync {
    /// Start a fresh provider instance for `alias`.
    async fn launch(&self, alias: &str) -> Result<Arc<dyn ProviderClient>, ProviderError>;
}
