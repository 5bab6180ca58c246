//! GCP Client
//!
//! Combines a token source, the HTTP client and the API endpoints used to
//! list resources for one project.

use super::auth::TokenSource;
use super::http::GcpHttpClient;
use anyhow::{anyhow, Result};
use serde_json::Value;
use std::sync::Arc;

/// Base URLs of the REST services the engine lists from.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub compute: String,
    pub storage: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            compute: "https://compute.googleapis.com/compute/v1".to_string(),
            storage: "https://storage.googleapis.com/storage/v1".to_string(),
        }
    }
}

impl Endpoints {
    /// Every service served from one base URL (used against mock servers).
    pub fn single(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            compute: format!("{}/compute/v1", base),
            storage: format!("{}/storage/v1", base),
        }
    }

    pub fn for_service(&self, service: &str) -> Result<&str> {
        match service {
            "compute" => Ok(&self.compute),
            "storage" => Ok(&self.storage),
            _ => Err(anyhow!("Unknown service: {}", service)),
        }
    }
}

/// Main GCP client
#[derive(Clone)]
pub struct GcpClient {
    tokens: Arc<dyn TokenSource>,
    http: GcpHttpClient,
    pub project_id: String,
    pub endpoints: Endpoints,
}

impl GcpClient {
    pub fn new(tokens: Arc<dyn TokenSource>, project_id: &str, endpoints: Endpoints) -> Result<Self> {
        Ok(Self {
            tokens,
            http: GcpHttpClient::new()?,
            project_id: project_id.to_string(),
            endpoints,
        })
    }

    /// Make a GET request to a GCP API
    pub async fn get(&self, url: &str) -> Result<Value> {
        let token = self.tokens.token().await?;
        self.http.get(url, &token).await
    }

    /// Build the URL of `path` on `service`, expanding `{project}` and `{region}`.
    pub fn service_url(&self, service: &str, path: &str, region: Option<&str>) -> Result<String> {
        let base = self.endpoints.for_service(service)?;
        let mut path = path.replace("{project}", &self.project_id);
        if path.contains("{region}") {
            let region = region.ok_or_else(|| anyhow!("Path {} needs a region", path))?;
            path = path.replace("{region}", region);
        }
        Ok(format!("{}/{}", base, path.trim_start_matches('/')))
    }
}
