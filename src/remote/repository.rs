//! Google Cloud listing repository
//!
//! Several enumerators may need the same listing (a type and the types
//! derived from it). Listings are cached by URL and fetched single-flight,
//! so concurrent enumerators pay the API cost once.

use crate::cache::SingleFlightCache;
use crate::gcp::client::GcpClient;
use crate::resource::fetcher::fetch_all;
use crate::resource::ListDefinition;
use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;

pub type Listing = Arc<Vec<Value>>;

pub struct GoogleRepository {
    client: GcpClient,
    cache: Arc<SingleFlightCache<Listing>>,
}

impl GoogleRepository {
    pub fn new(client: GcpClient, cache: Arc<SingleFlightCache<Listing>>) -> Self {
        Self { client, cache }
    }

    pub fn project_id(&self) -> &str {
        &self.client.project_id
    }

    /// Every item of a listing, across pages
    pub async fn list(&self, definition: &ListDefinition, region: Option<&str>) -> Result<Listing> {
        let url = self.client.service_url(&definition.service, &definition.path, region)?;

        self.cache
            .get_or_try_fetch(&url, || async {
                let items = fetch_all(&self.client, &url, definition).await?;
                tracing::debug!(count = items.len(), "Listed {}", definition.display_name);
                Ok::<_, anyhow::Error>(Arc::new(items))
            })
            .await
    }
}
