//! Set of providers used by one scan

use super::provider::TerraformProvider;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;

/// Providers by name, handed to whoever needs to read resources.
#[derive(Default)]
pub struct ProviderLibrary {
    providers: HashMap<String, Arc<TerraformProvider>>,
}

impl ProviderLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_provider(&mut self, provider: Arc<TerraformProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn provider(&self, name: &str) -> Option<Arc<TerraformProvider>> {
        self.providers.get(name).cloned()
    }

    /// Stop every provider process
    pub async fn cleanup(&self) {
        join_all(self.providers.values().map(|provider| provider.cleanup())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::progress::NoopProgress;
    use crate::resource::DriftIgnore;
    use crate::terraform::diagnostics::Diagnostics;
    use crate::terraform::plugin::{ProviderClient, ProviderLauncher, ReadResourceRequest, ReadResourceResponse};
    use crate::terraform::provider::TerraformProviderConfig;
    use crate::terraform::schema::ProviderSchema;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingClient {
        stops: AtomicUsize,
    }

    #[async_trait]
    impl ProviderClient for CountingClient {
        async fn get_schema(&self) -> Result<ProviderSchema, ProviderError> {
            Ok(ProviderSchema::default())
        }

        async fn configure(&self, _config: serde_json::Value) -> Result<Diagnostics, ProviderError> {
            Ok(Diagnostics::default())
        }

        async fn read_resource(&self, _request: ReadResourceRequest) -> Result<ReadResourceResponse, ProviderError> {
            Ok(ReadResourceResponse::default())
        }

        async fn stop(&self) -> Result<(), ProviderError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct SharedLauncher(Arc<CountingClient>);

    #[async_trait]
    impl ProviderLauncher for SharedLauncher {
        async fn launch(&self, _alias: &str) -> Result<Arc<dyn ProviderClient>, ProviderError> {
            Ok(self.0.clone())
        }
    }

    fn provider(name: &str, client: &Arc<CountingClient>) -> Arc<TerraformProvider> {
        let config = TerraformProviderConfig {
            name: name.to_string(),
            default_alias: "us-central1".into(),
            provider_config: Arc::new(|_alias: &str| serde_json::json!({})),
        };
        Arc::new(TerraformProvider::new(
            config,
            Arc::new(SharedLauncher(client.clone())),
            Arc::new(DriftIgnore::new()),
            Arc::new(NoopProgress),
        ))
    }

    #[tokio::test]
    async fn test_providers_are_found_by_name_and_all_cleaned_up() {
        let google = Arc::new(CountingClient::default());
        let beta = Arc::new(CountingClient::default());
        let mut library = ProviderLibrary::new();
        library.add_provider(provider("google", &google));
        library.add_provider(provider("google-beta", &beta));

        assert_eq!(library.provider("google").unwrap().name(), "google");
        assert!(library.provider("aws").is_none());

        library.provider("google").unwrap().init().await.unwrap();
        library.provider("google-beta").unwrap().init().await.unwrap();
        library.cleanup().await;
        library.cleanup().await;

        assert_eq!(google.stops.load(Ordering::SeqCst), 1);
        assert_eq!(beta.stops.load(Ordering::SeqCst), 1);
    }
}
