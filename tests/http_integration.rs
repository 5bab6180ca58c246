//! Integration tests for the GCP listing side using wiremock
//!
//! These tests run the client, repository, enumerators and scanner against
//! mocked REST endpoints.

use driftscan::alerter::Alerter;
use driftscan::cache::SingleFlightCache;
use driftscan::gcp::auth::StaticToken;
use driftscan::gcp::client::{Endpoints, GcpClient};
use driftscan::gcp::http::HttpStatusError;
use driftscan::remote::{Enumerator, GoogleEnumerator, GoogleRepository, Scanner};
use driftscan::resource::{get_definition, DriftIgnore};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{bearer_token, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PROJECT: &str = "test-project";

fn client(server: &MockServer) -> GcpClient {
    GcpClient::new(
        Arc::new(StaticToken("test-token".into())),
        PROJECT,
        Endpoints::single(&server.uri()),
    )
    .expect("client builds")
}

fn repository(server: &MockServer, cache_size: usize) -> Arc<GoogleRepository> {
    Arc::new(GoogleRepository::new(
        client(server),
        Arc::new(SingleFlightCache::new(cache_size)),
    ))
}

fn network(name: &str) -> serde_json::Value {
    json!({
        "name": name,
        "selfLink": format!("https://www.googleapis.com/compute/v1/projects/{}/global/networks/{}", PROJECT, name)
    })
}

/// Test module for HTTP client integration tests
mod http_client_tests {
    use super::*;

    #[tokio::test]
    async fn test_get_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/compute/v1/projects/test-project/global/networks"))
            .and(bearer_token("test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [network("default")]})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        let url = client
            .service_url("compute", "projects/{project}/global/networks", None)
            .unwrap();
        let response = client.get(&url).await.unwrap();
        assert_eq!(response["items"][0]["name"], "default");
    }

    #[tokio::test]
    async fn test_403_is_typed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": {"code": 403, "message": "Required 'compute.networks.list' permission"}
            })))
            .mount(&server)
            .await;

        let client = client(&server);
        let url = client
            .service_url("compute", "projects/{project}/global/networks", None)
            .unwrap();
        let err = client.get(&url).await.unwrap_err();
        let status = err.downcast_ref::<HttpStatusError>().expect("typed status error");
        assert!(status.is_forbidden());
        assert!(status.body.contains("compute.networks.list"));
    }

    #[tokio::test]
    async fn test_empty_body_is_null() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let client = client(&server);
        let value = client.get(&format!("{}/anything", server.uri())).await.unwrap();
        assert!(value.is_null());
    }
}

mod repository_tests {
    use super::*;

    #[tokio::test]
    async fn test_list_follows_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/compute/v1/projects/test-project/global/networks"))
            .and(query_param_is_missing("pageToken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [network("a"), network("b")],
                "nextPageToken": "page-2"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/compute/v1/projects/test-project/global/networks"))
            .and(query_param("pageToken", "page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [network("c")]})))
            .expect(1)
            .mount(&server)
            .await;

        let repository = repository(&server, 10);
        let definition = get_definition("google_compute_network").unwrap();
        let items = repository.list(definition, None).await.unwrap();
        assert_eq!(items.len(), 3);
    }

    #[tokio::test]
    async fn test_aggregated_listing_is_flattened() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/compute/v1/projects/test-project/aggregated/instances"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": {
                    "zones/us-central1-a": {"instances": [{"name": "vm-1", "selfLink": "vm-1"}]},
                    "zones/us-central1-b": {"warning": {"code": "NO_RESULTS_ON_PAGE"}},
                    "zones/europe-west1-b": {"instances": [{"name": "vm-2", "selfLink": "vm-2"}]}
                }
            })))
            .mount(&server)
            .await;

        let repository = repository(&server, 10);
        let items = repository
            .list(get_definition("google_compute_instance").unwrap(), None)
            .await
            .unwrap();
        assert_eq!(items.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_lists_hit_the_api_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/compute/v1/projects/test-project/global/networks"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"items": [network("default")]}))
                    .set_delay(Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let repository = repository(&server, 10);
        let definition = get_definition("google_compute_network").unwrap();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let repository = repository.clone();
            handles.push(tokio::spawn(async move { repository.list(definition, None).await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_zero_capacity_cache_refetches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/compute/v1/projects/test-project/global/networks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
            .expect(2)
            .mount(&server)
            .await;

        let repository = repository(&server, 0);
        let definition = get_definition("google_compute_network").unwrap();
        repository.list(definition, None).await.unwrap();
        repository.list(definition, None).await.unwrap();
    }
}

mod scanner_tests {
    use super::*;

    #[tokio::test]
    async fn test_regional_enumerators_set_alias() {
        let server = MockServer::start().await;
        for region in ["us-east1", "europe-west1"] {
            Mock::given(method("GET"))
                .and(path(format!("/compute/v1/projects/test-project/regions/{}/subnetworks", region)))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "items": [{
                        "name": format!("subnet-{}", region),
                        "selfLink": format!("https://www.googleapis.com/compute/v1/projects/test-project/regions/{}/subnetworks/subnet", region),
                        "region": format!("https://www.googleapis.com/compute/v1/projects/test-project/regions/{}", region)
                    }]
                })))
                .mount(&server)
                .await;
        }

        let regions = vec!["us-east1".to_string(), "europe-west1".to_string()];
        let enumerators = GoogleEnumerator::for_type("google_compute_subnetwork", &repository(&server, 10), &regions).unwrap();
        assert_eq!(enumerators.len(), 2);

        for enumerator in &enumerators {
            let resources = enumerator.enumerate().await.unwrap();
            assert_eq!(resources.len(), 1);
            assert_eq!(resources[0].attribute("alias"), enumerator.region());
            assert_eq!(resources[0].attribute("region"), enumerator.region());
        }
    }

    #[tokio::test]
    async fn test_forbidden_listing_is_alerted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/compute/v1/projects/test-project/global/networks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [network("default")]})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/b"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let repository = repository(&server, 10);
        let mut enumerators: Vec<Arc<dyn Enumerator>> = Vec::new();
        for ty in ["google_compute_network", "google_storage_bucket"] {
            for enumerator in GoogleEnumerator::for_type(ty, &repository, &[]).unwrap() {
                enumerators.push(Arc::new(enumerator));
            }
        }

        let alerter = Arc::new(Alerter::new());
        let mut scanner = Scanner::new(
            enumerators,
            alerter.clone(),
            Arc::new(DriftIgnore::new()),
            &CancellationToken::new(),
            4,
        );
        let resources = scanner.resources().await.unwrap();

        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].id, "projects/test-project/global/networks/default");
        let alerts = alerter.alerts();
        assert!(alerts["google_storage_bucket"][0]
            .message
            .starts_with("Ignoring google_storage_bucket from drift calculation: Listing google_storage_bucket is forbidden"));
    }

    #[tokio::test]
    async fn test_server_error_fails_scan() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("backend error"))
            .mount(&server)
            .await;

        let enumerators: Vec<Arc<dyn Enumerator>> =
            GoogleEnumerator::for_type("google_compute_network", &repository(&server, 10), &[])
                .unwrap()
                .into_iter()
                .map(|e| Arc::new(e) as Arc<dyn Enumerator>)
                .collect();
        let mut scanner = Scanner::new(
            enumerators,
            Arc::new(Alerter::new()),
            Arc::new(DriftIgnore::new()),
            &CancellationToken::new(),
            4,
        );
        assert!(scanner.resources().await.is_err());
    }
}

mod installer_tests {
    use super::*;
    use driftscan::terraform::installer::{binary_name, platform};
    use driftscan::terraform::ProviderInstaller;

    #[tokio::test]
    async fn test_downloads_missing_provider() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!(
                "/google/3.78.0/{}/{}",
                platform(),
                binary_name("google", "3.78.0")
            )))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"#!/bin/sh\n".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let installer = ProviderInstaller::new(dir.path(), Some(server.uri())).unwrap();

        let path = installer.install("google", "3.78.0").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"#!/bin/sh\n");
        // Second install finds the binary on disk
        assert_eq!(installer.install("google", "3.78.0").await.unwrap(), path);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }

    #[tokio::test]
    async fn test_registry_404_is_install_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let installer = ProviderInstaller::new(dir.path(), Some(server.uri())).unwrap();
        let err = installer.install("google", "1.0.0").await.unwrap_err();
        assert!(err.to_string().contains("unable to install provider google"));
    }
}
