//! Resource enumeration across every registered enumerator

use super::error_handler::handle_resource_enumeration_error;
use super::Enumerator;
use crate::alerter::Alerter;
use crate::error::RunnerError;
use crate::parallel::{ListAggregator, ParallelRunner, StopHandle};
use crate::resource::{Filter, Resource};
use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct Scanner {
    enumerators: Vec<Arc<dyn Enumerator>>,
    aggregator: ListAggregator<Resource>,
    alerter: Arc<Alerter>,
    filter: Arc<dyn Filter>,
}

impl Scanner {
    pub fn new(
        enumerators: Vec<Arc<dyn Enumerator>>,
        alerter: Arc<Alerter>,
        filter: Arc<dyn Filter>,
        token: &CancellationToken,
        parallelism: usize,
    ) -> Self {
        Self {
            enumerators,
            aggregator: ListAggregator::new(ParallelRunner::new(token, parallelism)),
            alerter,
            filter,
        }
    }

    /// Run every enumerator and return what they found, in arrival order.
    ///
    /// Access denials are turned into alerts; any other enumeration error
    /// fails the whole scan.
    pub async fn resources(&mut self) -> Result<Vec<Resource>> {
        for enumerator in std::mem::take(&mut self.enumerators) {
            let resource_type = enumerator.supported_type().to_string();
            if self.filter.is_type_ignored(&resource_type) {
                tracing::debug!(
                    resource_type = %resource_type,
                    "Ignored enumeration of resources since it is ignored in filter"
                );
                continue;
            }

            let alerter = self.alerter.clone();
            self.aggregator.push(async move {
                match enumerator.enumerate().await {
                    Ok(resources) => {
                        for resource in &resources {
                            tracing::debug!(
                                id = %resource.id,
                                resource_type = %resource.resource_type,
                                "Found cloud resource"
                            );
                        }
                        Ok(resources)
                    }
                    Err(err) => {
                        handle_resource_enumeration_error(err, &alerter)?;
                        Ok(Vec::new())
                    }
                }
            });
        }

        self.aggregator.resources().await
    }

    pub fn stop(&self) {
        self.stop_handle().stop();
    }

    /// Handle for stopping a scan from another task while [`Self::resources`] runs.
    pub fn stop_handle(&self) -> ScannerStopHandle {
        ScannerStopHandle(self.aggregator.stop_handle())
    }
}

/// Interrupts a running scan; the scan then fails with [`RunnerError::Interrupted`].
#[derive(Clone)]
pub struct ScannerStopHandle(StopHandle);

impl ScannerStopHandle {
    pub fn stop(&self) {
        tracing::debug!("Stopping scanner");
        self.0.stop(RunnerError::Interrupted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResourceScanningError;
    use crate::gcp::http::HttpStatusError;
    use crate::resource::{DriftIgnore, TypeFilter};
    use async_trait::async_trait;
    use std::time::Duration;

    struct StaticEnumerator {
        resource_type: &'static str,
        ids: Vec<&'static str>,
        status: Option<u16>,
    }

    #[async_trait]
    impl Enumerator for StaticEnumerator {
        fn supported_type(&self) -> &str {
            self.resource_type
        }

        async fn enumerate(&self) -> Result<Vec<Resource>> {
            if let Some(status) = self.status {
                let cause = HttpStatusError {
                    status,
                    body: "denied".into(),
                };
                return Err(ResourceScanningError::new(self.resource_type, self.resource_type, cause.into()).into());
            }
            Ok(self.ids.iter().map(|id| Resource::new(*id, self.resource_type)).collect())
        }
    }

    /// Never finishes on its own
    struct StuckEnumerator;

    #[async_trait]
    impl Enumerator for StuckEnumerator {
        fn supported_type(&self) -> &str {
            "google_compute_instance"
        }

        async fn enumerate(&self) -> Result<Vec<Resource>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }
    }

    fn enumerator(resource_type: &'static str, ids: Vec<&'static str>, status: Option<u16>) -> Arc<dyn Enumerator> {
        Arc::new(StaticEnumerator {
            resource_type,
            ids,
            status,
        })
    }

    fn sorted_ids(resources: &[Resource]) -> Vec<&str> {
        let mut ids: Vec<_> = resources.iter().map(|r| r.id.as_str()).collect();
        ids.sort();
        ids
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_collects_every_enumerator() {
        let mut scanner = Scanner::new(
            vec![
                enumerator("google_compute_network", vec!["n1", "n2"], None),
                enumerator("google_storage_bucket", vec!["b1"], None),
            ],
            Arc::new(Alerter::new()),
            Arc::new(DriftIgnore::new()),
            &CancellationToken::new(),
            2,
        );
        let resources = scanner.resources().await.unwrap();
        assert_eq!(sorted_ids(&resources), vec!["b1", "n1", "n2"]);
    }

    #[tokio::test]
    async fn test_access_denied_becomes_alert() {
        let alerter = Arc::new(Alerter::new());
        let mut scanner = Scanner::new(
            vec![
                enumerator("google_compute_network", vec!["n1"], None),
                enumerator("google_storage_bucket", vec![], Some(403)),
            ],
            alerter.clone(),
            Arc::new(DriftIgnore::new()),
            &CancellationToken::new(),
            4,
        );
        let resources = scanner.resources().await.unwrap();
        assert_eq!(sorted_ids(&resources), vec!["n1"]);
        assert!(alerter.alerts().contains_key("google_storage_bucket"));
    }

    #[tokio::test]
    async fn test_other_failures_abort_scan() {
        let mut scanner = Scanner::new(
            vec![
                enumerator("google_compute_network", vec!["n1"], None),
                enumerator("google_storage_bucket", vec![], Some(500)),
            ],
            Arc::new(Alerter::new()),
            Arc::new(DriftIgnore::new()),
            &CancellationToken::new(),
            4,
        );
        let err = scanner.resources().await.unwrap_err();
        assert!(err.downcast_ref::<ResourceScanningError>().is_some());
    }

    #[tokio::test]
    async fn test_ignored_types_are_not_enumerated() {
        let mut scanner = Scanner::new(
            vec![
                enumerator("google_compute_network", vec!["n1"], None),
                enumerator("google_storage_bucket", vec![], Some(500)),
            ],
            Arc::new(Alerter::new()),
            Arc::new(TypeFilter::new(["google_compute_network"])),
            &CancellationToken::new(),
            4,
        );
        let resources = scanner.resources().await.unwrap();
        assert_eq!(sorted_ids(&resources), vec!["n1"]);
    }

    #[tokio::test]
    async fn test_stop_interrupts_scan() {
        let mut scanner = Scanner::new(
            vec![enumerator("google_compute_network", vec!["n1"], None)],
            Arc::new(Alerter::new()),
            Arc::new(DriftIgnore::new()),
            &CancellationToken::new(),
            1,
        );
        scanner.stop();
        let err = scanner.resources().await.unwrap_err();
        assert!(matches!(err.downcast_ref::<RunnerError>(), Some(RunnerError::Interrupted)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_handle_interrupts_running_scan() {
        let mut scanner = Scanner::new(
            vec![
                enumerator("google_compute_network", vec!["n1"], None),
                Arc::new(StuckEnumerator),
            ],
            Arc::new(Alerter::new()),
            Arc::new(DriftIgnore::new()),
            &CancellationToken::new(),
            2,
        );
        let stop = scanner.stop_handle();
        let scan = tokio::spawn(async move { scanner.resources().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!scan.is_finished());
        stop.stop();

        let err = tokio::time::timeout(Duration::from_secs(5), scan)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<RunnerError>(), Some(RunnerError::Interrupted)));
    }
}
