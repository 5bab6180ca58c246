//! Reading full resource state through the provider

use super::error_handler::is_access_denied;
use crate::alerter::{Alert, Alerter, ScanningPhase};
use crate::error::ProviderError;
use crate::parallel::{ParallelRunner, ValueAggregator};
use crate::resource::Resource;
use crate::terraform::{ReadResourceArgs, TerraformProvider, Value};
use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct DetailsFetcher {
    provider: Arc<TerraformProvider>,
    alerter: Arc<Alerter>,
    token: CancellationToken,
    parallelism: usize,
}

impl DetailsFetcher {
    pub fn new(
        provider: Arc<TerraformProvider>,
        alerter: Arc<Alerter>,
        token: &CancellationToken,
        parallelism: usize,
    ) -> Self {
        Self {
            provider,
            alerter,
            token: token.child_token(),
            parallelism,
        }
    }

    /// Replace the listed attributes of every resource with the state read
    /// from the provider.
    ///
    /// Ignored and vanished resources are dropped. Access denials are
    /// alerted and the resource dropped; other failures abort.
    pub async fn read_details(&self, resources: Vec<Resource>) -> Result<Vec<Resource>> {
        let mut aggregator = ValueAggregator::new(ParallelRunner::new(&self.token, self.parallelism));

        for resource in resources {
            let provider = self.provider.clone();
            let alerter = self.alerter.clone();
            aggregator.run(async move { read_one(&provider, &alerter, resource).await });
        }

        aggregator.wait().await
    }
}

async fn read_one(provider: &TerraformProvider, alerter: &Alerter, resource: Resource) -> Result<Option<Resource>> {
    let args = ReadResourceArgs::new(&resource.resource_type, &resource.id).with_attributes(resource.flat_attributes());

    let state = match provider.read_resource(args).await {
        Ok(Some(state)) => state,
        Ok(None) => return Ok(None),
        Err(err) if matches!(err.root_cause(), ProviderError::UnknownResourceType(_)) => {
            tracing::debug!(resource_type = %resource.resource_type, "No schema for type, keeping listed attributes");
            return Ok(Some(resource));
        }
        Err(err) => {
            let err = anyhow::Error::new(err);
            if !is_access_denied(&err) {
                return Err(err);
            }
            let name = format!("{}.{}", resource.resource_type, resource.id);
            alerter.send_alert(
                name.clone(),
                Alert::access_denied(
                    &name,
                    &resource.resource_type,
                    &err.root_cause().to_string(),
                    ScanningPhase::DetailsFetching,
                ),
            );
            return Ok(None);
        }
    };

    let attributes = match state {
        Value::Null => {
            tracing::debug!(id = %resource.id, resource_type = %resource.resource_type, "Resource vanished while reading it");
            return Ok(None);
        }
        state => match state.to_json() {
            serde_json::Value::Object(attributes) => attributes,
            other => {
                return Err(anyhow::anyhow!(
                    "unexpected state for {}.{}: {}",
                    resource.resource_type,
                    resource.id,
                    other
                ))
            }
        },
    };

    Ok(Some(resource.with_attributes(attributes)))
}
