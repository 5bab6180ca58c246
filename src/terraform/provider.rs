//! Terraform provider bridge
//!
//! Turns "read resource X" into a provider `ReadResource` call. Providers
//! are started lazily, one per alias. An alias is a named configuration of
//! the same provider; for regional clouds the alias is the region code, so
//! resources from several regions can be read side by side.
//!
//! Each alias moves through `Uninitialized -> Starting -> Ready`, or to
//! `Failed` when launching or configuring it fails. A failed alias is
//! started again by the next read; other aliases are not affected.
//! [`TerraformProvider::cleanup`] stops every launched provider once.

use super::diagnostics::Diagnostics;
use super::plugin::{ProviderClient, ProviderLauncher, ReadResourceRequest};
use super::retry::RetryPolicy;
use super::schema::Schema;
use super::value::Value;
use super::ALIAS_ATTRIBUTE;
use crate::error::{ProviderError, ReadResourceError};
use crate::progress::ProgressCounter;
use crate::resource::Filter;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::oneshot;

/// Provider configuration for an alias, as plain JSON
pub type ProviderConfigFn = Arc<dyn Fn(&str) -> serde_json::Value + Send + Sync>;

#[derive(Clone)]
pub struct TerraformProviderConfig {
    pub name: String,
    pub default_alias: String,
    pub provider_config: ProviderConfigFn,
}

impl fmt::Debug for TerraformProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TerraformProviderConfig")
            .field("name", &self.name)
            .field("default_alias", &self.default_alias)
            .finish_non_exhaustive()
    }
}

/// A resource to read, with the flat attributes known from enumeration.
#[derive(Debug, Clone, Default)]
pub struct ReadResourceArgs {
    pub ty: String,
    pub id: String,
    pub attributes: HashMap<String, String>,
}

impl ReadResourceArgs {
    pub fn new(ty: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            ty: ty.into(),
            id: id.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attributes(mut self, attributes: HashMap<String, String>) -> Self {
        self.attributes = attributes;
        self
    }
}

/// Observable lifecycle of an alias
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AliasPhase {
    Uninitialized,
    Starting,
    Ready,
    Failed(String),
    Closed,
}

enum AliasState {
    Uninitialized,
    Ready(Arc<dyn ProviderClient>),
    Failed(String),
}

struct AliasSlot {
    // Held for the whole launch + configure sequence of this alias only
    state: tokio::sync::Mutex<AliasState>,
    // Readable without waiting on `state`
    phase: Mutex<AliasPhase>,
}

pub struct TerraformProvider {
    config: TerraformProviderConfig,
    launcher: Arc<dyn ProviderLauncher>,
    filter: Arc<dyn Filter>,
    progress: Arc<dyn ProgressCounter>,
    retry: RetryPolicy,
    aliases: Mutex<HashMap<String, Arc<AliasSlot>>>,
    // Every client ever launched, so cleanup reaches aliases still starting
    launched: Mutex<Vec<(String, Arc<dyn ProviderClient>)>>,
    schemas: OnceLock<HashMap<String, Schema>>,
    closed: AtomicBool,
}

impl TerraformProvider {
    pub fn new(
        config: TerraformProviderConfig,
        launcher: Arc<dyn ProviderLauncher>,
        filter: Arc<dyn Filter>,
        progress: Arc<dyn ProgressCounter>,
    ) -> Self {
        Self {
            config,
            launcher,
            filter,
            progress,
            retry: RetryPolicy::default(),
            aliases: Mutex::new(HashMap::new()),
            launched: Mutex::new(Vec::new()),
            schemas: OnceLock::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Start the default alias.
    ///
    /// An interrupt received meanwhile stops the providers already launched
    /// and exits the process, so no child process outlives us.
    pub async fn init(self: &Arc<Self>) -> Result<(), ProviderError> {
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let provider = Arc::clone(self);
        let watcher = tokio::spawn(async move {
            tokio::select! {
                signal = crate::signals::wait_for_shutdown_signal() => {
                    if let Err(e) = signal {
                        tracing::warn!("Unable to listen for interrupts: {}", e);
                        return;
                    }
                    tracing::warn!("Detected interrupt during provider configuration, cleanup ...");
                    provider.cleanup().await;
                    std::process::exit(1);
                }
                _ = stop_rx => {}
            }
        });

        let result = self.client(&self.config.default_alias).await.map(|_| ());

        let _ = stop_tx.send(());
        let _ = watcher.await;
        result
    }

    pub fn alias_phase(&self, alias: &str) -> AliasPhase {
        if self.closed.load(Ordering::SeqCst) {
            return AliasPhase::Closed;
        }
        match self.aliases.lock().get(alias) {
            Some(slot) => slot.phase.lock().clone(),
            None => AliasPhase::Uninitialized,
        }
    }

    fn slot(&self, alias: &str) -> Arc<AliasSlot> {
        self.aliases
            .lock()
            .entry(alias.to_string())
            .or_insert_with(|| {
                Arc::new(AliasSlot {
                    state: tokio::sync::Mutex::new(AliasState::Uninitialized),
                    phase: Mutex::new(AliasPhase::Uninitialized),
                })
            })
            .clone()
    }

    /// The configured client for `alias`, starting it on first use.
    async fn client(&self, alias: &str) -> Result<Arc<dyn ProviderClient>, ProviderError> {
        let slot = self.slot(alias);
        let mut state = slot.state.lock().await;

        if self.closed.load(Ordering::SeqCst) {
            return Err(ProviderError::Closed(alias.to_string()));
        }
        match &*state {
            AliasState::Ready(client) => return Ok(client.clone()),
            AliasState::Failed(reason) => {
                tracing::debug!(alias, reason = %reason, "Retrying failed provider alias");
            }
            AliasState::Uninitialized => {}
        }

        *slot.phase.lock() = AliasPhase::Starting;
        match self.start(alias).await {
            Ok(client) => {
                *state = AliasState::Ready(client.clone());
                *slot.phase.lock() = AliasPhase::Ready;
                Ok(client)
            }
            Err(err) => {
                tracing::debug!(alias, error = %err, "Provider alias failed to start");
                *state = AliasState::Failed(err.to_string());
                *slot.phase.lock() = AliasPhase::Failed(err.to_string());
                Err(err)
            }
        }
    }

    async fn start(&self, alias: &str) -> Result<Arc<dyn ProviderClient>, ProviderError> {
        tracing::debug!(alias, "Starting provider client");
        let client = self.launcher.launch(alias).await?;

        if !self.track(alias, &client) {
            stop_client(alias, client.as_ref()).await;
            return Err(ProviderError::Closed(alias.to_string()));
        }

        // A client cleanup already took is stopped by cleanup, not here
        if let Err(err) = self.configure(alias, client.as_ref()).await {
            if self.forget(&client) {
                stop_client(alias, client.as_ref()).await;
            }
            return Err(err);
        }
        if let Some(still_tracked) = self.forget_if_closed(&client) {
            if still_tracked {
                stop_client(alias, client.as_ref()).await;
            }
            return Err(ProviderError::Closed(alias.to_string()));
        }

        tracing::debug!(name = %self.config.name, alias, "Terraform provider initialized");
        Ok(client)
    }

    async fn configure(&self, alias: &str, client: &dyn ProviderClient) -> Result<(), ProviderError> {
        let schema = client.get_schema().await?;
        let config_type = schema.provider.block.implied_type();
        let _ = self.schemas.set(schema.resource_types);

        let config = Value::from_json(&(self.config.provider_config)(alias), &config_type)?;
        let diagnostics = client.configure(config.to_json()).await?;
        if diagnostics.has_errors() {
            return Err(ProviderError::Diagnostics(diagnostics));
        }
        for warning in diagnostics.warnings() {
            tracing::warn!(alias, "Provider configuration: {}", warning);
        }
        Ok(())
    }

    /// Record a launched client for cleanup. False once cleanup has started.
    fn track(&self, alias: &str, client: &Arc<dyn ProviderClient>) -> bool {
        let mut launched = self.launched.lock();
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        launched.push((alias.to_string(), client.clone()));
        true
    }

    /// Stop tracking `client`. False when cleanup took it first.
    fn forget(&self, client: &Arc<dyn ProviderClient>) -> bool {
        remove_launched(&mut self.launched.lock(), client)
    }

    /// [`Self::forget`], only once cleanup has started; `None` before that.
    fn forget_if_closed(&self, client: &Arc<dyn ProviderClient>) -> Option<bool> {
        let mut launched = self.launched.lock();
        if !self.closed.load(Ordering::SeqCst) {
            return None;
        }
        Some(remove_launched(&mut launched, client))
    }

    /// Read the live state of a resource.
    ///
    /// Returns `Ok(None)` when the resource is ignored, and
    /// `Ok(Some(Value::Null))` when the provider reports it no longer exists.
    pub async fn read_resource(&self, args: ReadResourceArgs) -> Result<Option<Value>, ReadResourceError> {
        let ReadResourceArgs { ty, id, attributes } = args;
        tracing::debug!(id = %id, resource_type = %ty, attrs = ?attributes, "Reading cloud resource");

        if self.filter.is_resource_ignored(&ty, &id) {
            tracing::debug!(id = %id, resource_type = %ty, "Resource is ignored in driftignore, skipping...");
            return Ok(None);
        }

        self.read(&ty, &id, attributes)
            .await
            .map(Some)
            .map_err(|source| ReadResourceError::new(ty, id, source))
    }

    async fn read(&self, ty: &str, id: &str, mut attributes: HashMap<String, String>) -> Result<Value, ProviderError> {
        let alias = match attributes.remove(ALIAS_ATTRIBUTE) {
            Some(alias) if !alias.is_empty() => alias,
            _ => self.config.default_alias.clone(),
        };

        let client = self.client(&alias).await?;

        let schema = self
            .schemas
            .get()
            .and_then(|schemas| schemas.get(ty))
            .ok_or_else(|| ProviderError::UnknownResourceType(ty.to_string()))?;
        let implied_type = schema.block.implied_type();

        attributes.insert("id".to_string(), id.to_string());
        let prior_state = Value::from_flatmap(&attributes, &implied_type)?;
        let request = ReadResourceRequest {
            type_name: ty.to_string(),
            current_state: prior_state.to_json(),
        };

        let new_state = self
            .retry
            .run(|attempt| {
                let client = client.clone();
                let request = request.clone();
                let alias = alias.clone();
                async move {
                    if attempt > 1 {
                        tracing::debug!(alias = %alias, attempt, "Reading resource again");
                    }
                    let response = client.read_resource(request).await?;
                    check_read_response(response.new_state, response.diagnostics)
                }
            })
            .await?;

        let new_state = Value::from_json(&new_state, &implied_type)?;
        self.progress.inc();
        Ok(new_state)
    }

    /// Stop every launched provider. Only the first call does anything.
    pub async fn cleanup(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let launched = std::mem::take(&mut *self.launched.lock());
        for (alias, client) in launched {
            tracing::debug!(alias = %alias, "Closing provider client");
            stop_client(&alias, client.as_ref()).await;
        }

        for slot in self.aliases.lock().values() {
            *slot.phase.lock() = AliasPhase::Closed;
        }
    }
}

fn remove_launched(launched: &mut Vec<(String, Arc<dyn ProviderClient>)>, client: &Arc<dyn ProviderClient>) -> bool {
    let before = launched.len();
    launched.retain(|(_, other)| !Arc::ptr_eq(other, client));
    launched.len() != before
}

async fn stop_client(alias: &str, client: &dyn ProviderClient) {
    if let Err(e) = client.stop().await {
        tracing::warn!(alias, "Unable to stop provider: {}", e);
    }
}

fn check_read_response(new_state: serde_json::Value, diagnostics: Diagnostics) -> Result<serde_json::Value, ProviderError> {
    if diagnostics.has_errors() {
        return Err(ProviderError::Diagnostics(diagnostics));
    }
    if new_state.is_null() && diagnostics.has_warnings() {
        return Err(ProviderError::EmptyState(diagnostics.to_string()));
    }
    Ok(new_state)
}
