//! Provider plugin processes
//!
//! A provider runs as a child process speaking newline-delimited JSON over
//! stdio. Each request line is `{"id": n, "method": "...", "params": ...}`
//! and the provider answers with `{"id": n, "result": ...}` or
//! `{"id": n, "error": "..."}`, in any order. Concurrent calls are matched
//! to their answers by id.

use super::diagnostics::Diagnostics;
use super::installer::ProviderInstaller;
use super::plugin::{ProviderClient, ProviderLauncher, ReadResourceRequest, ReadResourceResponse};
use super::schema::ProviderSchema;
use crate::error::ProviderError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// How long a stopped provider gets to exit before being killed
const STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct RpcRequest<'a> {
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    id: u64,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct GetSchemaResponse {
    #[serde(flatten)]
    schema: ProviderSchema,
    #[serde(default)]
    diagnostics: Diagnostics,
}

#[derive(Deserialize)]
struct ConfigureResponse {
    #[serde(default)]
    diagnostics: Diagnostics,
}

type Reply = Result<Value, ProviderError>;

#[derive(Default)]
struct Pending {
    closed: bool,
    waiters: HashMap<u64, oneshot::Sender<Reply>>,
}

/// A provider running as a child process.
pub struct ProcessProvider {
    alias: String,
    stdin: tokio::sync::Mutex<ChildStdin>,
    pending: Arc<Mutex<Pending>>,
    next_id: AtomicU64,
    child: tokio::sync::Mutex<Option<Child>>,
    reader: JoinHandle<()>,
}

impl ProcessProvider {
    /// Start the provider binary at `path`.
    pub async fn start(path: &Path, alias: &str) -> Result<Self, ProviderError> {
        Self::spawn(Command::new(path), alias)
    }

    /// Start a provider from a prepared command; stdio is taken over.
    pub fn spawn(mut command: Command, alias: &str) -> Result<Self, ProviderError> {
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let missing = |stream: &str| ProviderError::Transport(format!("provider {} is not piped", stream));
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        let alias = alias.to_string();
        let pending = Arc::new(Mutex::new(Pending::default()));
        let reader = tokio::spawn(read_replies(stdout, pending.clone(), alias.clone()));

        let stderr_alias = alias.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(alias = %stderr_alias, "provider: {}", line);
            }
        });

        tracing::debug!(alias = %alias, pid = ?child.id(), "Provider process started");

        Ok(Self {
            alias,
            stdin: tokio::sync::Mutex::new(stdin),
            pending,
            next_id: AtomicU64::new(0),
            child: tokio::sync::Mutex::new(Some(child)),
            reader,
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            if pending.closed {
                return Err(ProviderError::Transport(format!(
                    "provider {} is no longer running",
                    self.alias
                )));
            }
            pending.waiters.insert(id, tx);
        }

        let mut line = serde_json::to_vec(&RpcRequest { id, method, params })
            .map_err(|e| ProviderError::Transport(format!("unable to encode {} request: {}", method, e)))?;
        line.push(b'\n');

        let written = {
            let mut stdin = self.stdin.lock().await;
            match stdin.write_all(&line).await {
                Ok(()) => stdin.flush().await,
                Err(e) => Err(e),
            }
        };
        if let Err(e) = written {
            self.pending.lock().waiters.remove(&id);
            return Err(ProviderError::Transport(format!("unable to send {}: {}", method, e)));
        }

        rx.await.map_err(|_| {
            ProviderError::Transport(format!("provider {} exited before answering {}", self.alias, method))
        })?
    }
}

async fn read_replies(stdout: ChildStdout, pending: Arc<Mutex<Pending>>, alias: String) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(alias = %alias, "Unable to read provider output: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response: RpcResponse = match serde_json::from_str(&line) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(alias = %alias, "Ignoring malformed provider reply: {}", e);
                continue;
            }
        };

        let Some(waiter) = pending.lock().waiters.remove(&response.id) else {
            tracing::warn!(alias = %alias, id = response.id, "Reply for unknown request");
            continue;
        };
        let reply = match response.error {
            Some(error) => Err(ProviderError::Transport(error)),
            None => Ok(response.result),
        };
        let _ = waiter.send(reply);
    }

    let waiters = {
        let mut pending = pending.lock();
        pending.closed = true;
        std::mem::take(&mut pending.waiters)
    };
    for (_, waiter) in waiters {
        let _ = waiter.send(Err(ProviderError::Transport(format!(
            "provider {} exited",
            alias
        ))));
    }
    tracing::debug!(alias = %alias, "Provider output closed");
}

fn decode<T: serde::de::DeserializeOwned>(method: &str, value: Value) -> Result<T, ProviderError> {
    serde_json::from_value(value)
        .map_err(|e| ProviderError::Transport(format!("malformed {} reply: {}", method, e)))
}

#[async_trait]
impl ProviderClient for ProcessProvider {
    async fn get_schema(&self) -> Result<ProviderSchema, ProviderError> {
        let response: GetSchemaResponse = decode("GetSchema", self.call("GetSchema", Value::Null).await?)?;
        if response.diagnostics.has_errors() {
            return Err(ProviderError::Diagnostics(response.diagnostics));
        }
        Ok(response.schema)
    }

    async fn configure(&self, config: Value) -> Result<Diagnostics, ProviderError> {
        let params = serde_json::json!({ "config": config });
        let response: ConfigureResponse = decode("Configure", self.call("Configure", params).await?)?;
        Ok(response.diagnostics)
    }

    async fn read_resource(&self, request: ReadResourceRequest) -> Result<ReadResourceResponse, ProviderError> {
        let params = serde_json::to_value(&request)
            .map_err(|e| ProviderError::Transport(format!("unable to encode ReadResource request: {}", e)))?;
        decode("ReadResource", self.call("ReadResource", params).await?)
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };

        // The provider may exit without answering
        if let Err(e) = self.call("Stop", Value::Null).await {
            tracing::debug!(alias = %self.alias, "Stop call failed: {}", e);
        }

        match tokio::time::timeout(STOP_GRACE_PERIOD, child.wait()).await {
            Ok(Ok(status)) => tracing::debug!(alias = %self.alias, %status, "Provider exited"),
            Ok(Err(e)) => tracing::warn!(alias = %self.alias, "Unable to wait for provider: {}", e),
            Err(_) => {
                tracing::warn!(alias = %self.alias, "Provider did not exit, killing it");
                child.kill().await?;
            }
        }
        Ok(())
    }
}

impl Drop for ProcessProvider {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Launches provider processes from an installed binary.
pub struct ProcessLauncher {
    installer: Arc<ProviderInstaller>,
    name: String,
    version: String,
    /// Use this binary instead of the installer
    binary: Option<PathBuf>,
}

impl ProcessLauncher {
    pub fn new(installer: Arc<ProviderInstaller>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            installer,
            name: name.into(),
            version: version.into(),
            binary: None,
        }
    }

    pub fn with_binary(mut self, binary: Option<PathBuf>) -> Self {
        self.binary = binary;
        self
    }
}

#[async_trait]
impl ProviderLauncher for ProcessLauncher {
    async fn launch(&self, alias: &str) -> Result<Arc<dyn ProviderClient>, ProviderError> {
        let path = match &self.binary {
            Some(path) => path.clone(),
            None => self.installer.install(&self.name, &self.version).await?,
        };
        let provider = ProcessProvider::start(&path, alias).await?;
        Ok(Arc::new(provider))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    /// A provider answering every request with an empty schema
    const ECHO_PROVIDER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed 's/^{"id":\([0-9]*\).*/\1/')
  case "$line" in
    *'"method":"Stop"'*) printf '{"id":%s,"result":null}\n' "$id"; exit 0 ;;
    *) printf '{"id":%s,"result":{"provider":{"block":{}},"resource_types":{}}}\n' "$id" ;;
  esac
done
"#;

    fn script(body: &str) -> (tempfile::TempDir, Command) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("provider.sh");
        std::fs::write(&path, body).unwrap();
        let mut command = Command::new("sh");
        command.arg(path);
        (dir, command)
    }

    #[tokio::test]
    async fn test_schema_roundtrip_and_stop() {
        let (_dir, command) = script(ECHO_PROVIDER);
        let provider = ProcessProvider::spawn(command, "default").unwrap();

        let schema = provider.get_schema().await.unwrap();
        assert!(schema.resource_types.is_empty());

        provider.stop().await.unwrap();
        provider.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_exited_provider_fails_calls() {
        let (_dir, command) = script("exit 0\n");
        let provider = ProcessProvider::spawn(command, "default").unwrap();

        let err = provider.get_schema().await.unwrap_err();
        assert!(err.is_retryable(), "transport failures are retryable: {}", err);
    }
}
