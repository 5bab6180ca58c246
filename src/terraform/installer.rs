//! Provider binary installation
//!
//! Binaries live in a plugins directory as
//! `terraform-provider-<name>_v<version>`. Missing binaries are downloaded
//! from `{registry}/{name}/{version}/{os}_{arch}/<binary>` when a registry
//! is configured.

use crate::error::ProviderError;
use reqwest::Client;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

pub struct ProviderInstaller {
    plugins_dir: PathBuf,
    registry_url: Option<String>,
    client: Client,
    // One install at a time; concurrent aliases share the same binary
    lock: Mutex<()>,
}

/// `linux_amd64`, `darwin_arm64`, ...
pub fn platform() -> String {
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        other => other,
    };
    format!("{}_{}", std::env::consts::OS, arch)
}

pub fn binary_name(name: &str, version: &str) -> String {
    format!("terraform-provider-{}_v{}", name, version)
}

impl ProviderInstaller {
    pub fn new(plugins_dir: impl Into<PathBuf>, registry_url: Option<String>) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .user_agent(concat!("driftscan/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Transport(format!("unable to create HTTP client: {}", e)))?;

        Ok(Self {
            plugins_dir: plugins_dir.into(),
            registry_url: registry_url.map(|url| url.trim_end_matches('/').to_string()),
            client,
            lock: Mutex::new(()),
        })
    }

    pub fn plugins_dir(&self) -> &Path {
        &self.plugins_dir
    }

    pub fn binary_path(&self, name: &str, version: &str) -> PathBuf {
        self.plugins_dir.join(binary_name(name, version))
    }

    /// Path of an executable provider binary, downloading it if needed
    pub async fn install(&self, name: &str, version: &str) -> Result<PathBuf, ProviderError> {
        let _guard = self.lock.lock().await;

        let path = self.binary_path(name, version);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::debug!(path = %path.display(), "Found existing provider");
            return Ok(path);
        }

        let Some(registry) = &self.registry_url else {
            return Err(ProviderError::Install {
                name: name.to_string(),
                reason: format!("{} not found and no registry configured", path.display()),
            });
        };

        let url = format!(
            "{}/{}/{}/{}/{}",
            registry,
            name,
            version,
            platform(),
            binary_name(name, version)
        );
        tracing::info!(provider = name, version, "Downloading provider from {}", url);

        let install_error = |reason: String| ProviderError::Install {
            name: name.to_string(),
            reason,
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| install_error(format!("download failed: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(install_error(format!("registry answered {} for {}", status, url)));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| install_error(format!("download interrupted: {}", e)))?;

        tokio::fs::create_dir_all(&self.plugins_dir).await?;

        // Write atomically via temp file
        let temp_path = path.with_extension("tmp");
        tokio::fs::write(&temp_path, &bytes).await?;
        make_executable(&temp_path).await?;
        tokio::fs::rename(&temp_path, &path).await?;

        tracing::info!(path = %path.display(), "Provider installed");
        Ok(path)
    }
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await
}

#[cfg(not(unix))]
async fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
