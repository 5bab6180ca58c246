//! Configuration Management
//!
//! Persistent settings for driftscan, read from
//! `<config_dir>/driftscan/config.json`. Command line flags take precedence.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_PARALLELISM: usize = crate::parallel::DEFAULT_PARALLELISM;
pub const DEFAULT_CACHE_SIZE: usize = 100;
pub const DEFAULT_REGION: &str = "us-central1";
pub const DEFAULT_IGNORE_FILE: &str = ".driftignore";

/// Provider plugin settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub name: String,
    pub version: String,
    /// Where provider binaries are installed
    pub plugins_dir: Option<PathBuf>,
    /// Base URL provider binaries are downloaded from
    pub registry_url: Option<String>,
    /// Use this binary instead of installing one
    pub path: Option<PathBuf>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            name: "google".to_string(),
            version: "3.78.0".to_string(),
            plugins_dir: None,
            registry_url: None,
            path: None,
        }
    }
}

impl ProviderSettings {
    /// Whether a provider binary can be obtained at all
    pub fn is_configured(&self) -> bool {
        self.path.is_some() || self.registry_url.is_some()
    }

    pub fn effective_plugins_dir(&self) -> PathBuf {
        self.plugins_dir.clone().unwrap_or_else(|| {
            Config::config_dir()
                .map(|dir| dir.join("plugins"))
                .unwrap_or_else(|| PathBuf::from(".driftscan/plugins"))
        })
    }
}

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub project_id: Option<String>,
    /// Default region, also the default provider alias
    pub region: Option<String>,
    /// Extra regions, each read through its own provider alias
    pub regions: Vec<String>,
    pub parallelism: usize,
    pub details_parallelism: usize,
    pub cache_size: usize,
    pub ignore_file: PathBuf,
    pub provider: ProviderSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_id: None,
            region: None,
            regions: Vec::new(),
            parallelism: DEFAULT_PARALLELISM,
            details_parallelism: DEFAULT_PARALLELISM,
            cache_size: DEFAULT_CACHE_SIZE,
            ignore_file: PathBuf::from(DEFAULT_IGNORE_FILE),
            provider: ProviderSettings::default(),
        }
    }
}

impl Config {
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("driftscan"))
    }

    /// Get the config file path
    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load configuration from disk
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content),
            Err(_) => Self::default(),
        }
    }

    /// Parse configuration, falling back to defaults when invalid
    pub fn parse(content: &str) -> Self {
        serde_json::from_str(content).unwrap_or_else(|e| {
            tracing::warn!("Ignoring invalid configuration: {}", e);
            Self::default()
        })
    }

    /// Get effective project (CLI > config > environment / gcloud default)
    pub fn effective_project(&self) -> String {
        self.project_id
            .clone()
            .filter(|p| crate::gcp::auth::validate_project_id(p))
            .or_else(crate::gcp::auth::get_default_project)
            .unwrap_or_default()
    }

    /// Get effective region (CLI > config > gcloud default)
    pub fn effective_region(&self) -> String {
        self.region
            .clone()
            .or_else(crate::gcp::auth::get_default_region)
            .unwrap_or_else(|| DEFAULT_REGION.to_string())
    }

    /// Default region first, then the extra regions, without duplicates
    pub fn all_regions(&self) -> Vec<String> {
        let mut regions = vec![self.effective_region()];
        for region in &self.regions {
            if !regions.contains(region) {
                regions.push(region.clone());
            }
        }
        regions
    }
}
