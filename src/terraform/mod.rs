//! Terraform provider plugins
//!
//! - [`value`] / [`schema`] - typed values and the schemas shaping them
//! - [`plugin`] - client and launcher traits, wire messages
//! - [`process`] - providers running as child processes
//! - [`installer`] - locating and downloading provider binaries
//! - [`provider`] - the per-alias bridge used to read resources
//! - [`library`] - providers available to a scan

pub mod diagnostics;
pub mod installer;
pub mod library;
pub mod plugin;
pub mod process;
pub mod provider;
pub mod retry;
pub mod schema;
pub mod value;

/// Flat attribute naming the provider alias a resource must be read with
pub const ALIAS_ATTRIBUTE: &str = "alias";

pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use installer::ProviderInstaller;
pub use library::ProviderLibrary;
pub use plugin::{ProviderClient, ProviderLauncher, ReadResourceRequest, ReadResourceResponse};
pub use process::{ProcessLauncher, ProcessProvider};
pub use provider::{AliasPhase, ReadResourceArgs, TerraformProvider, TerraformProviderConfig};
pub use retry::RetryPolicy;
pub use value::{Type, Value};
