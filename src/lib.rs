//! driftscan - live-state resource acquisition for drift detection
//!
//! Lists cloud resources from Google Cloud REST APIs, then reads their full
//! state through Terraform provider plugins.
//!
//! - [`cache`] - single-flight LRU cache shared by repositories
//! - [`parallel`] - bounded fan-out runner and its aggregators
//! - [`terraform`] - provider plugins and the per-alias read bridge
//! - [`remote`] - enumerators, scanner and details fetching
//! - [`gcp`] / [`resource`] - REST client, list definitions, resource model

pub mod alerter;
pub mod cache;
pub mod config;
pub mod error;
pub mod gcp;
pub mod parallel;
pub mod progress;
pub mod remote;
pub mod resource;
pub mod signals;
pub mod terraform;

pub use cache::SingleFlightCache;
pub use error::{ProviderError, ReadResourceError, ResourceScanningError, RunnerError};
pub use parallel::{ListAggregator, ParallelRunner, ValueAggregator};
pub use resource::Resource;
