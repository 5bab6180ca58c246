//! Remote side of a scan
//!
//! [`Enumerator`]s list resources of one type, the [`scanner::Scanner`]
//! runs them all, and the [`details::DetailsFetcher`] reads each listed
//! resource through its provider.

pub mod details;
pub mod enumerator;
pub mod error_handler;
pub mod repository;
pub mod scanner;

use crate::resource::Resource;
use async_trait::async_trait;

pub use details::DetailsFetcher;
pub use enumerator::GoogleEnumerator;
pub use error_handler::handle_resource_enumeration_error;
pub use repository::GoogleRepository;
pub use scanner::{Scanner, ScannerStopHandle};

/// Lists every resource of one type
#[async_trait]
pub trait Enumerator: Send + Sync {
    fn supported_type(&self) -> &str;

    async fn enumerate(&self) -> anyhow::Result<Vec<Resource>>;
}
