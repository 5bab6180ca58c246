//! Error types shared across the engine
//!
//! Typed errors live at the seams where callers need to inspect them
//! (retry classification, alerting, attribution to a resource). Everything
//! else travels as `anyhow::Error` and is recovered with `downcast_ref`.

use crate::terraform::diagnostics::Diagnostics;

/// Errors produced by the parallel runner itself rather than by a task.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("a runner task panicked: {0}")]
    TaskPanicked(String),
    #[error("runner was cancelled")]
    Cancelled,
    #[error("interrupted")]
    Interrupted,
}

/// Failures talking to an external provider process.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The remote call itself failed (broken pipe, malformed reply, plugin exited).
    #[error("provider transport error: {0}")]
    Transport(String),
    /// The provider answered with at least one error diagnostic.
    #[error("{0}")]
    Diagnostics(Diagnostics),
    /// The provider returned a null state together with warnings.
    #[error("state returned by ReadResource is nil: {0}")]
    EmptyState(String),
    #[error("resource type {0} is not declared in the provider schema")]
    UnknownResourceType(String),
    #[error("unable to convert value: {0}")]
    Conversion(String),
    #[error("unable to install provider {name}: {reason}")]
    Install { name: String, reason: String },
    #[error("provider alias {0} has been closed")]
    Closed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ProviderError {
    /// Whether a failed remote call may succeed when issued again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::EmptyState(_))
    }
}

/// A detail read that failed, attributed to the resource it was reading.
#[derive(Debug, thiserror::Error)]
#[error("unable to read {resource_type}.{id}: {source}")]
pub struct ReadResourceError {
    pub resource_type: String,
    pub id: String,
    #[source]
    pub source: ProviderError,
}

impl ReadResourceError {
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>, source: ProviderError) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
            source,
        }
    }

    pub fn root_cause(&self) -> &ProviderError {
        &self.source
    }
}

/// An enumeration failure for one resource type.
///
/// `listed_type` is the type whose listing failed; it differs from
/// `resource_type` when a type is derived from another listing.
#[derive(Debug, thiserror::Error)]
#[error("error scanning {resource_type} (listing {listed_type}): {source}")]
pub struct ResourceScanningError {
    pub resource_type: String,
    pub listed_type: String,
    #[source]
    pub source: anyhow::Error,
}

impl ResourceScanningError {
    pub fn new(resource_type: impl Into<String>, listed_type: impl Into<String>, source: anyhow::Error) -> Self {
        Self {
            resource_type: resource_type.into(),
            listed_type: listed_type.into(),
            source,
        }
    }

    pub fn root_cause(&self) -> &anyhow::Error {
        &self.source
    }
}
