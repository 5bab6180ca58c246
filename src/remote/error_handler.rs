//! Classification of scanning failures
//!
//! Access denials only hide the affected resources: they become alerts.
//! Anything else aborts the scan.

use crate::alerter::{Alert, Alerter, ScanningPhase};
use crate::error::ResourceScanningError;
use crate::gcp::http::HttpStatusError;

/// Whether an error message reads like a permission failure
pub fn is_access_denied_message(message: &str) -> bool {
    if message.contains("AccessDenied") {
        return true;
    }
    // Google SDK errors surfacing through providers
    message.contains("googleapi") && message.contains("Error 403")
}

/// Whether `err` or anything in its source chain is an access denial
pub fn is_access_denied(err: &anyhow::Error) -> bool {
    let forbidden_status = err.chain().any(|cause| {
        cause
            .downcast_ref::<HttpStatusError>()
            .is_some_and(HttpStatusError::is_forbidden)
    });
    forbidden_status || err.chain().any(|cause| is_access_denied_message(&cause.to_string()))
}

/// Turn an access-denied enumeration failure into an alert.
///
/// Returns `Ok(())` when the error was handled, the error itself otherwise.
pub fn handle_resource_enumeration_error(err: anyhow::Error, alerter: &Alerter) -> anyhow::Result<()> {
    let Some(scanning_error) = err.downcast_ref::<ResourceScanningError>() else {
        return Err(err);
    };
    if !is_access_denied(scanning_error.root_cause()) {
        return Err(err);
    }

    tracing::debug!(
        resource = %scanning_error.resource_type,
        listed_type = %scanning_error.listed_type,
        "Got an access denied error: {:#}",
        err
    );
    alerter.send_alert(
        scanning_error.resource_type.clone(),
        Alert::access_denied(
            &scanning_error.resource_type,
            &scanning_error.listed_type,
            &scanning_error.root_cause().to_string(),
            ScanningPhase::Enumeration,
        ),
    );
    Ok(())
}
