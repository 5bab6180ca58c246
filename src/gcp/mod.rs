//! GCP API interaction module
//!
//! The list-API side of resource acquisition: authentication, the HTTP
//! client, and the client tying them to a project.
//!
//! - [`auth`] - token sources (Application Default Credentials, static tokens)
//! - [`client`] - project-scoped client and service endpoints
//! - [`http`] - HTTP GET with typed status errors
//!
//! # Example
//!
//! ```ignore
//! use driftscan::gcp::{auth, client::{Endpoints, GcpClient}};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let tokens = auth::default_token_source().await?;
//!     let client = GcpClient::new(tokens, "my-project", Endpoints::default())?;
//!     let url = client.service_url("compute", "projects/{project}/global/networks", None)?;
//!     let networks = client.get(&url).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod http;
