//! Resource Fetcher
//!
//! Fetches listings from GCP APIs with pagination and turns listed items
//! into [`Resource`]s according to their [`ListDefinition`].

use super::registry::{ListDefinition, ListScope};
use super::Resource;
use crate::gcp::client::GcpClient;
use anyhow::Result;
use serde_json::Value;

/// Query parameter carrying the page token
const PAGE_TOKEN_PARAM: &str = "pageToken";

/// Result of one page fetch
pub struct PaginatedResult {
    pub items: Vec<Value>,
    pub next_token: Option<String>,
}

/// Fetch every page of a listing
pub async fn fetch_all(
    client: &GcpClient,
    url: &str,
    definition: &ListDefinition,
) -> Result<Vec<Value>> {
    let mut all_items = Vec::new();
    let mut page_token: Option<String> = None;

    loop {
        let result = fetch_page(client, url, definition, page_token.as_deref()).await?;
        all_items.extend(result.items);

        if result.next_token.is_none() {
            break;
        }
        page_token = result.next_token;
    }

    Ok(all_items)
}

/// Fetch one page of a listing
pub async fn fetch_page(
    client: &GcpClient,
    url: &str,
    definition: &ListDefinition,
    page_token: Option<&str>,
) -> Result<PaginatedResult> {
    let url = match page_token {
        Some(token) => {
            let separator = if url.contains('?') { '&' } else { '?' };
            format!("{}{}{}={}", url, separator, PAGE_TOKEN_PARAM, urlencoding::encode(token))
        }
        None => url.to_string(),
    };

    let response = client.get(&url).await?;
    let response = if definition.scope == ListScope::Aggregated {
        flatten_aggregated_response(response)
    } else {
        response
    };

    let items = extract_items(&response, &definition.response_path);
    let next_token = response
        .get("nextPageToken")
        .and_then(|v| v.as_str())
        .filter(|token| !token.is_empty())
        .map(|s| s.to_string());

    Ok(PaginatedResult { items, next_token })
}

/// Extract items from response using the response_path
fn extract_items(response: &Value, path: &str) -> Vec<Value> {
    if path.is_empty() {
        return response.as_array().cloned().unwrap_or_default();
    }

    let mut current = response;
    for part in path.split('.') {
        current = match current.get(part) {
            Some(v) => v,
            None => return vec![],
        };
    }

    current.as_array().cloned().unwrap_or_default()
}

/// Aggregated list responses group items by location:
/// `{"items": {"zones/a": {"instances": [...]}, "zones/b": {"warning": {...}}}}`
fn flatten_aggregated_response(response: Value) -> Value {
    let Some(items) = response.get("items").and_then(|v| v.as_object()) else {
        let mut flattened = serde_json::json!({ "items": [] });
        if let Some(token) = response.get("nextPageToken") {
            flattened["nextPageToken"] = token.clone();
        }
        return flattened;
    };

    let mut all_items: Vec<Value> = Vec::new();

    for location_data in items.values() {
        if let Some(obj) = location_data.as_object() {
            for (key, value) in obj {
                if key == "warning" {
                    continue;
                }
                if let Some(arr) = value.as_array() {
                    all_items.extend(arr.iter().cloned());
                }
            }
        }
    }

    let mut flattened = serde_json::json!({ "items": all_items });
    if let Some(token) = response.get("nextPageToken") {
        flattened["nextPageToken"] = token.clone();
    }
    flattened
}

/// Convert a listed item into a resource, or `None` when it has no id.
///
/// `alias` is recorded as the `alias` attribute so that detail reads go to
/// the provider configured for the same region.
pub fn to_resource(
    resource_type: &str,
    definition: &ListDefinition,
    item: &Value,
    alias: Option<&str>,
) -> Option<Resource> {
    let raw_id = extract_json_value(item, &definition.id_field)?;
    let id = trim_self_link(&raw_id);

    let mut resource = Resource::new(id, resource_type);
    for (name, source) in &definition.attributes {
        if let Some(value) = extract_json_value(item, source.path()) {
            let value = if source.short() {
                extract_short_name(&value)
            } else {
                value
            };
            resource.set_attribute(name, value);
        }
    }
    if let Some(alias) = alias {
        resource.set_attribute(crate::terraform::ALIAS_ATTRIBUTE, alias);
    }

    Some(resource)
}

/// `https://www.googleapis.com/compute/v1/projects/p/zones/z/instances/i`
/// becomes `projects/p/zones/z/instances/i`; other ids are kept as is.
fn trim_self_link(id: &str) -> String {
    if id.starts_with("https://") || id.starts_with("http://") {
        if let Some(index) = id.find("/projects/") {
            return id[index + 1..].to_string();
        }
    }
    id.to_string()
}

/// Extract short name from GCP resource URL
fn extract_short_name(url: &str) -> String {
    url.rsplit('/').next().unwrap_or(url).to_string()
}

/// Extract a scalar from JSON using a dot-notation path
pub fn extract_json_value(item: &Value, path: &str) -> Option<String> {
    let mut current = item;

    for part in path.split('.') {
        current = match part.parse::<usize>() {
            Ok(idx) => current.get(idx)?,
            Err(_) => current.get(part)?,
        };
    }

    match current {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
