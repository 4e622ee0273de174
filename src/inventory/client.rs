//! Inventory service client.
//!
//! The resolver only sees the [`InventoryClient`] trait. The HTTP
//! implementation talks to the work-group endpoint:
//!
//! ```text
//! GET {base_url}/api/v1/work_groups/{group}/hosts
//! {"data": [{"fqdn": "web1.example.com", "tags": ["eu"]}]}
//! ```
//!
//! A bare JSON array of the same objects is accepted too.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};
use url::Url;

use super::host::Host;
use crate::error::{Error, Result};

/// Default per-lookup network timeout
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Why a single work-group lookup failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    /// The service could not be reached
    #[error("request failed: {0}")]
    Http(String),

    /// The lookup took longer than the configured timeout
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The service answered with a non-success status
    #[error("service returned HTTP {0}")]
    Status(u16),

    /// The group does not exist
    #[error("work group not found")]
    NotFound,

    /// The body was not a host list
    #[error("invalid response: {0}")]
    Decode(String),
}

/// Source of work-group membership
#[async_trait]
pub trait InventoryClient: Send + Sync {
    /// Fetch the current host list of a work group
    async fn fetch(&self, group: &str) -> std::result::Result<Vec<Host>, LookupError>;
}

#[derive(Debug, Deserialize)]
struct HostRecord {
    fqdn: String,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HostsResponse {
    Wrapped { data: Vec<HostRecord> },
    Bare(Vec<HostRecord>),
}

impl HostsResponse {
    fn into_hosts(self) -> Vec<Host> {
        let records = match self {
            HostsResponse::Wrapped { data } => data,
            HostsResponse::Bare(records) => records,
        };
        records
            .into_iter()
            .filter(|r| !r.fqdn.trim().is_empty())
            .map(|r| {
                let host = Host::new(r.fqdn.trim()).with_tags(r.tags);
                match r.port {
                    Some(port) => host.with_port(port),
                    None => host,
                }
            })
            .collect()
    }
}

/// HTTP client for the inventory service
#[derive(Debug, Clone)]
pub struct HttpInventoryClient {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpInventoryClient {
    /// Create a client for the service at `base_url`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::config(format!("invalid inventory url '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::config(format!(
                "inventory url '{}' cannot be a base url",
                base_url
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("fleetexec/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    /// Endpoint for one group
    pub fn group_url(&self, group: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["api", "v1", "work_groups", group, "hosts"]);
        }
        url
    }
}

#[async_trait]
impl InventoryClient for HttpInventoryClient {
    async fn fetch(&self, group: &str) -> std::result::Result<Vec<Host>, LookupError> {
        let url = self.group_url(group);
        debug!(group = %group, url = %url, "Fetching work group");

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                LookupError::Timeout(self.timeout)
            } else {
                LookupError::Http(e.to_string())
            }
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(LookupError::NotFound);
        }
        if !status.is_success() {
            return Err(LookupError::Status(status.as_u16()));
        }

        let body: HostsResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                LookupError::Timeout(self.timeout)
            } else {
                LookupError::Decode(e.to_string())
            }
        })?;

        let hosts = body.into_hosts();
        trace!(group = %group, host_count = hosts.len(), "Fetched work group");
        Ok(hosts)
    }
}
