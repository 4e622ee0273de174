//! Host definition for the fleetexec inventory.
//!
//! A `Host` is a resolved execution target: an address, an optional SSH
//! port, the tags the inventory service attached to it and the work group it
//! was resolved from. Hosts compare and hash by address and port only.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Addresses that run on the control node without SSH
const LOCAL_ADDRESSES: &[&str] = &["localhost", "127.0.0.1", "local"];

/// A resolved execution target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    /// FQDN or IP address
    pub address: String,

    /// SSH port, when not the configured default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Group-membership tags
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Work group this host was resolved from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl Host {
    /// Create a new host with the given address
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port: None,
            tags: Vec::new(),
            group: None,
        }
    }

    /// Set an explicit SSH port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the tag list
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Record the originating work group
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Display name, `address` or `address:port`
    pub fn name(&self) -> String {
        self.to_string()
    }

    /// Whether the host carries a tag
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Whether the host is the control node itself
    pub fn is_local(&self) -> bool {
        LOCAL_ADDRESSES.contains(&self.address.as_str())
    }

    /// Parse `host`, `host:port`, `[v6addr]:port` or a bare IPv6 address
    pub fn parse(input: &str) -> Result<Self, HostParseError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(HostParseError::EmptyInput);
        }

        if let Some(rest) = input.strip_prefix('[') {
            let (address, tail) = rest
                .split_once(']')
                .ok_or_else(|| HostParseError::InvalidAddress(input.to_string()))?;
            let host = Host::new(address);
            return match tail.strip_prefix(':') {
                Some(port) => Ok(host.with_port(parse_port(port)?)),
                None if tail.is_empty() => Ok(host),
                None => Err(HostParseError::InvalidAddress(input.to_string())),
            };
        }

        match input.split_once(':') {
            // More than one colon: an unbracketed IPv6 address
            Some((_, rest)) if rest.contains(':') => Ok(Host::new(input)),
            Some((address, port)) if !address.is_empty() => {
                Ok(Host::new(address).with_port(parse_port(port)?))
            }
            Some(_) => Err(HostParseError::InvalidAddress(input.to_string())),
            None => Ok(Host::new(input)),
        }
    }
}

fn parse_port(port: &str) -> Result<u16, HostParseError> {
    port.parse::<u16>()
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| HostParseError::InvalidPort(port.to_string()))
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.port == other.port
    }
}

impl Eq for Host {}

impl std::hash::Hash for Host {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.address.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) if self.address.contains(':') => write!(f, "[{}]:{}", self.address, port),
            Some(port) => write!(f, "{}:{}", self.address, port),
            None => f.write_str(&self.address),
        }
    }
}

/// Errors that can occur when parsing a host literal
#[derive(Debug, thiserror::Error)]
pub enum HostParseError {
    #[error("empty input")]
    EmptyInput,
    #[error("invalid port: {0}")]
    InvalidPort(String),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}
