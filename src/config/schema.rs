//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits so the same structure can be read from TOML
//! or produced by the block-format parser in `loader.rs`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ProxyConfig {
    /// One entry per listening port.
    pub services: Vec<ServiceConfig>,

    /// Backend pools keyed by upstream name.
    pub upstreams: BTreeMap<String, UpstreamConfig>,

    /// Listener settings shared by every service.
    pub listener: ListenerConfig,

    /// Upstream timeouts.
    pub timeouts: TimeoutConfig,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,
}

/// A single HTTP listener and its routing rules.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Port to listen on, e.g. "8080".
    pub port: String,

    /// Routing rules, matched by longest path prefix.
    #[serde(default)]
    pub locations: Vec<LocationConfig>,
}

/// What a location does with a matching request.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LocationKindConfig {
    /// Forward to a backend picked from an upstream's hash ring.
    LoadBalance,
    /// Serve files from a local directory.
    FileServe,
}

impl LocationKindConfig {
    /// Numeric code used by the block format (`type=1` / `type=2`).
    pub fn code(self) -> u8 {
        match self {
            LocationKindConfig::LoadBalance => 1,
            LocationKindConfig::FileServe => 2,
        }
    }
}

impl FromStr for LocationKindConfig {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1" | "load_balance" | "loadbalance" => Ok(LocationKindConfig::LoadBalance),
            "2" | "file_serve" | "fileserve" => Ok(LocationKindConfig::FileServe),
            other => Err(format!("unknown location type `{}`", other)),
        }
    }
}

/// Routing rule within a service.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct LocationConfig {
    #[serde(rename = "type")]
    pub kind: LocationKindConfig,

    /// Path prefix. Defaults to "/".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,

    /// Upstream name, for load-balance locations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<String>,

    /// Directory to serve, for file-serve locations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_root: Option<String>,
}

impl LocationConfig {
    /// Path prefix with the "/" default applied.
    pub fn path_prefix(&self) -> &str {
        match self.root.as_deref() {
            Some(root) if !root.is_empty() => root,
            _ => "/",
        }
    }
}

/// Scheme used to reach the backends of an upstream.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            other => Err(format!("unsupported scheme `{}`", other)),
        }
    }
}

/// A named pool of backend addresses.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct UpstreamConfig {
    /// Backend addresses (e.g., "127.0.0.1:3000").
    #[serde(alias = "addr")]
    pub addresses: Vec<String>,

    #[serde(default, alias = "schema")]
    pub scheme: Scheme,

    /// Virtual nodes per address on the hash ring.
    #[serde(default = "default_replicas")]
    pub replicas: u32,

    /// Headers appended to every proxied response.
    #[serde(default)]
    pub proxy_set_header: Vec<ProxyHeader>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            addresses: Vec::new(),
            scheme: Scheme::Http,
            replicas: default_replicas(),
            proxy_set_header: Vec::new(),
        }
    }
}

fn default_replicas() -> u32 {
    1
}

/// Extra response header configured on an upstream.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ProxyHeader {
    pub key: String,
    pub value: String,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Interface each service binds on.
    pub bind_host: String,

    /// Maximum concurrent connections per service (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Timeout configuration for upstream requests.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Total time allowed for an upstream request/response, 0 to disable.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Log file, rotated daily. Stdout only when unset.
    pub log_file: Option<String>,

    /// Rotated log files kept, oldest deleted first.
    pub log_max_files: usize,

    /// Prometheus endpoint bind address; no exporter when unset.
    pub metrics_address: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            log_file: Some("logs/system.log".to_string()),
            log_max_files: 7,
            metrics_address: None,
        }
    }
}
