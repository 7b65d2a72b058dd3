//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (parsing handles syntax)
//! - Check referential integrity (locations reference existing upstreams)
//! - Validate value ranges (ports, replica counts)
//! - Detect conflicting services and routes
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: &ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is handed to the engine

use std::collections::HashSet;

use axum::http::{HeaderName, HeaderValue};
use thiserror::Error;

use crate::config::schema::{LocationKindConfig, ProxyConfig};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("service port `{0}` is not a valid port number")]
    InvalidPort(String),

    #[error("port {0} is configured by more than one service")]
    DuplicatePort(String),

    #[error("location `{prefix}` on port {port} must start with '/'")]
    InvalidPrefix { port: String, prefix: String },

    #[error("location `{prefix}` is declared twice on port {port}")]
    DuplicatePrefix { port: String, prefix: String },

    #[error("load-balance location `{prefix}` on port {port} names no upstream")]
    MissingUpstream { port: String, prefix: String },

    #[error("location `{prefix}` on port {port} references unknown upstream `{upstream}`")]
    UnknownUpstream {
        port: String,
        prefix: String,
        upstream: String,
    },

    #[error("file-serve location `{prefix}` on port {port} has no file_root")]
    MissingFileRoot { port: String, prefix: String },

    #[error("upstream `{0}` has no addresses")]
    EmptyUpstream(String),

    #[error("upstream `{0}` needs at least one replica per address")]
    ZeroReplicas(String),

    #[error("upstream `{upstream}` has an invalid proxy_set_header `{key}`")]
    InvalidHeader { upstream: String, key: String },
}

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut ports = HashSet::new();

    for service in &config.services {
        let port = service.port.as_str();
        if port.parse::<u16>().is_err() {
            errors.push(ValidationError::InvalidPort(service.port.clone()));
        }
        if !ports.insert(port) {
            errors.push(ValidationError::DuplicatePort(service.port.clone()));
        }

        let mut prefixes = HashSet::new();
        for location in &service.locations {
            let prefix = location.path_prefix();
            if !prefix.starts_with('/') {
                errors.push(ValidationError::InvalidPrefix {
                    port: service.port.clone(),
                    prefix: prefix.to_string(),
                });
            }
            if !prefixes.insert(prefix) {
                errors.push(ValidationError::DuplicatePrefix {
                    port: service.port.clone(),
                    prefix: prefix.to_string(),
                });
            }

            match location.kind {
                LocationKindConfig::LoadBalance => match location.upstream.as_deref() {
                    None | Some("") => errors.push(ValidationError::MissingUpstream {
                        port: service.port.clone(),
                        prefix: prefix.to_string(),
                    }),
                    Some(name) if !config.upstreams.contains_key(name) => {
                        errors.push(ValidationError::UnknownUpstream {
                            port: service.port.clone(),
                            prefix: prefix.to_string(),
                            upstream: name.to_string(),
                        })
                    }
                    Some(_) => {}
                },
                LocationKindConfig::FileServe => {
                    if location.file_root.as_deref().map_or(true, str::is_empty) {
                        errors.push(ValidationError::MissingFileRoot {
                            port: service.port.clone(),
                            prefix: prefix.to_string(),
                        });
                    }
                }
            }
        }
    }

    for (name, upstream) in &config.upstreams {
        if upstream.addresses.is_empty() {
            errors.push(ValidationError::EmptyUpstream(name.clone()));
        }
        if upstream.replicas == 0 {
            errors.push(ValidationError::ZeroReplicas(name.clone()));
        }
        for header in &upstream.proxy_set_header {
            let valid = HeaderName::from_bytes(header.key.as_bytes()).is_ok()
                && HeaderValue::from_str(&header.value).is_ok();
            if !valid {
                errors.push(ValidationError::InvalidHeader {
                    upstream: name.clone(),
                    key: header.key.clone(),
                });
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
