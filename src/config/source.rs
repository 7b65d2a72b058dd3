//! Where the engine gets its configuration from.
//!
//! The engine re-reads its source on every reset, so a source must be able to
//! produce a fresh, validated [`ProxyConfig`] any number of times.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::config::loader::{load_config, normalize_config, ConfigError};
use crate::config::schema::ProxyConfig;
use crate::config::validation::validate_config;

/// Produces validated configuration on demand.
pub trait ConfigSource: Send + Sync {
    /// Load and validate the current configuration.
    fn load(&self) -> Result<ProxyConfig, ConfigError>;

    /// Human-readable origin, for logs.
    fn describe(&self) -> String;
}

/// Reads a config file from disk on every load.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl ConfigSource for FileSource {
    fn load(&self) -> Result<ProxyConfig, ConfigError> {
        load_config(&self.path)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory configuration that can be swapped between loads.
#[derive(Debug, Default)]
pub struct MemorySource {
    current: Mutex<ProxyConfig>,
}

impl MemorySource {
    pub fn new(config: ProxyConfig) -> Self {
        Self {
            current: Mutex::new(config),
        }
    }

    /// Replace the configuration returned by the next load.
    pub fn replace(&self, config: ProxyConfig) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = config;
    }
}

impl ConfigSource for MemorySource {
    fn load(&self) -> Result<ProxyConfig, ConfigError> {
        let mut config = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        normalize_config(&mut config);
        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }

    fn describe(&self) -> String {
        "in-memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ServiceConfig;

    #[test]
    fn memory_source_validates_on_load() {
        let source = MemorySource::new(ProxyConfig::default());
        assert!(source.load().is_ok());

        let mut bad = ProxyConfig::default();
        bad.services.push(ServiceConfig {
            port: "not-a-port".into(),
            locations: Vec::new(),
        });
        source.replace(bad);
        assert!(matches!(source.load(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn memory_source_trims_ports() {
        let mut config = ProxyConfig::default();
        config.services.push(ServiceConfig {
            port: "8080 ".into(),
            locations: Vec::new(),
        });
        let source = MemorySource::new(config);
        assert_eq!(source.load().unwrap().services[0].port, "8080");
    }
}
