//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (block format or TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable for one reconciliation cycle)
//!     → handed to the engine through a ConfigSource
//!
//! On reload signal (SIGHUP, or watcher.rs when --watch is set):
//!     engine asks its ConfigSource for a fresh ProxyConfig
//!     → any load error aborts the reload, last-good config keeps serving
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (parser/serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod source;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    ListenerConfig, LocationConfig, LocationKindConfig, ObservabilityConfig, ProxyConfig,
    ProxyHeader, Scheme, ServiceConfig, TimeoutConfig, UpstreamConfig,
};
pub use source::{ConfigSource, FileSource, MemorySource};
