//! Hot-reloading reverse proxy library.
//!
//! Services listen on configured ports and route requests by path prefix to
//! either a consistent-hash load balanced upstream or a static file root.
//! The [`Engine`] converges the live services onto freshly loaded
//! configuration, restarting only ports whose locations changed.

// Core subsystems
pub mod config;
pub mod engine;
pub mod http;
pub mod net;
pub mod routing;

// Traffic management
pub mod load_balancer;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::schema::ProxyConfig;
pub use engine::{Engine, EngineError, EngineState, ReconcileReport};
