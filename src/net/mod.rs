//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Service port
//!     → listener.rs (bind, accept loop, connection limits)
//!     → connection.rs (per-service tracking, connection ids)
//!     → hand off to the HTTP layer
//! ```
//!
//! # Design Decisions
//! - Bounded accept prevents resource exhaustion
//! - Each service instance owns its listener; closing the service releases the port

pub mod connection;
pub mod listener;

pub use connection::{ConnectionId, ConnectionTracker, OpenConnection};
pub use listener::{listen_address, ConnectionPermit, Listener, ListenerError};
