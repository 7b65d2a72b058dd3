//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request path
//!     → router.rs (LocationTable lookup, longest prefix)
//!     → location.rs (LocationKind: LoadBalance or FileServe)
//!     → dispatcher handles the matched kind
//!
//! Table Compilation (per service, at load):
//!     LocationConfig[]
//!     → Location (with fingerprint)
//!     → Sort by prefix length
//!     → Freeze as immutable LocationTable
//! ```
//!
//! # Design Decisions
//! - Tables are compiled once per service instance, immutable at runtime
//! - Location kinds are a closed enum matched exhaustively
//! - Fingerprints let the engine detect unchanged services without deep comparison

pub mod location;
pub mod router;

pub use location::{location_fingerprint, service_fingerprint, Location, LocationKind};
pub use router::LocationTable;
