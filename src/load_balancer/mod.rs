//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Location matched → upstream name identified
//!     → upstream.rs (UpstreamRegistry resolves the name)
//!     → hash_ring.rs (client IP → backend address, clockwise lookup)
//!     → request forwarded
//!     → on failure: Upstream::record_failure
//!         → third failure evicts the address and rebuilds the ring
//! ```
//!
//! # Design Decisions
//! - Balancing key is the client IP, so clients stick to one backend while
//!   the ring is unchanged
//! - Consistent hashing instead of `hash % n`: an eviction only remaps the
//!   evicted backend's clients
//! - Rings are rebuilt wholesale; pools are small

pub mod hash_ring;
pub mod upstream;

pub use hash_ring::HashRing;
pub use upstream::{FailureOutcome, Upstream, UpstreamRegistry, FAILURE_THRESHOLD};
