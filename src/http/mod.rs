//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted TCP connection
//!     → server.rs (hyper HTTP/1.1 connection, ConnectInfo attached)
//!     → dispatch.rs (request id, gate probe, location lookup)
//!         → LoadBalance: request.rs (forward headers) → forward.rs (backend hop)
//!         → FileServe: tower-http ServeDir below the location's root
//!     → response.rs (hop-by-hop strip, configured extra headers)
//!     → Send to client
//! ```

pub mod dispatch;
pub mod forward;
pub mod request;
pub mod response;
pub mod server;

pub use dispatch::{build_router, ServiceState};
pub use forward::{ForwardError, Forwarder, SharedForwarder};
pub use request::{RequestIdExt, RequestUuid, X_REQUEST_ID};
pub use server::{BindOutcome, Launch, ServiceContext, ServiceHandle, ServiceInfo, ServiceSpec};
