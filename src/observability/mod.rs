//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON lines)
//!     → Prometheus scrape endpoint, when configured
//! ```
//!
//! # Design Decisions
//! - Request ID flows through every request log line
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
