//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Engine launches listener tasks → each binds → releases its barrier token
//!     → engine returns once every token is in
//!
//! Reconfiguration (gate.rs):
//!     Writer closes gate → handlers answer 503 → writer swaps → gate reopens
//!
//! Shutdown (shutdown.rs):
//!     Per-service broadcast → accept loop exits → in-flight connections aborted
//!
//! Signals (signals.rs, pidfile.rs):
//!     SIGTERM/SIGINT → Engine::stop
//!     SIGHUP → Engine::reset
//!     `reset` / `stop` commands signal the pid recorded in the pid file
//! ```

pub mod gate;
pub mod pidfile;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use gate::{Gate, GateGuard};
pub use pidfile::{PidFile, PidFileError};
pub use shutdown::Shutdown;
pub use signals::{send_signal, LifecycleEvent, SignalListener};
pub use startup::{BarrierToken, StartupBarrier};
