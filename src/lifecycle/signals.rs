//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGTERM, SIGINT, SIGHUP)
//! - Translate signals to lifecycle events
//! - Deliver those signals to an already-running instance
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - SIGHUP triggers config reload, not shutdown

use std::io;

use tokio::signal::unix::{signal, Signal, SignalKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Re-read configuration and reconcile listeners.
    Reload,
    /// Close every listener and exit.
    Shutdown,
}

impl LifecycleEvent {
    fn signal_number(self) -> libc::c_int {
        match self {
            LifecycleEvent::Reload => libc::SIGHUP,
            LifecycleEvent::Shutdown => libc::SIGTERM,
        }
    }
}

/// Process signal streams, installed once at startup.
pub struct SignalListener {
    hangup: Signal,
    terminate: Signal,
    interrupt: Signal,
}

impl SignalListener {
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            hangup: signal(SignalKind::hangup())?,
            terminate: signal(SignalKind::terminate())?,
            interrupt: signal(SignalKind::interrupt())?,
        })
    }

    /// Wait for the next lifecycle-relevant signal.
    pub async fn next(&mut self) -> LifecycleEvent {
        tokio::select! {
            received = self.hangup.recv() => match received {
                Some(()) => {
                    tracing::info!("SIGHUP received, reloading configuration");
                    LifecycleEvent::Reload
                }
                None => LifecycleEvent::Shutdown,
            },
            _ = self.terminate.recv() => {
                tracing::info!("SIGTERM received, shutting down");
                LifecycleEvent::Shutdown
            }
            _ = self.interrupt.recv() => {
                tracing::info!("SIGINT received, shutting down");
                LifecycleEvent::Shutdown
            }
        }
    }
}

/// Send the signal for `event` to process `pid`.
pub fn send_signal(pid: i32, event: LifecycleEvent) -> io::Result<()> {
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid, event.signal_number()) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}
