//! Open-connection bookkeeping for one service instance.
//!
//! The accept loop takes an [`OpenConnection`] for every accepted socket and
//! moves it into the connection task. Closing a service reads the count to
//! log how many connections it cut off.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Connection number within one service instance, for log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Default)]
struct Counters {
    open: AtomicUsize,
    issued: AtomicU64,
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    counters: Arc<Counters>,
}

impl ConnectionTracker {
    pub fn open_connection(&self) -> OpenConnection {
        self.counters.open.fetch_add(1, Ordering::AcqRel);
        let id = ConnectionId(self.counters.issued.fetch_add(1, Ordering::Relaxed) + 1);
        OpenConnection {
            counters: Arc::clone(&self.counters),
            id,
        }
    }

    /// Connections accepted and not yet finished.
    pub fn open(&self) -> usize {
        self.counters.open.load(Ordering::Acquire)
    }
}

/// Counts as open until dropped.
#[derive(Debug)]
pub struct OpenConnection {
    counters: Arc<Counters>,
    id: ConnectionId,
}

impl OpenConnection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for OpenConnection {
    fn drop(&mut self) {
        self.counters.open.fetch_sub(1, Ordering::AcqRel);
        tracing::trace!(connection_id = %self.id, "Connection finished");
    }
}
