//! Reconfiguration gate.
//!
//! A gate is an atomic "reconfiguring" flag. Request handlers probe it and
//! answer 503 immediately instead of waiting; the writer closes it for the
//! duration of a listener swap or a ring rebuild. The flag never protects
//! data by itself: whatever is being rebuilt has its own lock or snapshot.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct Gate {
    closed: AtomicBool,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while no reconfiguration is in progress.
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// Close the gate until the returned guard is dropped.
    pub fn close(&self) -> GateGuard<'_> {
        self.closed.store(true, Ordering::Release);
        GateGuard { gate: self }
    }
}

/// Reopens its gate on drop.
#[derive(Debug)]
pub struct GateGuard<'a> {
    gate: &'a Gate,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.gate.closed.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_reopens_on_drop() {
        let gate = Gate::new();
        assert!(gate.is_open());

        let guard = gate.close();
        assert!(!gate.is_open());

        drop(guard);
        assert!(gate.is_open());
    }
}
