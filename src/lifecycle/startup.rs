//! Startup barrier.
//!
//! # Responsibilities
//! - Hand one token to every listener task launched in a reconciliation cycle
//! - Let the engine block until every task reported its bind outcome
//!
//! # Design Decisions
//! - A task that dies without releasing its token still counts down (as `None`)
//! - Outcomes are returned in launch order, labelled, so the caller can pair
//!   them with what it launched

use futures_util::future::join_all;
use tokio::sync::oneshot;

pub struct StartupBarrier<T> {
    pending: Vec<(String, oneshot::Receiver<T>)>,
}

impl<T> StartupBarrier<T> {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    /// Register one more participant and return its token.
    pub fn token(&mut self, label: impl Into<String>) -> BarrierToken<T> {
        let (tx, rx) = oneshot::channel();
        self.pending.push((label.into(), rx));
        BarrierToken { tx }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Wait for every token to be released or dropped.
    pub async fn wait(self) -> Vec<(String, Option<T>)> {
        let (labels, receivers): (Vec<_>, Vec<_>) = self.pending.into_iter().unzip();
        let outcomes = join_all(receivers).await;
        labels
            .into_iter()
            .zip(outcomes.into_iter().map(Result::ok))
            .collect()
    }
}

impl<T> Default for StartupBarrier<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Held by a launched task until it knows whether it is live.
#[derive(Debug)]
pub struct BarrierToken<T> {
    tx: oneshot::Sender<T>,
}

impl<T> BarrierToken<T> {
    pub fn release(self, outcome: T) {
        // The engine only stops waiting by dropping the barrier.
        let _ = self.tx.send(outcome);
    }
}
