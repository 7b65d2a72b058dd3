//! Reconciliation planning.
//!
//! Compares the fingerprints of live services with freshly loaded ones and
//! decides, per port, what the engine has to do. Planning is pure; the
//! engine applies the actions.

use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Port newly configured.
    Start(String),
    /// Port still configured but its locations changed.
    Replace(String),
    /// Port unchanged.
    Keep(String),
    /// Port no longer configured.
    Remove(String),
}

impl Action {
    pub fn port(&self) -> &str {
        match self {
            Action::Start(port) | Action::Replace(port) | Action::Keep(port) | Action::Remove(port) => port,
        }
    }
}

/// Actions for every configured port in port order, then removals in port order.
pub fn plan(live: &HashMap<String, u64>, pending: &BTreeMap<String, u64>) -> Vec<Action> {
    let mut actions: Vec<Action> = pending
        .iter()
        .map(|(port, fingerprint)| match live.get(port) {
            None => Action::Start(port.clone()),
            Some(current) if current != fingerprint => Action::Replace(port.clone()),
            Some(_) => Action::Keep(port.clone()),
        })
        .collect();

    let mut removed: Vec<&String> = live.keys().filter(|port| !pending.contains_key(*port)).collect();
    removed.sort();
    actions.extend(removed.into_iter().map(|port| Action::Remove(port.clone())));
    actions
}

/// What one start or reset did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub started: Vec<String>,
    pub replaced: Vec<String>,
    pub removed: Vec<String>,
    pub unchanged: Vec<String>,
    /// Replacements whose new bind failed and whose previous definition is serving again.
    pub restored: Vec<String>,
    /// Ports left without a listener, with the reason.
    pub failed: Vec<(String, String)>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.restored.is_empty()
    }
}
