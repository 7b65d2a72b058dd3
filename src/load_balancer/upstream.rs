//! Upstream pools and failure eviction.
//!
//! # Responsibilities
//! - Pick a backend for a client via the pool's hash ring
//! - Count failures per backend address
//! - Evict an address after `FAILURE_THRESHOLD` failures and rebuild the ring
//!
//! # Design Decisions
//! - Eviction is one-way; only a configuration reload brings an address back
//! - Successes never reset a counter
//! - The ring is published through `ArcSwap`, so a lookup always sees either
//!   the old or the new ring, never a half-built one
//! - The gate only signals "rebuild in progress"; the address list and
//!   counters are guarded by their own mutex

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use axum::http::{HeaderName, HeaderValue};

use crate::config::schema::{Scheme, UpstreamConfig};
use crate::lifecycle::Gate;
use crate::load_balancer::hash_ring::HashRing;

/// Failures after which a backend address is evicted.
pub const FAILURE_THRESHOLD: u32 = 3;

/// Result of reporting one failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// The address is no longer part of the pool.
    Ignored,
    /// Failure recorded; the value is the address's running count.
    Counted(u32),
    /// The address reached the threshold and was removed.
    Evicted,
}

#[derive(Debug)]
struct PoolState {
    addresses: Vec<String>,
    fail_counts: HashMap<String, u32>,
}

/// A named pool of backend addresses behind one hash ring.
#[derive(Debug)]
pub struct Upstream {
    name: String,
    scheme: Scheme,
    replicas: u32,
    proxy_headers: Vec<(HeaderName, HeaderValue)>,
    state: Mutex<PoolState>,
    ring: ArcSwap<HashRing>,
    gate: Gate,
}

impl Upstream {
    pub fn new(name: impl Into<String>, addresses: Vec<String>, scheme: Scheme, replicas: u32) -> Self {
        let ring = HashRing::build(&addresses, replicas);
        Self {
            name: name.into(),
            scheme,
            replicas,
            proxy_headers: Vec::new(),
            state: Mutex::new(PoolState {
                addresses,
                fail_counts: HashMap::new(),
            }),
            ring: ArcSwap::from_pointee(ring),
            gate: Gate::new(),
        }
    }

    /// Build from configuration. Headers that fail to parse are skipped with a warning.
    pub fn from_config(name: &str, config: &UpstreamConfig) -> Self {
        let mut upstream = Self::new(name, config.addresses.clone(), config.scheme, config.replicas);
        for header in &config.proxy_set_header {
            match (
                HeaderName::from_bytes(header.key.as_bytes()),
                HeaderValue::from_str(&header.value),
            ) {
                (Ok(key), Ok(value)) => upstream.proxy_headers.push((key, value)),
                _ => tracing::warn!(upstream = %name, header = %header.key, "Skipping invalid proxy_set_header"),
            }
        }
        upstream
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Headers appended to every proxied response.
    pub fn proxy_headers(&self) -> &[(HeaderName, HeaderValue)] {
        &self.proxy_headers
    }

    /// True while the ring is being rebuilt after an eviction.
    pub fn is_reconfiguring(&self) -> bool {
        !self.gate.is_open()
    }

    /// Backend address for `key` (the client IP).
    pub fn select(&self, key: &str) -> Option<String> {
        self.ring.load().lookup(key).map(str::to_owned)
    }

    /// Snapshot of the current ring.
    pub fn ring(&self) -> Arc<HashRing> {
        self.ring.load_full()
    }

    pub fn addresses(&self) -> Vec<String> {
        self.lock_state().addresses.clone()
    }

    pub fn failure_count(&self, address: &str) -> u32 {
        self.lock_state().fail_counts.get(address).copied().unwrap_or(0)
    }

    /// Record one failure for `address`, evicting it at the threshold.
    pub fn record_failure(&self, address: &str) -> FailureOutcome {
        let mut state = self.lock_state();
        if !state.addresses.iter().any(|a| a == address) {
            return FailureOutcome::Ignored;
        }

        let count = state.fail_counts.entry(address.to_string()).or_insert(0);
        *count += 1;
        let count = *count;
        if count < FAILURE_THRESHOLD {
            tracing::warn!(upstream = %self.name, backend = %address, failures = count, "Backend failure recorded");
            return FailureOutcome::Counted(count);
        }

        let _rebuilding = self.gate.close();
        state.fail_counts.remove(address);
        state.addresses.retain(|a| a != address);
        self.ring
            .store(Arc::new(HashRing::build(&state.addresses, self.replicas)));

        tracing::error!(
            upstream = %self.name,
            backend = %address,
            remaining = state.addresses.len(),
            "Backend evicted after repeated failures"
        );
        FailureOutcome::Evicted
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Upstreams by name, shared by every request handler.
///
/// Locations hold upstream names, not upstreams; handlers resolve the name on
/// every request, so installing a new map takes effect immediately.
#[derive(Debug, Clone, Default)]
pub struct UpstreamRegistry {
    inner: Arc<ArcSwap<HashMap<String, Arc<Upstream>>>>,
}

impl UpstreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one upstream (and its ring) per configured pool.
    pub fn build(configs: &BTreeMap<String, UpstreamConfig>) -> HashMap<String, Arc<Upstream>> {
        configs
            .iter()
            .map(|(name, config)| (name.clone(), Arc::new(Upstream::from_config(name, config))))
            .collect()
    }

    /// Atomically replace every upstream.
    pub fn install(&self, upstreams: HashMap<String, Arc<Upstream>>) {
        self.inner.store(Arc::new(upstreams));
    }

    pub fn get(&self, name: &str) -> Option<Arc<Upstream>> {
        self.inner.load().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.load().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ProxyHeader;

    fn pool() -> Upstream {
        Upstream::new(
            "web",
            vec!["10.0.0.1:80".into(), "10.0.0.2:80".into()],
            Scheme::Http,
            4,
        )
    }

    #[test]
    fn two_failures_do_not_evict() {
        let upstream = pool();
        assert_eq!(upstream.record_failure("10.0.0.1:80"), FailureOutcome::Counted(1));
        assert_eq!(upstream.record_failure("10.0.0.1:80"), FailureOutcome::Counted(2));

        assert_eq!(upstream.addresses().len(), 2);
        assert!(upstream.ring().contains("10.0.0.1:80"));
        assert_eq!(upstream.failure_count("10.0.0.1:80"), 2);
    }

    #[test]
    fn third_failure_evicts_and_rebuilds_ring() {
        let upstream = pool();
        upstream.record_failure("10.0.0.1:80");
        upstream.record_failure("10.0.0.1:80");
        assert_eq!(upstream.record_failure("10.0.0.1:80"), FailureOutcome::Evicted);

        assert_eq!(upstream.addresses(), vec!["10.0.0.2:80".to_string()]);
        let ring = upstream.ring();
        assert!(!ring.contains("10.0.0.1:80"));
        assert_eq!(ring.len(), 4);
        assert_eq!(upstream.failure_count("10.0.0.1:80"), 0);
        assert!(!upstream.is_reconfiguring());

        for i in 0..50 {
            assert_eq!(upstream.select(&format!("172.16.0.{}", i)).as_deref(), Some("10.0.0.2:80"));
        }
    }

    #[test]
    fn failures_after_eviction_are_ignored() {
        let upstream = pool();
        for _ in 0..3 {
            upstream.record_failure("10.0.0.1:80");
        }
        assert_eq!(upstream.record_failure("10.0.0.1:80"), FailureOutcome::Ignored);
        assert_eq!(upstream.record_failure("10.9.9.9:80"), FailureOutcome::Ignored);
    }

    #[test]
    fn counters_are_per_address() {
        let upstream = pool();
        upstream.record_failure("10.0.0.1:80");
        upstream.record_failure("10.0.0.2:80");
        upstream.record_failure("10.0.0.1:80");
        assert_eq!(upstream.failure_count("10.0.0.1:80"), 2);
        assert_eq!(upstream.failure_count("10.0.0.2:80"), 1);
        assert_eq!(upstream.addresses().len(), 2);
    }

    #[test]
    fn evicting_everything_leaves_empty_ring() {
        let upstream = Upstream::new("solo", vec!["10.0.0.1:80".into()], Scheme::Http, 2);
        for _ in 0..3 {
            upstream.record_failure("10.0.0.1:80");
        }
        assert!(upstream.ring().is_empty());
        assert_eq!(upstream.select("127.0.0.1"), None);
    }

    #[test]
    fn registry_swaps_whole_map() {
        let registry = UpstreamRegistry::new();
        assert!(registry.get("web").is_none());

        let mut configs = BTreeMap::new();
        configs.insert(
            "web".to_string(),
            UpstreamConfig {
                addresses: vec!["10.0.0.1:80".into()],
                proxy_set_header: vec![
                    ProxyHeader { key: "X-Edge".into(), value: "1".into() },
                    ProxyHeader { key: "bad key".into(), value: "1".into() },
                ],
                ..UpstreamConfig::default()
            },
        );
        registry.install(UpstreamRegistry::build(&configs));

        let web = registry.get("web").unwrap();
        assert_eq!(web.proxy_headers().len(), 1);
        assert_eq!(registry.names(), vec!["web".to_string()]);

        registry.install(HashMap::new());
        assert!(registry.get("web").is_none());
    }
}
