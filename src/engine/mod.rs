//! Reconciliation engine.
//!
//! # Data Flow
//! ```text
//! start / reset
//!     → ConfigSource::load (any error aborts before touching live state)
//!     → UpstreamRegistry and SharedForwarder swapped (new rings, new timeouts)
//!     → reconcile::plan (per-port Start / Replace / Keep / Remove)
//!     → closes applied in order, launches bind concurrently
//!     → StartupBarrier waits for every bind outcome
//!     → live set updated, failed replacements restored
//! ```
//!
//! # States
//! `Created → Starting → Running ⇄ Resetting`, any state `→ Stopped`.
//!
//! The engine is the single writer of the live service set; request handlers
//! only ever see a service's own immutable tables, the shared registry and
//! the shared forwarder.

pub mod reconcile;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::config::{ConfigError, ConfigSource, ProxyConfig};
use crate::http::{
    BindOutcome, Forwarder, Launch, ServiceContext, ServiceHandle, ServiceInfo, ServiceSpec, SharedForwarder,
};
use crate::lifecycle::StartupBarrier;
use crate::load_balancer::UpstreamRegistry;
use crate::observability::metrics;

pub use reconcile::{plan, Action, ReconcileReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Created,
    Starting,
    Running,
    Resetting,
    Stopped,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Created => "created",
            EngineState::Starting => "starting",
            EngineState::Running => "running",
            EngineState::Resetting => "resetting",
            EngineState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to build backend client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("cannot {op} while {state}")]
    InvalidState { op: &'static str, state: EngineState },
}

/// Owns every live service and converges them onto the configuration.
pub struct Engine {
    source: Arc<dyn ConfigSource>,
    state: EngineState,
    upstreams: UpstreamRegistry,
    forwarder: Option<SharedForwarder>,
    live: HashMap<String, ServiceHandle>,
    next_instance: u64,
}

impl Engine {
    pub fn new(source: Arc<dyn ConfigSource>) -> Self {
        Self {
            source,
            state: EngineState::Created,
            upstreams: UpstreamRegistry::new(),
            forwarder: None,
            live: HashMap::new(),
            next_instance: 1,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn upstreams(&self) -> &UpstreamRegistry {
        &self.upstreams
    }

    pub fn live_ports(&self) -> Vec<String> {
        let mut ports: Vec<String> = self.live.keys().cloned().collect();
        ports.sort();
        ports
    }

    pub fn live_service(&self, port: &str) -> Option<ServiceInfo> {
        self.live.get(port).map(ServiceHandle::info)
    }

    /// Load configuration and bind every service.
    ///
    /// Returns once every listener reported its bind outcome. A load failure
    /// leaves the engine `Created`.
    pub async fn start(&mut self) -> Result<ReconcileReport, EngineError> {
        if self.state != EngineState::Created {
            return Err(EngineError::InvalidState {
                op: "start",
                state: self.state,
            });
        }
        self.state = EngineState::Starting;
        tracing::info!(source = %self.source.describe(), "Engine starting");

        match self.load_and_reconcile().await {
            Ok(report) => {
                self.state = EngineState::Running;
                metrics::record_reload("started");
                Ok(report)
            }
            Err(err) => {
                self.state = EngineState::Created;
                metrics::record_reload("failed");
                Err(err)
            }
        }
    }

    /// Re-read configuration and converge the live services onto it.
    ///
    /// A load failure aborts before anything changes; the last good
    /// configuration keeps serving and the engine stays `Running`.
    pub async fn reset(&mut self) -> Result<ReconcileReport, EngineError> {
        if self.state != EngineState::Running {
            return Err(EngineError::InvalidState {
                op: "reset",
                state: self.state,
            });
        }
        self.state = EngineState::Resetting;
        tracing::info!(source = %self.source.describe(), "Engine resetting");

        let result = self.load_and_reconcile().await;
        self.state = EngineState::Running;
        match &result {
            Ok(_) => metrics::record_reload("applied"),
            Err(err) => {
                tracing::error!(error = %err, "Reset aborted, keeping last good configuration");
                metrics::record_reload("failed");
            }
        }
        result
    }

    /// Close every live service. Safe to call more than once.
    pub async fn stop(&mut self) {
        if self.state == EngineState::Stopped {
            return;
        }
        let mut ports = self.live_ports();
        ports.reverse();
        for port in ports {
            if let Some(handle) = self.live.remove(&port) {
                handle.close().await;
            }
        }
        self.upstreams.install(HashMap::new());
        self.state = EngineState::Stopped;
        metrics::set_live_services(0);
        tracing::info!("Engine stopped");
    }

    async fn load_and_reconcile(&mut self) -> Result<ReconcileReport, EngineError> {
        let config = self.source.load()?;
        let forwarder = Forwarder::new(&config.timeouts)?;
        Ok(self.reconcile(&config, forwarder).await)
    }

    async fn reconcile(&mut self, config: &ProxyConfig, forwarder: Forwarder) -> ReconcileReport {
        self.upstreams
            .install(UpstreamRegistry::build(&config.upstreams));
        tracing::debug!(upstreams = ?self.upstreams.names(), "Upstreams installed");
        let shared = match self.forwarder.clone() {
            Some(shared) => {
                shared.install(forwarder);
                shared
            }
            None => {
                let shared = SharedForwarder::new(forwarder);
                self.forwarder = Some(shared.clone());
                shared
            }
        };
        let ctx = ServiceContext {
            upstreams: self.upstreams.clone(),
            forwarder: shared,
        };

        let mut pending: BTreeMap<String, ServiceSpec> = config
            .services
            .iter()
            .map(|service| {
                (
                    service.port.clone(),
                    ServiceSpec::from_config(service, &config.listener),
                )
            })
            .collect();
        let live_fingerprints: HashMap<String, u64> = self
            .live
            .iter()
            .map(|(port, handle)| (port.clone(), handle.spec().fingerprint()))
            .collect();
        let pending_fingerprints: BTreeMap<String, u64> = pending
            .iter()
            .map(|(port, spec)| (port.clone(), spec.fingerprint()))
            .collect();

        let mut report = ReconcileReport::default();
        let mut barrier = StartupBarrier::new();
        let mut launches: HashMap<String, (Launch, Option<ServiceSpec>)> = HashMap::new();

        for action in plan(&live_fingerprints, &pending_fingerprints) {
            match action {
                Action::Keep(port) => {
                    tracing::info!(port = %port, "Service unchanged");
                    report.unchanged.push(port);
                }
                Action::Remove(port) => {
                    if let Some(handle) = self.live.remove(&port) {
                        tracing::info!(port = %port, "Removing service");
                        handle.close().await;
                    }
                    report.removed.push(port);
                }
                Action::Start(port) => {
                    let Some(spec) = pending.remove(&port) else { continue };
                    tracing::info!(port = %port, "Starting service");
                    let launch = self.launch(spec, &ctx, &mut barrier);
                    launches.insert(port, (launch, None));
                }
                Action::Replace(port) => {
                    let Some(spec) = pending.remove(&port) else { continue };
                    let previous = match self.live.remove(&port) {
                        Some(handle) => {
                            let previous = handle.spec().clone();
                            tracing::info!(
                                port = %port,
                                listener_changed = previous.listener != spec.listener,
                                "Replacing service"
                            );
                            handle.close().await;
                            Some(previous)
                        }
                        None => None,
                    };
                    let launch = self.launch(spec, &ctx, &mut barrier);
                    launches.insert(port, (launch, previous));
                }
            }
        }

        let mut restores = StartupBarrier::new();
        let mut restoring: HashMap<String, (Launch, String)> = HashMap::new();

        for (port, outcome) in barrier.wait().await {
            let Some((launch, previous)) = launches.remove(&port) else { continue };
            match bind_result(outcome) {
                Ok(local_addr) => {
                    let handle = launch.into_handle(local_addr);
                    tracing::info!(port = %port, address = %local_addr, instance = handle.info().instance, "Service live");
                    if previous.is_some() {
                        report.replaced.push(port.clone());
                    } else {
                        report.started.push(port.clone());
                    }
                    self.live.insert(port, handle);
                }
                Err(reason) => {
                    tracing::error!(port = %port, error = %reason, "Service failed to bind");
                    match previous {
                        Some(previous) => {
                            // Same locations and listener settings as before the reset.
                            let launch = self.launch(previous, &ctx, &mut restores);
                            restoring.insert(port, (launch, reason));
                        }
                        None => report.failed.push((port, reason)),
                    }
                }
            }
        }

        for (port, outcome) in restores.wait().await {
            let Some((launch, reason)) = restoring.remove(&port) else { continue };
            match bind_result(outcome) {
                Ok(local_addr) => {
                    tracing::warn!(port = %port, "Previous service definition restored");
                    self.live.insert(port.clone(), launch.into_handle(local_addr));
                    report.restored.push(port);
                }
                Err(restore_reason) => {
                    tracing::error!(port = %port, error = %restore_reason, "Restoring previous service failed");
                    report
                        .failed
                        .push((port, format!("{}; restore failed: {}", reason, restore_reason)));
                }
            }
        }

        metrics::set_live_services(self.live.len());
        tracing::info!(
            started = report.started.len(),
            replaced = report.replaced.len(),
            removed = report.removed.len(),
            unchanged = report.unchanged.len(),
            failed = report.failed.len(),
            "Reconciliation complete"
        );
        report
    }

    fn launch(
        &mut self,
        spec: ServiceSpec,
        ctx: &ServiceContext,
        barrier: &mut StartupBarrier<BindOutcome>,
    ) -> Launch {
        let instance = self.next_instance;
        self.next_instance += 1;
        let token = barrier.token(spec.port.clone());
        Launch::spawn(spec, ctx, instance, token)
    }
}

fn bind_result(outcome: Option<BindOutcome>) -> Result<std::net::SocketAddr, String> {
    match outcome {
        Some(Ok(addr)) => Ok(addr),
        Some(Err(err)) => Err(err.to_string()),
        None => Err("service task exited before binding".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemorySource;

    #[tokio::test]
    async fn lifecycle_guards_states() {
        let mut engine = Engine::new(Arc::new(MemorySource::new(ProxyConfig::default())));
        assert_eq!(engine.state(), EngineState::Created);

        let err = engine.reset().await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState { op: "reset", .. }));

        let report = engine.start().await.unwrap();
        assert!(report.is_clean());
        assert_eq!(engine.state(), EngineState::Running);
        assert!(engine.live_ports().is_empty());

        let err = engine.start().await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState { op: "start", .. }));

        engine.stop().await;
        engine.stop().await;
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[tokio::test]
    async fn start_with_invalid_config_stays_created() {
        let mut bad = ProxyConfig::default();
        bad.services.push(crate::config::ServiceConfig {
            port: "nope".into(),
            locations: Vec::new(),
        });
        let mut engine = Engine::new(Arc::new(MemorySource::new(bad)));

        assert!(matches!(engine.start().await, Err(EngineError::Config(_))));
        assert_eq!(engine.state(), EngineState::Created);
        assert!(engine.live_ports().is_empty());
    }
}
