//! Listening services.
//!
//! # Responsibilities
//! - Describe a service as its port, an immutable location table and the
//!   listener settings it binds with
//! - Launch one task per service that binds the port, reports the bind
//!   outcome, then serves HTTP/1.1 connections
//! - Close a service: gate shut, accept loop stopped, in-flight connections aborted
//!
//! # Design Decisions
//! - The bind happens inside the service task so every launch in a
//!   reconciliation cycle binds concurrently
//! - Closing does not drain; the port is released as soon as the task ends

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{extract::ConnectInfo, Router};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tower::ServiceExt;

use crate::config::schema::{ListenerConfig, ServiceConfig};
use crate::http::dispatch::{build_router, ServiceState};
use crate::http::forward::SharedForwarder;
use crate::lifecycle::{BarrierToken, Gate, Shutdown};
use crate::load_balancer::UpstreamRegistry;
use crate::net::{listen_address, ConnectionTracker, Listener, ListenerError};
use crate::routing::LocationTable;

/// What a launched service task reports once it knows whether it is live.
pub type BindOutcome = Result<SocketAddr, ListenerError>;

/// A service definition: one port, its locations and how it listens.
///
/// A failed replacement is restored from the previous spec, so the spec
/// carries the listener settings the service was bound with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub port: String,
    pub locations: Arc<LocationTable>,
    pub listener: ListenerConfig,
}

impl ServiceSpec {
    pub fn from_config(config: &ServiceConfig, listener: &ListenerConfig) -> Self {
        Self {
            port: config.port.clone(),
            locations: Arc::new(LocationTable::from_config(config)),
            listener: listener.clone(),
        }
    }

    /// Changes when the locations or the listener settings change.
    pub fn fingerprint(&self) -> u64 {
        self.locations
            .fingerprint()
            .wrapping_add(listener_fingerprint(&self.listener))
    }
}

fn listener_fingerprint(listener: &ListenerConfig) -> u64 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(listener.bind_host.as_bytes());
    hasher.update(&[0x1f]);
    hasher.update(listener.max_connections.to_string().as_bytes());
    u64::from(hasher.finalize())
}

/// Shared by every service, whatever configuration it was launched from.
#[derive(Debug, Clone)]
pub struct ServiceContext {
    pub upstreams: UpstreamRegistry,
    pub forwarder: SharedForwarder,
}

/// Public view of a live service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub port: String,
    pub fingerprint: u64,
    pub local_addr: SocketAddr,
    /// Increases with every listener bind, never reused.
    pub instance: u64,
}

/// A service task that has not reported its bind outcome yet.
#[derive(Debug)]
pub struct Launch {
    spec: ServiceSpec,
    instance: u64,
    gate: Arc<Gate>,
    shutdown: Shutdown,
    task: JoinHandle<()>,
    tracker: ConnectionTracker,
}

impl Launch {
    /// Spawn the service task. `token` is released with the bind outcome.
    pub fn spawn(
        spec: ServiceSpec,
        ctx: &ServiceContext,
        instance: u64,
        token: BarrierToken<BindOutcome>,
    ) -> Self {
        let gate = Arc::new(Gate::new());
        let shutdown = Shutdown::new();
        let stop = shutdown.subscribe();
        let tracker = ConnectionTracker::default();

        let router = build_router(ServiceState {
            port: Arc::from(spec.port.as_str()),
            locations: Arc::clone(&spec.locations),
            gate: Arc::clone(&gate),
            upstreams: ctx.upstreams.clone(),
            forwarder: ctx.forwarder.clone(),
        });

        let host = spec.listener.bind_host.clone();
        let max_connections = spec.listener.max_connections;
        let port = spec.port.clone();
        let connections = tracker.clone();

        let task = tokio::spawn(async move {
            let listener = match Listener::bind(&host, &port, max_connections).await {
                Ok(listener) => listener,
                Err(err) => {
                    token.release(Err(err));
                    return;
                }
            };
            match listener.local_addr() {
                Ok(addr) => token.release(Ok(addr)),
                Err(source) => {
                    token.release(Err(ListenerError::Bind {
                        address: listen_address(&host, &port),
                        source,
                    }));
                    return;
                }
            }
            serve(listener, router, connections, stop, port).await;
        });

        Self {
            spec,
            instance,
            gate,
            shutdown,
            task,
            tracker,
        }
    }

    /// The task reported a successful bind on `local_addr`.
    pub fn into_handle(self, local_addr: SocketAddr) -> ServiceHandle {
        ServiceHandle {
            spec: self.spec,
            instance: self.instance,
            gate: self.gate,
            shutdown: self.shutdown,
            task: self.task,
            tracker: self.tracker,
            local_addr,
        }
    }
}

/// A live service owned by the engine.
#[derive(Debug)]
pub struct ServiceHandle {
    spec: ServiceSpec,
    instance: u64,
    gate: Arc<Gate>,
    shutdown: Shutdown,
    task: JoinHandle<()>,
    tracker: ConnectionTracker,
    local_addr: SocketAddr,
}

impl ServiceHandle {
    pub fn spec(&self) -> &ServiceSpec {
        &self.spec
    }

    pub fn info(&self) -> ServiceInfo {
        ServiceInfo {
            port: self.spec.port.clone(),
            fingerprint: self.spec.fingerprint(),
            local_addr: self.local_addr,
            instance: self.instance,
        }
    }

    /// Close the listener and abort open connections. Errors are logged.
    pub async fn close(self) {
        let gate = Arc::clone(&self.gate);
        let _closing = gate.close();
        let open_connections = self.tracker.open();

        self.shutdown.trigger();
        if let Err(err) = self.task.await {
            tracing::error!(port = %self.spec.port, instance = self.instance, error = %err, "Service task ended abnormally");
        }

        tracing::info!(
            port = %self.spec.port,
            instance = self.instance,
            open_connections,
            "Service closed"
        );
    }
}

async fn serve(
    listener: Listener,
    router: Router,
    tracker: ConnectionTracker,
    mut stop: broadcast::Receiver<()>,
    port: String,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            _ = stop.recv() => break,

            accepted = listener.accept() => match accepted {
                Ok((stream, peer, permit)) => {
                    let router = router.clone();
                    let guard = tracker.open_connection();
                    connections.spawn(async move {
                        let _permit = permit;
                        let service = service_fn(move |mut request: Request<Incoming>| {
                            request.extensions_mut().insert(ConnectInfo(peer));
                            router.clone().oneshot(request)
                        });
                        if let Err(err) = http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service)
                            .await
                        {
                            tracing::debug!(connection_id = %guard.id(), peer_addr = %peer, error = %err, "Connection error");
                        }
                    });
                }
                Err(ListenerError::Closed) => break,
                Err(err) => {
                    tracing::warn!(port = %port, error = %err, "Accept failed");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },

            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    drop(listener);
    connections.shutdown().await;
    tracing::debug!(port = %port, "Accept loop stopped");
}
