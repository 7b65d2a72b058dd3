//! Per-service request dispatch.
//!
//! # Responsibilities
//! - Fail fast with 503 while the service or its upstream is reconfiguring
//! - Resolve the request path to a location
//! - Load balance by client IP, or serve files
//! - Count backend failures and append configured response headers
//! - Log and meter every request
//!
//! # Design Decisions
//! - Handlers share one immutable `LocationTable` per service instance
//! - Upstreams are resolved by name and the forwarder is loaded on every
//!   request, so a reload reaches unchanged services without restarting them

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::{Request, Response, Uri},
    response::IntoResponse,
    Router,
};
use tower::ServiceExt;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::http::forward::SharedForwarder;
use crate::http::request::{prepare_forward_headers, RequestIdExt, RequestUuid};
use crate::http::response;
use crate::lifecycle::Gate;
use crate::load_balancer::{FailureOutcome, Upstream, UpstreamRegistry};
use crate::observability::metrics;
use crate::routing::{Location, LocationKind, LocationTable};

const NO_BACKEND: &str = "none";
const FILES: &str = "files";

/// Everything a service's handlers need, cloned into each request.
#[derive(Debug, Clone)]
pub struct ServiceState {
    pub port: Arc<str>,
    pub locations: Arc<LocationTable>,
    pub gate: Arc<Gate>,
    pub upstreams: UpstreamRegistry,
    pub forwarder: SharedForwarder,
}

/// Build the Axum router for one service.
pub fn build_router(state: ServiceState) -> Router {
    Router::new()
        .fallback(dispatch)
        .with_state(state)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(RequestUuid))
}

async fn dispatch(State(state): State<ServiceState>, request: Request<Body>) -> Response<Body> {
    let start_time = Instant::now();
    let request_id = request.request_id().to_string();
    let client_ip = request.client_ip();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let (response, backend) = route(&state, client_ip.as_deref(), request).await;
    let status = response.status().as_u16();

    tracing::info!(
        request_id = %request_id,
        port = %state.port,
        client_ip = client_ip.as_deref().unwrap_or("unknown"),
        method = %method,
        path = %path,
        status,
        backend = %backend,
        latency_ms = start_time.elapsed().as_millis() as u64,
        "Request handled"
    );
    metrics::record_request(&method, status, &backend, start_time);

    response
}

async fn route(
    state: &ServiceState,
    client_ip: Option<&str>,
    request: Request<Body>,
) -> (Response<Body>, String) {
    if !state.gate.is_open() {
        return (response::restarting(), NO_BACKEND.to_string());
    }

    let Some(location) = state.locations.resolve(request.uri().path()) else {
        return (response::not_found(), NO_BACKEND.to_string());
    };

    match location.kind() {
        LocationKind::LoadBalance { upstream } => forward(state, upstream, client_ip, request).await,
        LocationKind::FileServe { root } => (serve_file(location, root, request).await, FILES.to_string()),
    }
}

async fn forward(
    state: &ServiceState,
    upstream_name: &str,
    client_ip: Option<&str>,
    mut request: Request<Body>,
) -> (Response<Body>, String) {
    let Some(upstream) = state.upstreams.get(upstream_name) else {
        tracing::warn!(port = %state.port, upstream = %upstream_name, "Location names an unknown upstream");
        return (response::no_backend(), NO_BACKEND.to_string());
    };
    if upstream.is_reconfiguring() {
        return (response::restarting(), NO_BACKEND.to_string());
    }

    let Some(client_ip) = client_ip else {
        tracing::error!(port = %state.port, "Client address unavailable");
        return (
            response::internal_error("client address unavailable"),
            NO_BACKEND.to_string(),
        );
    };

    let Some(backend) = upstream.select(client_ip) else {
        tracing::warn!(upstream = %upstream_name, "No backend left in upstream");
        return (response::no_backend(), NO_BACKEND.to_string());
    };

    prepare_forward_headers(request.headers_mut(), client_ip);

    let forwarder = state.forwarder.load();
    match forwarder.forward(upstream.scheme(), &backend, request).await {
        Ok(mut proxied) => {
            if proxied.headers().is_empty() {
                tracing::warn!(upstream = %upstream_name, backend = %backend, "Backend response carried no headers");
                record_failure(&upstream, &backend);
            } else {
                response::finalize(&mut proxied, upstream.proxy_headers());
            }
            (proxied, backend)
        }
        Err(err) => {
            tracing::warn!(upstream = %upstream_name, backend = %backend, error = %err, "Forwarding failed");
            if err.is_backend_failure() {
                record_failure(&upstream, &backend);
            }
            (err.into_response(), backend)
        }
    }
}

fn record_failure(upstream: &Upstream, backend: &str) {
    if upstream.record_failure(backend) == FailureOutcome::Evicted {
        metrics::record_eviction(upstream.name());
    }
}

async fn serve_file(location: &Location, root: &Path, request: Request<Body>) -> Response<Body> {
    let (mut parts, body) = request.into_parts();

    let relative = location.relative_path(parts.uri.path());
    let rewritten = match parts.uri.query() {
        Some(query) => format!("{}?{}", relative, query),
        None => relative,
    };
    match rewritten.parse::<Uri>() {
        Ok(uri) => parts.uri = uri,
        Err(_) => return response::internal_error("invalid file path"),
    }

    match ServeDir::new(root).oneshot(Request::from_parts(parts, body)).await {
        Ok(served) => served.map(Body::new),
        Err(never) => match never {},
    }
}
