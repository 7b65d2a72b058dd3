//! Backend forwarding.
//!
//! # Responsibilities
//! - Send a prepared request to `scheme://backend` with the original path and query
//! - Enforce the request timeout
//! - Classify failures so the dispatcher can count them against the backend
//!
//! # Design Decisions
//! - Plain HTTP goes through the pooled hyper client
//! - HTTPS backends go through reqwest, bodies streamed both ways
//! - No retry against another backend for the same request

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode, Uri, Version};
use axum::response::IntoResponse;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use thiserror::Error;
use url::Url;

use crate::config::schema::{Scheme, TimeoutConfig};

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("invalid backend target `{target}`: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("backend {backend} failed: {message}")]
    Transport { backend: String, message: String },

    #[error("backend {backend} timed out after {after:?}")]
    Timeout { backend: String, after: Duration },
}

impl ForwardError {
    /// Whether this failure counts against the backend.
    pub fn is_backend_failure(&self) -> bool {
        !matches!(self, ForwardError::InvalidTarget { .. })
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ForwardError::InvalidTarget { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ForwardError::Transport { .. } => StatusCode::BAD_GATEWAY,
            ForwardError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl IntoResponse for ForwardError {
    fn into_response(self) -> axum::response::Response {
        let message = match &self {
            ForwardError::InvalidTarget { .. } => "invalid backend target",
            ForwardError::Transport { .. } => "upstream request failed",
            ForwardError::Timeout { .. } => "upstream request timed out",
        };
        (self.status(), message).into_response()
    }
}

/// Build `scheme://backend` plus the request's path and query.
pub fn target_uri(scheme: Scheme, backend: &str, original: &Uri) -> Result<Uri, ForwardError> {
    let invalid = |reason: String| ForwardError::InvalidTarget {
        target: format!("{}://{}", scheme, backend),
        reason,
    };

    let base = Url::parse(&format!("{}://{}", scheme, backend)).map_err(|e| invalid(e.to_string()))?;
    if base.host_str().is_none() || base.path() != "/" {
        return Err(invalid("backend must be host:port".to_string()));
    }

    let path_and_query = original
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    format!("{}{}", base.as_str().trim_end_matches('/'), path_and_query)
        .parse::<Uri>()
        .map_err(|e| invalid(e.to_string()))
}

/// Shared backend clients for one configuration generation.
#[derive(Debug, Clone)]
pub struct Forwarder {
    http: Client<HttpConnector, Body>,
    https: reqwest::Client,
    request_timeout: Option<Duration>,
}

impl Forwarder {
    pub fn new(timeouts: &TimeoutConfig) -> Result<Self, reqwest::Error> {
        let connect_timeout = Duration::from_secs(timeouts.connect_secs);

        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        let http = Client::builder(TokioExecutor::new()).build(connector);

        let https = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        let request_timeout = match timeouts.request_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(Self {
            http,
            https,
            request_timeout,
        })
    }

    /// Forward `request` to `backend` and return its response unmodified.
    pub async fn forward(
        &self,
        scheme: Scheme,
        backend: &str,
        request: Request<Body>,
    ) -> Result<Response<Body>, ForwardError> {
        let uri = target_uri(scheme, backend, request.uri())?;
        match scheme {
            Scheme::Http => {
                let (mut parts, body) = request.into_parts();
                parts.uri = uri;
                parts.version = Version::HTTP_11;
                let outbound = self.http.request(Request::from_parts(parts, body));

                let response = self
                    .with_timeout(backend, outbound)
                    .await?
                    .map_err(|e| transport(backend, e))?;
                Ok(response.map(Body::new))
            }
            Scheme::Https => {
                let url = Url::parse(&uri.to_string()).map_err(|e| ForwardError::InvalidTarget {
                    target: uri.to_string(),
                    reason: e.to_string(),
                })?;
                let (parts, body) = request.into_parts();
                let outbound = self
                    .https
                    .request(parts.method, url)
                    .headers(parts.headers)
                    .body(reqwest::Body::wrap_stream(body.into_data_stream()))
                    .send();

                let upstream = self
                    .with_timeout(backend, outbound)
                    .await?
                    .map_err(|e| transport(backend, e))?;

                let status = upstream.status();
                let headers = upstream.headers().clone();
                let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
                *response.status_mut() = status;
                *response.headers_mut() = headers;
                Ok(response)
            }
        }
    }

    async fn with_timeout<F: Future>(&self, backend: &str, fut: F) -> Result<F::Output, ForwardError> {
        match self.request_timeout {
            Some(after) => tokio::time::timeout(after, fut)
                .await
                .map_err(|_| ForwardError::Timeout {
                    backend: backend.to_string(),
                    after,
                }),
            None => Ok(fut.await),
        }
    }
}

/// The forwarder every live service reads on each request.
///
/// Reloads install a new forwarder, so timeout changes reach services that
/// were kept unchanged.
#[derive(Debug, Clone)]
pub struct SharedForwarder {
    inner: Arc<ArcSwap<Forwarder>>,
}

impl SharedForwarder {
    pub fn new(forwarder: Forwarder) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(forwarder)),
        }
    }

    pub fn install(&self, forwarder: Forwarder) {
        self.inner.store(Arc::new(forwarder));
    }

    pub fn load(&self) -> Arc<Forwarder> {
        self.inner.load_full()
    }
}

fn transport(backend: &str, error: impl std::fmt::Display) -> ForwardError {
    ForwardError::Transport {
        backend: backend.to_string(),
        message: error.to_string(),
    }
}
