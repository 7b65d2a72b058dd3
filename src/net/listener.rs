//! TCP listener implementation with backpressure.
//!
//! # Responsibilities
//! - Bind a service's port on the configured host
//! - Accept incoming TCP connections
//! - Enforce max_connections limit via semaphore

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("invalid listen address `{address}`")]
    InvalidAddress { address: String },

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to accept: {0}")]
    Accept(#[source] io::Error),

    #[error("listener closed")]
    Closed,
}

/// A bounded TCP listener that limits concurrent connections.
///
/// When the limit is reached, accepting waits until a connection finishes.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    connection_limit: Arc<Semaphore>,
}

/// `host:port`, bracketing IPv6 hosts.
pub fn listen_address(host: &str, port: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

impl Listener {
    /// Bind `host:port` with a connection limit.
    pub async fn bind(host: &str, port: &str, max_connections: usize) -> Result<Self, ListenerError> {
        let address = listen_address(host, port);
        if port.parse::<u16>().is_err() {
            return Err(ListenerError::InvalidAddress { address });
        }

        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| ListenerError::Bind {
                address: address.clone(),
                source,
            })?;

        let local_addr = listener
            .local_addr()
            .map_err(|source| ListenerError::Bind { address, source })?;

        tracing::info!(
            address = %local_addr,
            max_connections,
            "Listener bound"
        );

        Ok(Self {
            inner: listener,
            connection_limit: Arc::new(Semaphore::new(max_connections.max(1))),
        })
    }

    /// Accept a new connection, respecting the connection limit.
    ///
    /// Returns the stream and a permit that must be held for the connection's lifetime.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        let permit = self
            .connection_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;

        let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;

        tracing::debug!(
            peer_addr = %addr,
            available_permits = self.available_permits(),
            "Connection accepted"
        );

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, io::Error> {
        self.inner.local_addr()
    }

    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }
}

/// A permit representing a connection slot.
///
/// When dropped, the connection slot is released back to the pool.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brackets_ipv6_hosts() {
        assert_eq!(listen_address("0.0.0.0", "80"), "0.0.0.0:80");
        assert_eq!(listen_address("::1", "80"), "[::1]:80");
        assert_eq!(listen_address("[::1]", "80"), "[::1]:80");
    }

    #[tokio::test]
    async fn rejects_non_numeric_port() {
        let err = Listener::bind("127.0.0.1", "http", 10).await.unwrap_err();
        assert!(matches!(err, ListenerError::InvalidAddress { .. }));
    }

    #[tokio::test]
    async fn second_bind_on_same_port_fails() {
        let first = Listener::bind("127.0.0.1", "0", 10).await.unwrap();
        let port = first.local_addr().unwrap().port().to_string();

        let err = Listener::bind("127.0.0.1", &port, 10).await.unwrap_err();
        assert!(matches!(err, ListenerError::Bind { .. }));
    }

    #[tokio::test]
    async fn permits_are_returned_on_drop() {
        let listener = Listener::bind("127.0.0.1", "0", 2).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let _client = TcpStream::connect(addr).await.unwrap();
        let (_stream, _, permit) = listener.accept().await.unwrap();
        assert_eq!(listener.available_permits(), 1);

        drop(permit);
        assert_eq!(listener.available_permits(), 2);
    }
}
