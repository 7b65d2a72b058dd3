//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use edge_proxy::config::{
    ListenerConfig, LocationConfig, LocationKindConfig, ProxyConfig, ProxyHeader, Scheme,
    ServiceConfig, UpstreamConfig,
};

/// Start a mock backend that answers every request with `body`.
///
/// The listener is bound before this returns; aborting the handle closes it.
pub async fn start_mock_backend(addr: SocketAddr, body: &'static str) -> JoinHandle<()> {
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nX-Backend: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body,
        body
    );
    serve_raw(addr, response, Duration::ZERO).await
}

/// Like [`start_mock_backend`], but every response is delayed by `delay`.
pub async fn start_slow_backend(addr: SocketAddr, body: &'static str, delay: Duration) -> JoinHandle<()> {
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nX-Backend: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body,
        body
    );
    serve_raw(addr, response, delay).await
}

/// Start a backend whose responses carry no headers at all.
pub async fn start_headerless_backend(addr: SocketAddr) -> JoinHandle<()> {
    serve_raw(addr, "HTTP/1.1 200 OK\r\n\r\nbare".to_string(), Duration::ZERO).await
}

async fn serve_raw(addr: SocketAddr, response: String, delay: Duration) -> JoinHandle<()> {
    let listener = TcpListener::bind(addr).await.unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let response = response.clone();
                    tokio::spawn(async move {
                        let mut buf = [0u8; 4096];
                        let _ = socket.read(&mut buf).await;
                        tokio::time::sleep(delay).await;
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    })
}

/// A load-balancing location.
pub fn lb_location(prefix: &str, upstream: &str) -> LocationConfig {
    LocationConfig {
        kind: LocationKindConfig::LoadBalance,
        root: Some(prefix.to_string()),
        upstream: Some(upstream.to_string()),
        file_root: None,
    }
}

pub fn file_location(prefix: &str, file_root: &str) -> LocationConfig {
    LocationConfig {
        kind: LocationKindConfig::FileServe,
        root: Some(prefix.to_string()),
        upstream: None,
        file_root: Some(file_root.to_string()),
    }
}

pub fn upstream(addresses: &[&str], replicas: u32) -> UpstreamConfig {
    UpstreamConfig {
        addresses: addresses.iter().map(|a| a.to_string()).collect(),
        scheme: Scheme::Http,
        replicas,
        proxy_set_header: vec![ProxyHeader {
            key: "X-Edge".into(),
            value: "test".into(),
        }],
    }
}

/// Config on loopback with the given services and upstreams.
pub fn proxy_config(
    services: Vec<(u16, Vec<LocationConfig>)>,
    upstreams: Vec<(&str, UpstreamConfig)>,
) -> ProxyConfig {
    ProxyConfig {
        services: services
            .into_iter()
            .map(|(port, locations)| ServiceConfig {
                port: port.to_string(),
                locations,
            })
            .collect(),
        upstreams: upstreams
            .into_iter()
            .map(|(name, config)| (name.to_string(), config))
            .collect::<BTreeMap<_, _>>(),
        listener: ListenerConfig {
            bind_host: "127.0.0.1".into(),
            ..ListenerConfig::default()
        },
        ..ProxyConfig::default()
    }
}

/// A client whose connections originate from `source`.
pub fn client_from(source: IpAddr) -> reqwest::Client {
    reqwest::Client::builder()
        .local_address(source)
        .pool_max_idle_per_host(0)
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// True while something accepts connections on `addr`.
pub async fn is_listening(addr: SocketAddr) -> bool {
    tokio::net::TcpStream::connect(addr).await.is_ok()
}
