//! Shared helpers for integration tests: mock upstreams and proxy launchers.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use conduit_proxy::config::ProxyConfig;
use conduit_proxy::lifecycle::Shutdown;
use conduit_proxy::net::Listener;
use conduit_proxy::store::MemoryStore;
use conduit_proxy::tunnel::{TunnelServer, TunnelSettings};
use conduit_proxy::HttpServer;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Serve an axum app on an ephemeral port.
pub async fn spawn_upstream(app: axum::Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Raw upstream that echoes every byte back.
pub async fn spawn_echo_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut rd, mut wr) = socket.split();
                let _ = tokio::io::copy(&mut rd, &mut wr).await;
            });
        }
    });
    addr
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Read from `stream` until the buffer holds a full header block.
pub async fn read_head(stream: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    buf
}

/// Raw upstream answering one request with a fixed response.
pub async fn spawn_fixed_upstream(response: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                read_head(&mut socket).await;
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// Run the HTTP pipeline listener with an in-memory store.
///
/// Keep the returned `Shutdown` alive for as long as the proxy is needed.
pub async fn spawn_proxy(config: ProxyConfig) -> (SocketAddr, Shutdown) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();

    let server = HttpServer::new(config, Arc::new(MemoryStore::new()));
    tokio::spawn(server.run(listener, shutdown.subscribe()));
    (addr, shutdown)
}

pub fn tunnel_settings() -> TunnelSettings {
    TunnelSettings {
        preamble_max_bytes: 8192,
        preamble_timeout: Duration::from_secs(2),
        connect_timeout: Duration::from_secs(2),
        drain_grace: Duration::from_secs(1),
    }
}

/// Run the tunnel listener. Returns its address, the shutdown handle and the
/// server task.
pub async fn spawn_tunnel() -> (
    SocketAddr,
    Shutdown,
    tokio::task::JoinHandle<Result<(), conduit_proxy::net::ListenerError>>,
) {
    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = tcp.local_addr().unwrap();
    let listener = Listener::from_tcp(tcp, 64).unwrap();
    let shutdown = Shutdown::new();

    let server = TunnelServer::new(tunnel_settings());
    let task = tokio::spawn(server.run(listener, shutdown.subscribe()));
    (addr, shutdown, task)
}

/// HTTP client that sends every request through the proxy at `proxy`.
pub fn proxied_client(proxy: SocketAddr) -> reqwest::Client {
    reqwest::Client::builder()
        .proxy(reqwest::Proxy::http(format!("http://{proxy}")).unwrap())
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}
