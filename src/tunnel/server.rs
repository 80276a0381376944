//! Tunnel establisher.
//!
//! # Responsibilities
//! - Accept raw connections with backpressure
//! - Read and classify the preamble, bounded in size and time
//! - Connect upstream, announce or replay, then relay bytes both ways
//! - Stop accepting on shutdown and drain live tunnels for a grace period

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use super::preamble::{classify, Preamble};
use super::TunnelError;
use crate::config::ProxyConfig;
use crate::net::{ConnectionId, ConnectionTracker, Listener, ListenerError};
use crate::observability::metrics;

/// Reply that opens a CONNECT tunnel.
pub const CONNECTION_ESTABLISHED: &[u8] = b"HTTP/1.1 200 OK\r\n\r\n";

/// Best-effort reply when the upstream cannot be reached.
pub const BAD_GATEWAY: &[u8] =
    b"HTTP/1.1 502 Bad Gateway\r\nConnection: close\r\nContent-Length: 0\r\n\r\n";

const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct TunnelSettings {
    pub preamble_max_bytes: usize,
    pub preamble_timeout: Duration,
    pub connect_timeout: Duration,
    pub drain_grace: Duration,
}

impl TunnelSettings {
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self {
            preamble_max_bytes: config.tunnel.preamble_max_bytes,
            preamble_timeout: Duration::from_secs(config.tunnel.preamble_timeout_secs),
            connect_timeout: Duration::from_secs(config.timeouts.connect_secs),
            drain_grace: DEFAULT_DRAIN_GRACE,
        }
    }
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self::from_config(&ProxyConfig::default())
    }
}

/// Accept loop for the raw tunnel listener.
pub struct TunnelServer {
    settings: Arc<TunnelSettings>,
    tracker: ConnectionTracker,
}

impl TunnelServer {
    pub fn new(settings: TunnelSettings) -> Self {
        Self {
            settings: Arc::new(settings),
            tracker: ConnectionTracker::new(),
        }
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Accept until `shutdown` fires, then wait for live tunnels.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        tracing::info!(
            address = ?listener.local_addr().ok(),
            "Tunnel server starting"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        let guard = self.tracker.track();
                        let settings = Arc::clone(&self.settings);
                        tokio::spawn(async move {
                            let _permit = permit;
                            handle_connection(stream, peer, guard.id(), &settings).await;
                            drop(guard);
                        });
                    }
                    Err(ListenerError::Closed) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Tunnel accept failed");
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        }

        let active = self.tracker.active_count();
        tracing::info!(active, "Tunnel server draining");
        if !self.tracker.drain(self.settings.drain_grace).await {
            tracing::warn!(
                remaining = self.tracker.active_count(),
                "Tunnels still open after drain grace period"
            );
        }
        tracing::info!("Tunnel server stopped");
        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    id: ConnectionId,
    settings: &TunnelSettings,
) {
    match establish(stream, settings).await {
        Ok((to_upstream, to_client)) => tracing::debug!(
            connection_id = %id,
            peer = %peer,
            to_upstream,
            to_client,
            "Tunnel closed"
        ),
        Err(e @ TunnelError::Connect { .. }) => tracing::warn!(
            connection_id = %id,
            peer = %peer,
            error = %e,
            "Tunnel upstream unreachable"
        ),
        Err(e) => tracing::debug!(
            connection_id = %id,
            peer = %peer,
            error = %e,
            "Tunnel ended"
        ),
    }
}

/// Run one connection through the tunnel state machine. Returns the bytes
/// relayed towards the upstream and towards the client.
async fn establish(
    mut client: TcpStream,
    settings: &TunnelSettings,
) -> Result<(u64, u64), TunnelError> {
    let (preamble, buffered) = read_preamble(
        &mut client,
        settings.preamble_max_bytes,
        settings.preamble_timeout,
    )
    .await?;
    let kind = preamble.kind();
    let target = preamble.target();
    tracing::debug!(kind, target = %target, "Preamble classified");

    let connected = tokio::time::timeout(
        settings.connect_timeout,
        TcpStream::connect((target.host.as_str(), target.port)),
    )
    .await
    .unwrap_or_else(|_| {
        Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "connect timed out",
        ))
    });

    let mut upstream = match connected {
        Ok(upstream) => upstream,
        Err(source) => {
            metrics::record_tunnel_rejected(kind);
            metrics::record_upstream_error("connect");
            let _ = client.write_all(BAD_GATEWAY).await;
            let _ = client.shutdown().await;
            return Err(TunnelError::Connect {
                target: target.to_string(),
                source,
            });
        }
    };
    let _ = upstream.set_nodelay(true);

    match preamble {
        Preamble::Connect { header_len, .. } => {
            client.write_all(CONNECTION_ESTABLISHED).await?;
            if buffered.len() > header_len {
                upstream.write_all(&buffered[header_len..]).await?;
            }
        }
        Preamble::Plain { .. } => upstream.write_all(&buffered).await?,
    }

    metrics::record_tunnel_opened(kind);
    match tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
        Ok((to_upstream, to_client)) => {
            metrics::record_tunnel_closed(to_upstream, to_client);
            Ok((to_upstream, to_client))
        }
        Err(e) => {
            metrics::record_tunnel_closed(0, 0);
            Err(e.into())
        }
    }
}

/// Read until the header block is complete.
///
/// Returns the classification and every byte read, which may extend past
/// the header block.
pub async fn read_preamble<S>(
    stream: &mut S,
    max_bytes: usize,
    deadline: Duration,
) -> Result<(Preamble, BytesMut), TunnelError>
where
    S: AsyncRead + Unpin,
{
    tokio::time::timeout(deadline, read_head(stream, max_bytes))
        .await
        .map_err(|_| TunnelError::PreambleTimeout)?
}

async fn read_head<S>(stream: &mut S, max_bytes: usize) -> Result<(Preamble, BytesMut), TunnelError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(max_bytes.min(1024));
    loop {
        if stream.read_buf(&mut buf).await? == 0 {
            return Err(TunnelError::ClosedBeforePreamble);
        }
        if let Some(preamble) = classify(&buf)? {
            return Ok((preamble, buf));
        }
        if buf.len() >= max_bytes {
            return Err(TunnelError::PreambleTooLarge(max_bytes));
        }
    }
}
