//! Datagram transport used by the session
//!
//! The session only needs to send a datagram and to wait a bounded time for
//! the next one. UDP gives independent send and receive calls, so one reader
//! and one writer may use a transport concurrently without a lock.

use anyhow::{Context, Result};
use protocol::MAX_PACKET_SIZE;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::info;

pub trait Transport: Send + Sync + 'static {
    /// Send one datagram to the server.
    fn send(&self, datagram: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Wait up to `timeout` for the next datagram; `Ok(None)` means the wait
    /// timed out.
    fn recv(&self, timeout: Duration) -> impl Future<Output = io::Result<Option<Vec<u8>>>> + Send;
}

/// UDP socket connected to a single server address
pub struct UdpTransport {
    socket: UdpSocket,
    server_addr: SocketAddr,
}

impl UdpTransport {
    /// Resolve `host`, bind an ephemeral local port of the same address
    /// family, and connect the socket so only the server's datagrams arrive.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let server_addr = tokio::net::lookup_host((host, port))
            .await
            .with_context(|| format!("Failed to resolve server address: {}:{}", host, port))?
            .next()
            .with_context(|| format!("No address found for {}:{}", host, port))?;

        let bind_addr = if server_addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind_addr)
            .await
            .context("Failed to bind UDP socket")?;

        socket
            .connect(server_addr)
            .await
            .with_context(|| format!("Failed to connect UDP socket to {}", server_addr))?;

        info!(
            "UDP transport ready: {} -> {}",
            socket.local_addr().context("Failed to read local address")?,
            server_addr
        );

        Ok(Self { socket, server_addr })
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }
}

impl Transport for UdpTransport {
    async fn send(&self, datagram: &[u8]) -> io::Result<()> {
        self.socket.send(datagram).await.map(|_| ())
    }

    async fn recv(&self, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        match tokio::time::timeout(timeout, self.socket.recv(&mut buf)).await {
            Ok(Ok(len)) => {
                buf.truncate(len);
                Ok(Some(buf))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(None),
        }
    }
}
