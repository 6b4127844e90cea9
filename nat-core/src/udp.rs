//! A single UDP socket with an optional pinned remote address.

use crate::error::{NatError, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

/// Wraps one UDP socket. In *strict* mode, `recv()` drops datagrams whose
/// source does not match the pinned remote and keeps reading. In
/// *non-strict* mode, the remote is learned from the first datagram received.
pub struct UdpEndpoint {
    socket: Arc<UdpSocket>,
    remote: Option<SocketAddr>,
    strict: bool,
    read_timeout: Duration,
}

impl UdpEndpoint {
    /// Bind a fresh ephemeral UDP socket with no pinned remote yet.
    pub async fn bind_ephemeral(read_timeout: Duration) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        Ok(Self {
            socket: Arc::new(socket),
            remote: None,
            strict: true,
            read_timeout,
        })
    }

    /// Wrap an already-bound socket, pinning `remote` immediately.
    pub fn new(socket: Arc<UdpSocket>, remote: Option<SocketAddr>, read_timeout: Duration) -> Self {
        Self {
            socket,
            remote,
            strict: true,
            read_timeout,
        }
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn socket(&self) -> Arc<UdpSocket> {
        self.socket.clone()
    }

    pub fn remote(&self) -> Option<SocketAddr> {
        self.remote
    }

    pub fn set_remote(&mut self, remote: SocketAddr) {
        self.remote = Some(remote);
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Send to the pinned remote. Fails if no remote is pinned.
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        let remote = self
            .remote
            .ok_or_else(|| NatError::Protocol("send() with no pinned remote address".into()))?;
        self.send_to(data, remote).await
    }

    /// Send to an explicit address, bypassing the pinned remote.
    pub async fn send_to(&self, data: &[u8], addr: SocketAddr) -> Result<()> {
        self.socket.send_to(data, addr).await?;
        Ok(())
    }

    /// Receive the next datagram honouring strict/non-strict filtering and
    /// the configured read timeout.
    pub async fn recv(&mut self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; crate::constants::MAX_DATAGRAM];
        loop {
            let (len, src) = tokio::time::timeout(self.read_timeout, self.socket.recv_from(&mut buf))
                .await
                .map_err(|_| NatError::Timeout("udp recv"))?
                .map_err(|e| NatError::Transport(e.to_string()))?;

            if self.strict {
                if let Some(remote) = self.remote {
                    if src != remote {
                        continue;
                    }
                }
            } else {
                self.remote = Some(src);
            }
            buf.truncate(len);
            return Ok(buf);
        }
    }
}
