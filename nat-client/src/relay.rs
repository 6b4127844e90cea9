//! Bidirectional relay between a live peer channel and a local UDP endpoint
//! (the local application's socket). Ferries application payloads in both
//! directions on two independent tasks; does not impose ordering between
//! them.

use nat_core::{NatError, PeerChannel, Result, UdpEndpoint};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::warn;

/// Bind a local endpoint that waits for the application to speak first,
/// learning its address from whatever arrives (`--listen <ip:port>`).
pub async fn bind_listen(addr: SocketAddr, read_timeout: Duration) -> Result<UdpEndpoint> {
    let socket = UdpSocket::bind(addr).await?;
    Ok(UdpEndpoint::new(Arc::new(socket), None, read_timeout).with_strict(false))
}

/// Bind a local endpoint pinned to a fixed application address
/// (`--connect <ip:port>`).
pub async fn bind_connect(addr: SocketAddr, read_timeout: Duration) -> Result<UdpEndpoint> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
    Ok(UdpEndpoint::new(Arc::new(socket), Some(addr), read_timeout))
}

/// Owns the two splice tasks for one live pairing. Restarted by the
/// liveness loop whenever the peer channel's `active` predicate goes false.
pub struct Relay {
    cancel: Arc<Notify>,
    peer_to_local: JoinHandle<()>,
    local_to_peer: JoinHandle<()>,
}

impl Relay {
    pub fn start(channel: Arc<Mutex<PeerChannel>>, local: UdpEndpoint) -> Self {
        let local = Arc::new(Mutex::new(local));
        let cancel = Arc::new(Notify::new());

        let peer_to_local = tokio::spawn(splice_peer_to_local(channel.clone(), local.clone(), cancel.clone()));
        let local_to_peer = tokio::spawn(splice_local_to_peer(channel, local, cancel.clone()));

        Self {
            cancel,
            peer_to_local,
            local_to_peer,
        }
    }

    /// Cancel both splice tasks. Idempotent in effect (aborting an already
    /// finished task is a no-op).
    pub fn stop(self) {
        self.cancel.notify_waiters();
        self.peer_to_local.abort();
        self.local_to_peer.abort();
    }
}

async fn splice_peer_to_local(channel: Arc<Mutex<PeerChannel>>, local: Arc<Mutex<UdpEndpoint>>, cancel: Arc<Notify>) {
    loop {
        tokio::select! {
            _ = cancel.notified() => return,
            result = async { channel.lock().await.recv().await } => {
                match result {
                    Ok(data) => {
                        if let Err(e) = local.lock().await.send(&data).await {
                            warn!(error = %e, "relay: local send failed");
                        }
                    }
                    Err(NatError::Timeout(_)) => continue,
                    Err(e) => {
                        warn!(error = %e, "relay: peer recv failed, stopping peer->local splice");
                        return;
                    }
                }
            }
        }
    }
}

async fn splice_local_to_peer(channel: Arc<Mutex<PeerChannel>>, local: Arc<Mutex<UdpEndpoint>>, cancel: Arc<Notify>) {
    loop {
        tokio::select! {
            _ = cancel.notified() => return,
            result = async { local.lock().await.recv().await } => {
                match result {
                    Ok(data) => {
                        if let Err(e) = channel.lock().await.send(&data).await {
                            warn!(error = %e, "relay: peer send failed");
                        }
                    }
                    Err(NatError::Timeout(_)) => continue,
                    Err(e) => {
                        warn!(error = %e, "relay: local recv failed, stopping local->peer splice");
                        return;
                    }
                }
            }
        }
    }
}
