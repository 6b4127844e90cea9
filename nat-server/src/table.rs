//! The rendezvous table: a process-wide, concurrently accessible mapping
//! from peer-id to the last UDP address it was observed sending from.
//! Writes are last-writer-wins; a missing entry is a valid answer, not an
//! error.

use dashmap::DashMap;
use std::net::SocketAddrV4;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct RendezvousTable {
    inner: Arc<DashMap<String, SocketAddrV4>>,
}

impl RendezvousTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest observed address for `peer_id`, superseding any
    /// previous entry.
    pub fn put(&self, peer_id: &str, addr: SocketAddrV4) {
        self.inner.insert(peer_id.to_string(), addr);
    }

    /// Look up the most recently observed address for `peer_id`.
    pub fn get(&self, peer_id: &str) -> Option<SocketAddrV4> {
        self.inner.get(peer_id).map(|entry| *entry)
    }
}
