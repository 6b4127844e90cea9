//! Pending control connections: the first peer of a pair to connect is
//! parked here under its own id until its partner arrives and claims it.
//! One-shot: a parked connection is served to exactly one claimant.

use nat_core::ControlCodec;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Outcome of [`PendingConnections::claim_or_park`].
pub enum Claim {
    /// No partner was waiting; this connection is now parked under its own
    /// id and the caller should stop driving it (it will be claimed later,
    /// or time out and be dropped by its own read timeout).
    Parked,
    /// A partner was already parked under the id this connection requested;
    /// the caller becomes the traversal driver for the pair.
    Claimed {
        mine: ControlCodec,
        partner: ControlCodec,
    },
}

/// Process-wide map from peer-id to its parked control connection.
///
/// The claim is keyed strictly on `pending[requested_id]`, and the park
/// installs under `pending[local_id]`, both inside the same lock hold — this
/// closes a cross-naming race where A parks waiting for B while B parks
/// waiting for C: without a single critical section covering both the
/// lookup and the install, A could be handed out under B's id even though
/// B never requested A.
#[derive(Clone, Default)]
pub struct PendingConnections {
    inner: std::sync::Arc<Mutex<HashMap<String, ControlCodec>>>,
}

impl PendingConnections {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn claim_or_park(&self, local_id: &str, remote_id: &str, conn: ControlCodec) -> Claim {
        let mut guard = self.inner.lock().await;
        match guard.remove(remote_id) {
            Some(partner) => {
                drop(guard);
                Claim::Claimed { mine: conn, partner }
            }
            None => {
                guard.insert(local_id.to_string(), conn);
                Claim::Parked
            }
        }
    }

    /// Evict a parked connection without claiming a pair, e.g. because its
    /// partner never arrived before the operation timeout elapsed. No-op if
    /// the connection was already claimed (or never parked): removing it
    /// drops the last owner of its `ControlCodec`, closing the socket.
    pub async fn remove_parked(&self, local_id: &str) {
        self.inner.lock().await.remove(local_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    async fn dummy_codec() -> ControlCodec {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let (accept_res, connect_res) = tokio::join!(listener.accept(), connect);
        let _ = accept_res.unwrap();
        ControlCodec::new(connect_res.unwrap())
    }

    #[tokio::test]
    async fn first_arrival_parks_second_claims() {
        let pending = PendingConnections::new();
        let conn_a = dummy_codec().await;
        match pending.claim_or_park("alice", "bob", conn_a).await {
            Claim::Parked => {}
            Claim::Claimed { .. } => panic!("first arrival must park"),
        }

        let conn_b = dummy_codec().await;
        match pending.claim_or_park("bob", "alice", conn_b).await {
            Claim::Parked => panic!("second arrival must claim"),
            Claim::Claimed { .. } => {}
        }
    }

    #[tokio::test]
    async fn a_parked_connection_is_never_claimed_twice() {
        let pending = PendingConnections::new();
        let conn_a = dummy_codec().await;
        pending.claim_or_park("alice", "bob", conn_a).await;

        let conn_b = dummy_codec().await;
        let first_claim = pending.claim_or_park("bob", "alice", conn_b).await;
        assert!(matches!(first_claim, Claim::Claimed { .. }));

        // A third party asking for "alice" again must park, not claim —
        // alice's slot was consumed by the first claimant.
        let conn_c = dummy_codec().await;
        let second_claim = pending.claim_or_park("carol", "alice", conn_c).await;
        assert!(matches!(second_claim, Claim::Parked));
    }

    #[tokio::test]
    async fn remove_parked_evicts_an_unclaimed_connection() {
        let pending = PendingConnections::new();
        let conn_a = dummy_codec().await;
        pending.claim_or_park("alice", "bob", conn_a).await;

        pending.remove_parked("alice").await;

        // bob arrives looking for alice; alice's slot was evicted by the
        // timeout above, so bob parks instead of claiming a stale entry.
        let conn_b = dummy_codec().await;
        let claim = pending.claim_or_park("bob", "alice", conn_b).await;
        assert!(matches!(claim, Claim::Parked));
    }

    #[tokio::test]
    async fn crossed_names_do_not_double_claim() {
        // A parks waiting for B; B parks waiting for C (not A). A must not
        // be handed out to B under this ordering.
        let pending = PendingConnections::new();
        let conn_a = dummy_codec().await;
        pending.claim_or_park("a", "b", conn_a).await;

        let conn_b = dummy_codec().await;
        let claim = pending.claim_or_park("b", "c", conn_b).await;
        assert!(matches!(claim, Claim::Parked));
    }
}
