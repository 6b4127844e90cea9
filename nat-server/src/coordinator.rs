//! TCP control-connection coordinator: accepts control connections, pairs
//! them by id via [`PendingConnections`], and drives the paired traversal
//! script.

use crate::pending::{Claim, PendingConnections};
use nat_core::constants::OPERATION_TIMEOUT;
use nat_core::{ControlCodec, NatError, Operation, OperationResult, Result};
use socket2::{Domain, Socket, Type};
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Binds the shared TCP port with `SO_REUSEADDR` and a standard listen
/// backlog, ready to be converted into a [`TcpListener`].
pub fn bind_listener(port: u16) -> Result<TcpListener> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    let addr: SocketAddr = (Ipv4Addr::UNSPECIFIED, port).into();
    socket.bind(&addr.into())?;
    socket.listen(128)?;
    socket.set_nonblocking(true)?;
    Ok(TcpListener::from_std(socket.into())?)
}

/// Accepts control connections and hands each to the bounded worker pool.
/// The listener and the UDP address service (spawned separately by the
/// binary's `main`, sharing this same pool via [`Coordinator::pool`]) are
/// peers, not nested — they share no state but the worker permits and the
/// `PendingConnections` map threads only through this coordinator.
pub struct Coordinator {
    pending: PendingConnections,
    permits: Arc<Semaphore>,
    operation_timeout: Duration,
}

impl Coordinator {
    pub fn new(workers: usize) -> Self {
        Self::with_operation_timeout(workers, OPERATION_TIMEOUT)
    }

    /// As [`Coordinator::new`], but with an overridden operation timeout
    /// (settable from the server's `--config` file or `--port`/`--workers`
    /// CLI flags).
    pub fn with_operation_timeout(workers: usize, operation_timeout: Duration) -> Self {
        Self::with_pool(Arc::new(Semaphore::new(workers)), operation_timeout)
    }

    /// Build a coordinator against an externally owned worker pool, so that
    /// other long-lived server tasks — namely the UDP address-probe
    /// responder — can be bounded by the same permit set rather than running
    /// unbounded alongside it.
    pub fn with_pool(permits: Arc<Semaphore>, operation_timeout: Duration) -> Self {
        Self {
            pending: PendingConnections::new(),
            permits,
            operation_timeout,
        }
    }

    /// The worker pool backing this coordinator, for sharing with other
    /// server tasks that should be bounded by the same concurrency limit.
    pub fn pool(&self) -> Arc<Semaphore> {
        self.permits.clone()
    }

    pub async fn run(self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer_addr) = listener.accept().await?;
            let permit = self.permits.clone().acquire_owned().await.expect("semaphore never closed");
            let pending = self.pending.clone();
            let operation_timeout = self.operation_timeout;
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = handle_connection(stream, pending, operation_timeout).await {
                    warn!(%peer_addr, error = %e, "control connection ended with error");
                }
            });
        }
    }
}

async fn with_timeout<T>(timeout: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(NatError::Timeout("control operation")),
    }
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    pending: PendingConnections,
    operation_timeout: Duration,
) -> Result<()> {
    let mut conn = ControlCodec::new(stream);
    let local_id = with_timeout(operation_timeout, conn.read_line()).await?;
    let remote_id = with_timeout(operation_timeout, conn.read_line()).await?;
    info!(local_id, remote_id, "control connection announced");

    match pending.claim_or_park(&local_id, &remote_id, conn).await {
        Claim::Parked => {
            // Evict this slot if no partner claims it before the control
            // socket would have timed out anyway, so an abandoned pairing
            // request doesn't pin a connection in the map forever.
            let pending = pending.clone();
            tokio::spawn(async move {
                tokio::time::sleep(operation_timeout).await;
                pending.remove_parked(&local_id).await;
            });
            Ok(())
        }
        Claim::Claimed { mine, partner } => {
            traverse(local_id, remote_id, mine, partner, operation_timeout).await;
            Ok(())
        }
    }
}

/// Drives `_try_punch_hole` in both directions for a claimed pair, closing
/// both connections on return regardless of outcome. Returns whether either
/// direction succeeded, mainly so tests can assert on the outcome.
async fn traverse(
    driver_id: String,
    partner_id: String,
    mut driver: ControlCodec,
    mut partner: ControlCodec,
    operation_timeout: Duration,
) -> bool {
    let first = try_punch_hole(&mut driver, &mut partner, operation_timeout).await;
    let succeeded = match first {
        Ok(true) => true,
        Ok(false) => match try_punch_hole(&mut partner, &mut driver, operation_timeout).await {
            Ok(v) => v,
            Err(e) => {
                warn!(driver_id, partner_id, error = %e, "traversal aborted on reversed attempt");
                false
            }
        },
        Err(e) => {
            warn!(driver_id, partner_id, error = %e, "traversal aborted");
            false
        }
    };
    if succeeded {
        info!(driver_id, partner_id, "hole punching succeeded");
    } else {
        warn!(driver_id, partner_id, "hole punching failed between both peers");
    }
    succeeded
}

/// One attempt of the lockstep script, from `a`'s point of view as the one
/// whose `WAIT_HELLO` result gates success. Returns `Ok(false)` on an
/// explicit `FAIL` (the caller may retry with roles swapped); `Err` aborts
/// the pair outright (timeouts and transport errors).
async fn try_punch_hole(a: &mut ControlCodec, b: &mut ControlCodec, operation_timeout: Duration) -> Result<bool> {
    with_timeout(operation_timeout, a.send_and_wait(Operation::Bind, OperationResult::Ok)).await?;
    with_timeout(operation_timeout, b.send_and_wait(Operation::Bind, OperationResult::Ok)).await?;

    with_timeout(operation_timeout, a.send_and_wait(Operation::AnnounceAddr, OperationResult::Ok)).await?;
    with_timeout(operation_timeout, b.send_and_wait(Operation::AnnounceAddr, OperationResult::Ok)).await?;

    with_timeout(operation_timeout, a.send_and_wait(Operation::UpdateAddr, OperationResult::Ok)).await?;
    with_timeout(operation_timeout, b.send_and_wait(Operation::UpdateAddr, OperationResult::Ok)).await?;

    with_timeout(operation_timeout, a.send_and_wait(Operation::SendHello, OperationResult::Ok)).await?;
    with_timeout(operation_timeout, b.send_and_wait(Operation::SendHello, OperationResult::Ok)).await?;

    with_timeout(operation_timeout, a.write_op(Operation::WaitHello)).await?;
    let result = with_timeout(operation_timeout, a.read_result()).await?;
    if result != OperationResult::Ok {
        return Ok(false);
    }

    with_timeout(operation_timeout, a.send_and_wait(Operation::SendHello, OperationResult::Ok)).await?;
    with_timeout(operation_timeout, b.send_and_wait(Operation::WaitHello, OperationResult::Ok)).await?;

    with_timeout(operation_timeout, a.write_op(Operation::Finish)).await?;
    with_timeout(operation_timeout, b.write_op(Operation::Finish)).await?;

    Ok(true)
}
