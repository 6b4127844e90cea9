//! UDP address-probe service: answers `COOKIE\nsender_id\nrequested_id`
//! probes with the requested peer's last-observed public address, recording
//! the sender's own address as a side effect of every request.

use crate::table::RendezvousTable;
use nat_core::constants::{COOKIE, MAX_DATAGRAM};
use nat_core::{addr, Result};
use socket2::{Domain, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::Semaphore;
use tracing::{debug, trace, warn};

/// Binds the shared UDP port with `SO_REUSEADDR` set explicitly, matching
/// the TCP control listener so both sides of the shared port survive a
/// quick restart.
pub fn bind_socket(port: u16) -> Result<Arc<UdpSocket>> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, None)?;
    socket.set_reuse_address(true)?;
    let addr: SocketAddr = (Ipv4Addr::UNSPECIFIED, port).into();
    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;
    let socket = UdpSocket::from_std(socket.into())?;
    Ok(Arc::new(socket))
}

/// Runs the address-probe responder until the socket errors. Intended to be
/// spawned as one of the server's long-lived tasks alongside the TCP
/// coordinator, sharing its worker pool via `permits` so the two surfaces of
/// the same `SERVER_WORKERS` limit are actually the same semaphore rather
/// than two independent, uncoordinated bounds.
pub async fn run(socket: Arc<UdpSocket>, table: RendezvousTable, permits: Arc<Semaphore>) -> Result<()> {
    loop {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (len, src) = socket.recv_from(&mut buf).await?;
        let src = match src {
            SocketAddr::V4(v4) => v4,
            SocketAddr::V6(_) => {
                trace!(%src, "dropping probe from non-ipv4 source");
                continue;
            }
        };
        buf.truncate(len);

        let permit = permits.clone().acquire_owned().await.expect("semaphore never closed");
        let table = table.clone();
        let socket = socket.clone();
        tokio::spawn(async move {
            let _permit = permit;
            if let Some(response) = handle_datagram(&buf, src, &table) {
                if let Err(e) = socket.send_to(&response, SocketAddr::V4(src)).await {
                    warn!(%src, error = %e, "failed to reply to address probe");
                }
            }
        });
    }
}

/// Pure decode-and-answer step, split out from [`run`] so it can be unit
/// tested without a real socket.
fn handle_datagram(data: &[u8], src: SocketAddrV4, table: &RendezvousTable) -> Option<[u8; addr::PACKED_ADDR_LEN]> {
    let text = String::from_utf8_lossy(data);
    let lines: Vec<&str> = text.split('\n').collect();
    if lines.len() != 3 || lines[0].as_bytes() != COOKIE {
        return None;
    }
    let (sender_id, requested_id) = (lines[1], lines[2]);

    table.put(sender_id, src);
    debug!(sender_id, requested_id, %src, "recorded address probe");

    match table.get(requested_id) {
        Some(found) => Some(addr::pack_addr(found)),
        None => Some(addr::UNKNOWN_ADDR),
    }
}
