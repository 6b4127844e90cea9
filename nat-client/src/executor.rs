//! Client executor: drives one server-initiated traversal session at a time
//! over a TCP control connection, owning the local UDP socket through its
//! binds and rebinds.

use nat_core::constants::{
    ADDR_WAIT_TIME, COOKIE, HELLO_PACKET, HELLO_PACKETS_COUNT, MAX_DATAGRAM, PORT,
    SERVER_REQUEST_PROBES, UDP_SOCKET_TIMEOUT,
};
use nat_core::{addr, ControlCodec, NatError, Operation, OperationResult, PeerChannel, Result};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::{TcpStream, UdpSocket};
use tracing::{info, warn};

/// Mutable state threaded through one connection attempt: the client's own
/// rebindable UDP socket, the peer's last-learned public address, and the
/// peer channel built once that address is known.
struct Session {
    socket: Option<Arc<UdpSocket>>,
    remote_addr: Option<SocketAddr>,
    channel: Option<PeerChannel>,
}

impl Session {
    fn new() -> Self {
        Self {
            socket: None,
            remote_addr: None,
            channel: None,
        }
    }
}

/// Drives the scripted traversal for one `(local_id, remote_id)` pair
/// against one rendezvous server.
pub struct Client {
    server_ip: IpAddr,
    local_id: String,
    remote_id: String,
}

impl Client {
    pub fn new(server_ip: IpAddr, local_id: String, remote_id: String) -> Self {
        Self {
            server_ip,
            local_id,
            remote_id,
        }
    }

    /// Opens a control connection and runs it to completion, retrying
    /// indefinitely on failure: any transport error restarts the session
    /// from scratch rather than surfacing to the caller.
    pub async fn connect(&self) -> PeerChannel {
        loop {
            match self.try_connect().await {
                Ok(channel) => return channel,
                Err(e) if e.is_retryable() => {
                    warn!(error = %e, "connection attempt failed, retrying");
                }
                Err(e) => {
                    warn!(error = %e, "connection attempt failed with a non-retryable error, retrying anyway");
                }
            }
        }
    }

    async fn try_connect(&self) -> Result<PeerChannel> {
        let stream = TcpStream::connect((self.server_ip, PORT)).await?;
        let mut control = ControlCodec::new(stream);
        control.write_line(&self.local_id).await?;
        control.write_line(&self.remote_id).await?;

        let mut session = Session::new();
        loop {
            let op = control.read_op().await?;
            if op == Operation::Finish {
                return session
                    .channel
                    .take()
                    .ok_or_else(|| NatError::Protocol("FINISH with no established channel".into()));
            }
            let ok = self.dispatch(op, &mut session).await?;
            control.write_result(OperationResult::from_bool(ok)).await?;
        }
    }

    /// Executes one operation. The outer `Result` carries errors fatal to
    /// this control connection (propagated to trigger a full reconnect); the
    /// inner `bool` is the step's own OK/FAIL verdict reported to the server.
    async fn dispatch(&self, op: Operation, session: &mut Session) -> Result<bool> {
        match op {
            Operation::Bind => {
                self.process_bind(session).await?;
                Ok(true)
            }
            Operation::AnnounceAddr => {
                self.server_request(session).await?;
                Ok(true)
            }
            Operation::UpdateAddr => {
                self.process_update_addr(session).await?;
                Ok(true)
            }
            Operation::SendHello => {
                self.process_send_hello(session).await?;
                Ok(true)
            }
            Operation::WaitHello => self.process_wait_hello(session).await,
            Operation::Finish => unreachable!("FINISH is handled by the caller"),
        }
    }

    async fn process_bind(&self, session: &mut Session) -> Result<()> {
        session.channel = None;
        let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        info!(local_addr = ?socket.local_addr()?, "bound fresh udp socket");
        session.socket = Some(Arc::new(socket));
        session.remote_addr = None;
        Ok(())
    }

    async fn process_update_addr(&self, session: &mut Session) -> Result<()> {
        loop {
            let response = self.server_request(session).await?;
            if response.len() != addr::PACKED_ADDR_LEN {
                return Err(NatError::Protocol(format!(
                    "address response must be {} bytes, got {}",
                    addr::PACKED_ADDR_LEN,
                    response.len()
                )));
            }
            if !addr::is_unknown(&response) {
                let remote = addr::unpack_addr(&response)?;
                info!(%remote, remote_id = self.remote_id, "learned remote address");
                let socket = session.socket.clone().expect("socket bound before UPDATE_ADDR");
                let remote_addr = SocketAddr::V4(remote);
                session.remote_addr = Some(remote_addr);
                session.channel = Some(PeerChannel::new(socket, remote_addr, UDP_SOCKET_TIMEOUT));
                return Ok(());
            }
            tokio::time::sleep(ADDR_WAIT_TIME).await;
        }
    }

    async fn process_send_hello(&self, session: &mut Session) -> Result<()> {
        let channel = session
            .channel
            .as_ref()
            .ok_or_else(|| NatError::Protocol("SEND_HELLO before UPDATE_ADDR".into()))?;
        for _ in 0..HELLO_PACKETS_COUNT {
            channel.send_raw(HELLO_PACKET).await?;
        }
        Ok(())
    }

    /// Loops on `recv_raw` until the hello byte-string is seen. A timeout or
    /// a connection-reset (e.g. a delayed ICMP unreachable) is a normal FAIL
    /// outcome, not an error fatal to the control connection.
    async fn process_wait_hello(&self, session: &mut Session) -> Result<bool> {
        let channel = session
            .channel
            .as_mut()
            .ok_or_else(|| NatError::Protocol("WAIT_HELLO before UPDATE_ADDR".into()))?;
        loop {
            match channel.recv_raw().await {
                Ok(data) if data == HELLO_PACKET => return Ok(true),
                Ok(_) => continue,
                Err(NatError::Timeout(_)) => return Ok(false),
                Err(NatError::Transport(_)) => return Ok(false),
                Err(e) => return Err(e),
            }
        }
    }

    /// Sends the three-line cookie probe and returns the first reply whose
    /// source IP matches the server, retransmitting up to
    /// `SERVER_REQUEST_PROBES` times. Exhausting the budget fails with
    /// `NoServer`.
    async fn server_request(&self, session: &Session) -> Result<Vec<u8>> {
        let socket = session.socket.clone().expect("socket bound before server_request");
        let request = format!(
            "{}\n{}\n{}",
            std::str::from_utf8(COOKIE).expect("COOKIE is valid utf-8"),
            self.local_id,
            self.remote_id
        );
        let server_addr = SocketAddr::new(self.server_ip, PORT);

        for _ in 0..SERVER_REQUEST_PROBES {
            socket.send_to(request.as_bytes(), server_addr).await?;
            let attempt = tokio::time::timeout(UDP_SOCKET_TIMEOUT, recv_from_server(&socket, self.server_ip)).await;
            match attempt {
                Ok(Ok(data)) => return Ok(data),
                _ => continue,
            }
        }
        Err(NatError::NoServer)
    }
}

async fn recv_from_server(socket: &UdpSocket, server_ip: IpAddr) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (len, src) = socket.recv_from(&mut buf).await?;
        if src.ip() == server_ip {
            return Ok(buf[..len].to_vec());
        }
    }
}
