//! End-to-end traversal scenario from the client's side: a fake server drives
//! `Client::connect()` through the full operation script by hand over a real
//! TCP control connection, while a stand-in peer answers the hello burst, so
//! the whole dispatch loop (BIND → ANNOUNCE_ADDR → UPDATE_ADDR → SEND_HELLO →
//! WAIT_HELLO → FINISH) runs exactly as it would against the real server.

use nat_client::Client;
use nat_core::constants::{HELLO_PACKET, MAX_DATAGRAM, PORT};
use nat_core::{addr, ControlCodec, Operation, OperationResult};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};

/// Answers exactly one address probe on `udp` with `peer_addr`'s packed
/// form, regardless of the probe's own contents — this test stands in for
/// the rendezvous table, which has its own coverage in `nat-server`.
async fn answer_one_probe(udp: &UdpSocket, peer_addr: SocketAddrV4) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let (_len, src) = udp.recv_from(&mut buf).await.unwrap();
    udp.send_to(&addr::pack_addr(peer_addr), src).await.unwrap();
}

/// Plays the server side of `_try_punch_hole` by hand over one control
/// connection, answering address probes on `address_service` in lockstep
/// with the steps that trigger them.
async fn drive_script(control: &mut ControlCodec, address_service: &UdpSocket, peer_addr: SocketAddrV4) {
    control.send_and_wait(Operation::Bind, OperationResult::Ok).await.unwrap();

    let (ack, _probe) = tokio::join!(
        control.send_and_wait(Operation::AnnounceAddr, OperationResult::Ok),
        answer_one_probe(address_service, peer_addr),
    );
    ack.unwrap();

    let (ack, _probe) = tokio::join!(
        control.send_and_wait(Operation::UpdateAddr, OperationResult::Ok),
        answer_one_probe(address_service, peer_addr),
    );
    ack.unwrap();

    control.send_and_wait(Operation::SendHello, OperationResult::Ok).await.unwrap();

    control.write_op(Operation::WaitHello).await.unwrap();
    let result = control.read_result().await.unwrap();
    assert_eq!(result, OperationResult::Ok, "client must see the peer's hello");

    control.write_op(Operation::Finish).await.unwrap();
}

/// Stands in for the other peer: waits for the client's hello burst and
/// echoes one hello back so the client's `WAIT_HELLO` succeeds.
async fn echo_one_hello(peer: UdpSocket) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let (len, client_addr) = peer.recv_from(&mut buf).await.unwrap();
    assert_eq!(&buf[..len], HELLO_PACKET);
    peer.send_to(HELLO_PACKET, client_addr).await.unwrap();
}

/// Binds the real TCP control port and real UDP address-probe port on
/// loopback, matching `executor.rs`'s own `server_request` test: this is the
/// only test in this crate's `tests/` directory that binds `PORT`, and
/// separate test binaries run one at a time under `cargo test`, so it stays
/// collision-free against the crate's unit tests.
#[tokio::test(flavor = "current_thread")]
async fn client_connect_completes_full_script_against_fake_server() {
    let tcp_listener = TcpListener::bind((Ipv4Addr::LOCALHOST, PORT)).await.unwrap();
    let address_service = UdpSocket::bind((Ipv4Addr::LOCALHOST, PORT)).await.unwrap();
    let peer = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let peer_addr = match peer.local_addr().unwrap() {
        SocketAddr::V4(v4) => v4,
        SocketAddr::V6(_) => unreachable!("loopback bind is always ipv4"),
    };

    let server_task = tokio::spawn(async move {
        let (stream, _) = tcp_listener.accept().await.unwrap();
        let mut control = ControlCodec::new(stream);
        let local_id = control.read_line().await.unwrap();
        let remote_id = control.read_line().await.unwrap();
        assert_eq!(local_id, "alice");
        assert_eq!(remote_id, "bob");
        drive_script(&mut control, &address_service, peer_addr).await;
    });
    let peer_task = tokio::spawn(echo_one_hello(peer));

    let client = Client::new(Ipv4Addr::LOCALHOST.into(), "alice".into(), "bob".into());
    let channel = tokio::time::timeout(Duration::from_secs(5), client.connect())
        .await
        .expect("client should complete the traversal script promptly");

    assert_eq!(channel.remote_addr(), SocketAddr::V4(peer_addr));

    server_task.await.unwrap();
    peer_task.await.unwrap();
}
