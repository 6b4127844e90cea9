//! Protocol constants shared by the server and client. Exact timing is not
//! adversarially load-bearing since every step is retried on timeout.

use std::time::Duration;

/// Shared TCP (control) and UDP (address-probe) port.
pub const PORT: u16 = 9045;

/// Fixed opaque prefix marking a datagram as belonging to the traversal
/// protocol itself (address probes, keepalives, hello). Application payloads
/// sharing this prefix are escape-wrapped by the NAT-kept channel.
pub const COOKIE: &[u8] = b"NYXPUNCH";

/// Hello probe payload burst during `SEND_HELLO`/`WAIT_HELLO`. Must start
/// with `COOKIE` so that it is filtered out of the application `recv()`.
pub const HELLO_PACKET: &[u8] = b"NYXPUNCHHELLO";

/// Keepalive sentinel sent by the NAT-kept channel's background emitter.
/// Must start with `COOKIE` for the same reason as `HELLO_PACKET`.
pub const KEEPALIVE_PACKET: &[u8] = b"NYXPUNCHKEEPALIVE";

/// Number of hello datagrams burst per `SEND_HELLO` step.
pub const HELLO_PACKETS_COUNT: usize = 5;

/// Retransmit budget for a single `server_request` round-trip.
pub const SERVER_REQUEST_PROBES: u32 = 5;

/// Sleep between `UPDATE_ADDR` polls while the server still reports "unknown".
pub const ADDR_WAIT_TIME: Duration = Duration::from_secs(1);

/// Period of the background keepalive emitter.
pub const KEEPALIVE_SEND_TIME: Duration = Duration::from_secs(10);

/// A peer channel is considered dead once this long has elapsed since the
/// last received datagram.
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Read timeout applied to the client's UDP socket after each `BIND`.
pub const UDP_SOCKET_TIMEOUT: Duration = Duration::from_secs(2);

/// Read timeout applied to a TCP control socket, both server- and client-side.
pub const OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum number of traversal pairs the server drives concurrently.
pub const SERVER_WORKERS: usize = 64;

/// Timeout used for purely-local loopback connection attempts in tests.
pub const LOCAL_CONNECTION_TIMEOUT: Duration = Duration::from_millis(100);

/// Maximum UDP datagram size this protocol ever sends or expects to receive.
pub const MAX_DATAGRAM: usize = 1024;

/// Single-byte escape prefix used by the NAT-kept channel's cookie escape.
pub const ESCAPE_BYTE: u8 = b'\\';
