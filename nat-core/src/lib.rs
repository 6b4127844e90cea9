#![forbid(unsafe_code)]

//! Shared protocol core for UDP hole-punching: wire types, the line-framed
//! control codec, a single-socket UDP endpoint, and the NAT-kept peer
//! channel. Consumed by the `nat-server` coordinator and the `nat-client`
//! executor; contains no process-level (CLI, logging init) concerns.

pub mod addr;
pub mod channel;
pub mod codec;
pub mod constants;
pub mod error;
pub mod protocol;
pub mod udp;

pub use channel::PeerChannel;
pub use codec::ControlCodec;
pub use error::{NatError, Result};
pub use protocol::{Operation, OperationResult};
pub use udp::UdpEndpoint;
