//! Wire encoding of a public `(IPv4, port)` address as observed by the
//! rendezvous server: 6 bytes, 4-byte network-order address followed by a
//! 2-byte network-order port. All-zero means "unknown".

use crate::error::{NatError, Result};
use std::net::{Ipv4Addr, SocketAddrV4};

pub const PACKED_ADDR_LEN: usize = 6;

/// All-zero sentinel meaning "not yet learned".
pub const UNKNOWN_ADDR: [u8; PACKED_ADDR_LEN] = [0u8; PACKED_ADDR_LEN];

/// Pack an IPv4 socket address into the 6-byte wire form.
pub fn pack_addr(addr: SocketAddrV4) -> [u8; PACKED_ADDR_LEN] {
    let mut out = [0u8; PACKED_ADDR_LEN];
    out[..4].copy_from_slice(&addr.ip().octets());
    out[4..].copy_from_slice(&addr.port().to_be_bytes());
    out
}

/// Unpack a 6-byte wire address. Returns `Protocol` if `bytes` is not exactly
/// 6 bytes long.
pub fn unpack_addr(bytes: &[u8]) -> Result<SocketAddrV4> {
    if bytes.len() != PACKED_ADDR_LEN {
        return Err(NatError::Protocol(format!(
            "address response must be {PACKED_ADDR_LEN} bytes, got {}",
            bytes.len()
        )));
    }
    let ip = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
    let port = u16::from_be_bytes([bytes[4], bytes[5]]);
    Ok(SocketAddrV4::new(ip, port))
}

/// True if `bytes` is the 6-byte all-zero "unknown" sentinel.
pub fn is_unknown(bytes: &[u8]) -> bool {
    bytes == UNKNOWN_ADDR
}
