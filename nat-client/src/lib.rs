//! Client executor library: the pieces `main.rs` wires together. Split out
//! so the executor and relay can be exercised by integration tests without
//! going through the binary.

pub mod echo;
pub mod executor;
pub mod relay;

pub use executor::Client;
pub use relay::Relay;
