//! Rendezvous server library: the pieces `main.rs` wires together. Split out
//! so the coordinator and UDP service can be exercised by integration tests
//! without going through the binary.

pub mod config;
pub mod coordinator;
pub mod pending;
pub mod table;
pub mod udp_service;

pub use config::ServerConfig;
pub use coordinator::Coordinator;
pub use pending::PendingConnections;
pub use table::RendezvousTable;
