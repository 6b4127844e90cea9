use thiserror::Error;

pub type Result<T, E = NatError> = core::result::Result<T, E>;

/// Error kinds produced by the traversal protocol.
#[derive(Debug, Error)]
pub enum NatError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// Socket read exceeded its configured budget. Usually recoverable by retrying
    /// the step or probe that timed out.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// Connection reset, refused, or unreachable. Recoverable by reconnection.
    #[error("transport error: {0}")]
    Transport(String),

    /// The peer half-closed the control channel.
    #[error("connection closed by peer")]
    Closed,

    /// Unparseable or unexpected on-the-wire content.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The rendezvous server did not answer within the probe budget.
    #[error("no response from traversal server")]
    NoServer,

    /// Both directions of `_try_punch_hole` failed for a pair.
    #[error("hole punching failed between both peers")]
    Traversal,
}

impl NatError {
    /// True for errors the client's outer `connect()` loop should retry rather
    /// than surface as a fatal error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NatError::Timeout(_) | NatError::Transport(_) | NatError::Closed | NatError::Traversal
        )
    }
}
