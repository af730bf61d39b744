use std::fmt;
use std::net::SocketAddr;

use thiserror::Error;

use crate::connection::ConnectionId;

/// Errors surfaced by the relay library.
///
/// `Bind` is fatal at startup. `PeerSend` is always per-peer and is logged
/// and skipped by the fan-out loop; it never reaches the sender.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to bind relay listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to deliver update to connection {connection}: {reason}")]
    PeerSend {
        connection: ConnectionId,
        reason: PeerSendFailure,
    },

    #[error("relay server stopped unexpectedly: {0}")]
    Serve(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Why a single delivery attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerSendFailure {
    /// The peer's outbound queue is at capacity (slow reader).
    QueueFull,
    /// The peer's writer has already gone away.
    Closed,
}

impl PeerSendFailure {
    pub const fn as_label(&self) -> &'static str {
        match self {
            PeerSendFailure::QueueFull => "queue_full",
            PeerSendFailure::Closed => "closed",
        }
    }
}

impl fmt::Display for PeerSendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerSendFailure::QueueFull => write!(f, "outbound queue full"),
            PeerSendFailure::Closed => write!(f, "outbound channel closed"),
        }
    }
}

pub type Result<T, E = RelayError> = std::result::Result<T, E>;
