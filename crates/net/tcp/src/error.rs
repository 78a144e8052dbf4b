//! Error type shared by every TCP transport operation.

use std::{io, net::SocketAddr};

use libp2p::Multiaddr;

/// Errors produced by the TCP transport.
///
/// Address validation failures are returned synchronously, before any socket
/// is allocated. Everything else arrives through the channel that would have
/// carried the success value: the listener's connection stream, the dial
/// future, or the affected connection.
#[derive(Debug, thiserror::Error)]
pub enum TcpError {
    /// The multiaddr is not a TCP address this transport can use.
    #[error("invalid TCP multiaddr {addr}: {reason}")]
    InvalidAddress {
        addr: Multiaddr,
        reason: &'static str,
    },

    /// The OS refused to bind or listen on the requested endpoint.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The outbound connect failed (refused, unreachable, timed out).
    #[error("failed to dial {addr}: {source}")]
    Dial {
        addr: Multiaddr,
        #[source]
        source: io::Error,
    },

    /// I/O failure on an established connection.
    #[error("stream error: {0}")]
    Stream(#[source] io::Error),

    /// Queried metadata was never set.
    #[error("{0} not available")]
    NotAvailable(&'static str),

    /// The listener closed before it could answer.
    #[error("listener closed")]
    ListenerClosed,

    /// The connection is already closed.
    #[error("connection closed")]
    ConnectionClosed,
}

impl TcpError {
    pub(crate) fn invalid(addr: &Multiaddr, reason: &'static str) -> Self {
        Self::InvalidAddress {
            addr: addr.clone(),
            reason,
        }
    }

    /// Whether the error is caused by the caller's input rather than the network.
    pub fn is_invalid_address(&self) -> bool {
        matches!(self, Self::InvalidAddress { .. })
    }
}
